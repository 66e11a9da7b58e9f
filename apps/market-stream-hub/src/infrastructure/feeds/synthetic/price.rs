//! Random-walk price model.
//!
//! Each tick moves a symbol's last price by a uniform drift of at most
//! 0.1 %, rounded to cents and floored at one cent. Quotes straddle the
//! walk with a half-spread of 0.02 % of price, minimum one cent.

use rand::Rng;
use rust_decimal::{Decimal, RoundingStrategy};

/// Largest per-tick drift in parts per million (0.1 %).
pub const MAX_DRIFT_PPM: i64 = 1_000;

/// Smallest price the walk produces.
pub const MIN_PRICE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

const SPREAD_RATIO: Decimal = Decimal::from_parts(2, 0, 0, false, 4);

/// Starting price for `symbol`.
#[must_use]
pub fn base_price(symbol: &str) -> Decimal {
    let whole = match symbol {
        "AAPL" => 185,
        "GOOGL" => 140,
        "MSFT" => 375,
        "AMZN" => 170,
        "META" => 480,
        "NVDA" => 850,
        "TSLA" => 240,
        "JPM" => 190,
        _ => 100,
    };
    Decimal::from(whole)
}

/// Apply a drift of `drift_ppm` parts per million to `price`.
#[must_use]
pub fn step(price: Decimal, drift_ppm: i64) -> Decimal {
    let drift = Decimal::new(drift_ppm.clamp(-MAX_DRIFT_PPM, MAX_DRIFT_PPM), 6);
    let next = (price * (Decimal::ONE + drift))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    next.max(MIN_PRICE)
}

/// Half of the quoted spread around `price`.
#[must_use]
pub fn half_spread(price: Decimal) -> Decimal {
    (price * SPREAD_RATIO).max(MIN_PRICE)
}

/// Bid and ask around `mid`. The bid never drops below one cent and
/// always sits strictly below the ask.
#[must_use]
pub fn quote_sides(mid: Decimal) -> (Decimal, Decimal) {
    let half = half_spread(mid);
    ((mid - half).max(MIN_PRICE), mid + half)
}

#[derive(Debug, Clone)]
struct SymbolPrice {
    symbol: String,
    last: Decimal,
}

/// Last price of every configured symbol.
#[derive(Debug, Clone)]
pub struct PriceBook {
    entries: Vec<SymbolPrice>,
}

impl PriceBook {
    /// Seed every symbol at its base price.
    #[must_use]
    pub fn new(symbols: &[String]) -> Self {
        Self {
            entries: symbols
                .iter()
                .map(|symbol| SymbolPrice {
                    symbol: symbol.clone(),
                    last: base_price(symbol),
                })
                .collect(),
        }
    }

    /// Number of symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the book has no symbols.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    fn last(&self, symbol: &str) -> Option<Decimal> {
        self.entries
            .iter()
            .find(|e| e.symbol == symbol)
            .map(|e| e.last)
    }

    /// Advance a randomly chosen symbol one tick.
    ///
    /// Returns `None` for an empty book.
    pub fn advance_random<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<(String, Decimal)> {
        if self.entries.is_empty() {
            return None;
        }
        let index = rng.random_range(0..self.entries.len());
        let drift = rng.random_range(-MAX_DRIFT_PPM..=MAX_DRIFT_PPM);

        let entry = &mut self.entries[index];
        entry.last = step(entry.last, drift);
        Some((entry.symbol.clone(), entry.last))
    }
}
