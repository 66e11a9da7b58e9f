//! Session Subscription Types
//!
//! Domain types for tracking which instruments each client session wants
//! to receive.
//!
//! # Design
//!
//! The registry tracks:
//! - The instrument set of each open session (`ClientSubscription`)
//! - A reverse index from instrument to interested sessions
//! - Wildcard (`"*"`) sessions, which match every instrument
//!
//! The reverse index lets fan-out find matching sessions without scanning
//! every session for every event.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a client session.
pub type SessionId = u64;

/// Subscription token matching every instrument.
pub const WILDCARD: &str = "*";

/// The set of instruments a single session is subscribed to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientSubscription {
    instruments: HashSet<String>,
}

impl ClientSubscription {
    /// Create an empty subscription.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an event for `instrument_id` should reach this session.
    #[must_use]
    pub fn matches(&self, instrument_id: &str) -> bool {
        self.instruments.contains(WILDCARD) || self.instruments.contains(instrument_id)
    }

    /// Whether the wildcard token is present.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.instruments.contains(WILDCARD)
    }

    /// Subscribed instrument ids (including the wildcard token).
    #[must_use]
    pub fn instruments(&self) -> Vec<String> {
        let mut instruments: Vec<_> = self.instruments.iter().cloned().collect();
        instruments.sort();
        instruments
    }

    /// Number of entries, counting the wildcard as one.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    /// Whether nothing is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    fn insert(&mut self, instrument_id: &str) -> bool {
        self.instruments.insert(instrument_id.to_string())
    }

    fn remove(&mut self, instrument_id: &str) -> bool {
        self.instruments.remove(instrument_id)
    }
}

// =============================================================================
// Registry State
// =============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    /// Session to its subscribed instruments.
    sessions: HashMap<SessionId, ClientSubscription>,
    /// Instrument (or wildcard) to subscribed sessions.
    instrument_sessions: HashMap<String, HashSet<SessionId>>,
}

impl RegistryState {
    fn index_add(&mut self, instrument_id: &str, session: SessionId) {
        self.instrument_sessions
            .entry(instrument_id.to_string())
            .or_default()
            .insert(session);
    }

    fn index_remove(&mut self, instrument_id: &str, session: SessionId) {
        if let Some(sessions) = self.instrument_sessions.get_mut(instrument_id) {
            sessions.remove(&session);
            if sessions.is_empty() {
                self.instrument_sessions.remove(instrument_id);
            }
        }
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe registry of session subscriptions.
///
/// Sessions mutate their own sets from their request handlers while the
/// fan-out path reads matches concurrently.
///
/// # Example
///
/// ```rust
/// use market_stream_hub::domain::subscription::{SubscriptionRegistry, WILDCARD};
///
/// let registry = SubscriptionRegistry::new();
/// registry.open_session(1);
/// registry.open_session(2);
///
/// registry.subscribe(1, "AAPL").unwrap();
/// registry.subscribe(2, WILDCARD).unwrap();
///
/// assert_eq!(registry.matching_sessions("AAPL"), vec![1, 2]);
/// assert_eq!(registry.matching_sessions("GOOG"), vec![2]);
///
/// registry.close_session(2);
/// assert!(registry.matching_sessions("GOOG").is_empty());
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session with an empty subscription set.
    ///
    /// Returns `false` if the session was already registered; its set is
    /// left untouched.
    pub fn open_session(&self, session: SessionId) -> bool {
        let mut state = self.state.write();
        if state.sessions.contains_key(&session) {
            return false;
        }
        state.sessions.insert(session, ClientSubscription::new());
        true
    }

    /// Remove a session and its whole subscription set.
    ///
    /// Returns the removed subscription, or `None` for an unknown session.
    pub fn close_session(&self, session: SessionId) -> Option<ClientSubscription> {
        let mut state = self.state.write();
        let subscription = state.sessions.remove(&session)?;

        for instrument in &subscription.instruments {
            state.index_remove(instrument, session);
        }

        Some(subscription)
    }

    /// Add an instrument (or the wildcard) to a session's set.
    ///
    /// Returns `true` if the entry was newly added.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionError::UnknownSession` if the session is not
    /// open and `SubscriptionError::EmptyInstrument` for a blank id.
    pub fn subscribe(
        &self,
        session: SessionId,
        instrument_id: &str,
    ) -> Result<bool, SubscriptionError> {
        let instrument_id = normalize_instrument(instrument_id)?;
        let mut state = self.state.write();

        let subscription = state
            .sessions
            .get_mut(&session)
            .ok_or(SubscriptionError::UnknownSession(session))?;

        let added = subscription.insert(instrument_id);
        if added {
            state.index_add(instrument_id, session);
        }

        Ok(added)
    }

    /// Remove an instrument (or the wildcard) from a session's set.
    ///
    /// Returns `true` if the entry was present.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionError::UnknownSession` if the session is not
    /// open and `SubscriptionError::EmptyInstrument` for a blank id.
    pub fn unsubscribe(
        &self,
        session: SessionId,
        instrument_id: &str,
    ) -> Result<bool, SubscriptionError> {
        let instrument_id = normalize_instrument(instrument_id)?;
        let mut state = self.state.write();

        let subscription = state
            .sessions
            .get_mut(&session)
            .ok_or(SubscriptionError::UnknownSession(session))?;

        let removed = subscription.remove(instrument_id);
        if removed {
            state.index_remove(instrument_id, session);
        }

        Ok(removed)
    }

    /// Sessions that should receive an event for `instrument_id`, sorted.
    #[must_use]
    pub fn matching_sessions(&self, instrument_id: &str) -> Vec<SessionId> {
        let state = self.state.read();

        let mut matched: Vec<SessionId> = state
            .instrument_sessions
            .get(instrument_id)
            .into_iter()
            .chain(state.instrument_sessions.get(WILDCARD))
            .flatten()
            .copied()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        matched.sort_unstable();
        matched
    }

    /// Snapshot of one session's subscription.
    #[must_use]
    pub fn subscription(&self, session: SessionId) -> Option<ClientSubscription> {
        self.state.read().sessions.get(&session).cloned()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let state = self.state.read();
        SubscriptionStats {
            session_count: state.sessions.len(),
            instrument_count: state
                .instrument_sessions
                .keys()
                .filter(|k| k.as_str() != WILDCARD)
                .count(),
            wildcard_sessions: state.instrument_sessions.get(WILDCARD).map_or(0, HashSet::len),
        }
    }
}

fn normalize_instrument(instrument_id: &str) -> Result<&str, SubscriptionError> {
    let trimmed = instrument_id.trim();
    if trimmed.is_empty() {
        return Err(SubscriptionError::EmptyInstrument);
    }
    Ok(trimmed)
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Open sessions.
    pub session_count: usize,
    /// Distinct instruments with at least one subscriber.
    pub instrument_count: usize,
    /// Sessions holding the wildcard.
    pub wildcard_sessions: usize,
}

// =============================================================================
// Errors
// =============================================================================

/// Subscription request errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// The session is not registered.
    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    /// The instrument id was blank.
    #[error("instrument id cannot be empty")]
    EmptyInstrument,
}

// =============================================================================
// Tests
// =============================================================================
