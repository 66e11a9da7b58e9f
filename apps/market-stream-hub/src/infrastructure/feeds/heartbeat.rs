//! Heartbeat Tracking
//!
//! Probe bookkeeping shared between an adapter's `send_heartbeat` and its
//! worker, which polls for overdue probes and reports them.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
struct Probe {
    /// When the unanswered probe was sent.
    outstanding: Option<Instant>,
    last_answer: Instant,
}

/// Probe state for one adapter.
#[derive(Debug)]
pub struct HeartbeatState {
    probe: Mutex<Probe>,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Fresh state with no outstanding probe.
    #[must_use]
    pub fn new() -> Self {
        Self {
            probe: Mutex::new(Probe {
                outstanding: None,
                last_answer: Instant::now(),
            }),
        }
    }

    /// Record an outgoing probe. An earlier unanswered probe keeps its
    /// deadline.
    pub fn probe_sent(&self) {
        self.probe.lock().outstanding.get_or_insert_with(Instant::now);
    }

    /// Record that the peer answered.
    pub fn answered(&self) {
        let mut probe = self.probe.lock();
        probe.outstanding = None;
        probe.last_answer = Instant::now();
    }

    /// Whether a probe is awaiting an answer.
    #[must_use]
    pub fn is_outstanding(&self) -> bool {
        self.probe.lock().outstanding.is_some()
    }

    /// Time since the peer last answered.
    #[must_use]
    pub fn since_last_answer(&self) -> Duration {
        self.probe.lock().last_answer.elapsed()
    }

    /// Clear an outstanding probe older than `timeout`.
    ///
    /// Returns `true` once per unanswered probe.
    pub fn take_overdue(&self, timeout: Duration) -> bool {
        let mut probe = self.probe.lock();
        match probe.outstanding {
            Some(sent) if sent.elapsed() > timeout => {
                probe.outstanding = None;
                true
            }
            _ => false,
        }
    }

    /// Forget everything from the previous connection epoch.
    pub fn reset(&self) {
        *self.probe.lock() = Probe {
            outstanding: None,
            last_answer: Instant::now(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backdate(state: &HeartbeatState, by: Duration) {
        let mut probe = state.probe.lock();
        probe.outstanding = probe.outstanding.map(|sent| sent.checked_sub(by).unwrap());
    }

    #[test]
    fn starts_idle() {
        let state = HeartbeatState::new();
        assert!(!state.is_outstanding());
        assert!(state.since_last_answer() < Duration::from_millis(100));
        assert!(!state.take_overdue(Duration::ZERO));
    }

    #[test]
    fn answer_clears_probe() {
        let state = HeartbeatState::new();
        state.probe_sent();
        assert!(state.is_outstanding());

        state.answered();
        assert!(!state.is_outstanding());
        assert!(!state.take_overdue(Duration::ZERO));
    }

    #[test]
    fn overdue_probe_is_taken_once() {
        let state = HeartbeatState::new();
        state.probe_sent();
        backdate(&state, Duration::from_millis(200));

        assert!(state.take_overdue(Duration::from_millis(100)));
        assert!(!state.take_overdue(Duration::from_millis(100)));
        assert!(!state.is_outstanding());
    }

    #[test]
    fn fresh_probe_is_not_overdue() {
        let state = HeartbeatState::new();
        state.probe_sent();
        assert!(!state.take_overdue(Duration::from_secs(5)));
        assert!(state.is_outstanding());
    }

    #[test]
    fn repeated_probe_keeps_first_deadline() {
        let state = HeartbeatState::new();
        state.probe_sent();
        backdate(&state, Duration::from_millis(200));

        state.probe_sent();
        assert!(state.take_overdue(Duration::from_millis(100)));
    }

    #[test]
    fn reset_drops_outstanding_probe() {
        let state = HeartbeatState::new();
        state.probe_sent();

        state.reset();
        assert!(!state.is_outstanding());
    }
}
