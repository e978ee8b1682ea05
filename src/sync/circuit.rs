//! Per-poll circuit breaker
//!
//! ## States
//! - **Closed**: normal interval polling
//! - **Open**: polling suspended until `open_until`
//! - **HalfOpen**: the single probe fetch after the cooldown elapsed
//!
//! ## Transitions
//! - Closed → Open: after `failure_threshold` consecutive failures
//! - Open → HalfOpen: when `open_until` elapses
//! - HalfOpen → Closed: probe succeeded
//! - HalfOpen → Open: probe failed, fresh cooldown of the same length
//!
//! The cooldown never grows. This type is pure bookkeeping; the engine loop
//! owns the timer.

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Poll cadence while the circuit is closed
    pub poll_interval: Duration,
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Fixed suspension window after the circuit opens
    pub cooldown: Duration,
    /// Upper bound on a single source fetch
    pub fetch_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// What a recorded outcome did to the circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Opened,
    Reopened,
    Closed,
}

#[derive(Debug, Clone)]
pub struct SyncState {
    pub consecutive_failures: u32,
    pub circuit: CircuitState,
    /// Earliest instant the next fetch may start
    pub next_fetch_at: Instant,
    pub open_until: Option<Instant>,
}

impl SyncState {
    /// A fresh state is due for an immediate first fetch
    pub fn new(now: Instant) -> Self {
        Self {
            consecutive_failures: 0,
            circuit: CircuitState::Closed,
            next_fetch_at: now,
            open_until: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.circuit == CircuitState::Open
    }

    /// Called when the timer fires while open: the next fetch is the probe
    pub fn begin_probe(&mut self) {
        if self.circuit == CircuitState::Open {
            self.circuit = CircuitState::HalfOpen;
            self.open_until = None;
        }
    }

    pub fn record_success(&mut self, now: Instant, config: &SyncConfig) -> Transition {
        let transition = if self.circuit == CircuitState::Closed {
            Transition::Unchanged
        } else {
            Transition::Closed
        };

        self.consecutive_failures = 0;
        self.circuit = CircuitState::Closed;
        self.open_until = None;
        self.next_fetch_at = now + config.poll_interval;
        transition
    }

    pub fn record_failure(&mut self, now: Instant, config: &SyncConfig) -> Transition {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        match self.circuit {
            CircuitState::HalfOpen => {
                self.open(now, config);
                Transition::Reopened
            }
            CircuitState::Closed if self.consecutive_failures >= config.failure_threshold => {
                self.open(now, config);
                Transition::Opened
            }
            _ => {
                self.next_fetch_at = now + config.poll_interval;
                Transition::Unchanged
            }
        }
    }

    fn open(&mut self, now: Instant, config: &SyncConfig) {
        let until = now + config.cooldown;
        self.circuit = CircuitState::Open;
        self.open_until = Some(until);
        self.next_fetch_at = until;
    }
}

/// Emit the log line matching a transition
pub(crate) fn log_transition(poll_id: &str, transition: Transition, state: &SyncState, config: &SyncConfig) {
    match transition {
        Transition::Opened => warn!(
            poll_id = %poll_id,
            failures = state.consecutive_failures,
            cooldown_secs = config.cooldown.as_secs(),
            "Circuit opened, polling suspended"
        ),
        Transition::Reopened => warn!(
            poll_id = %poll_id,
            cooldown_secs = config.cooldown.as_secs(),
            "Probe fetch failed, circuit re-opened"
        ),
        Transition::Closed => info!(poll_id = %poll_id, "Probe fetch succeeded, circuit closed"),
        Transition::Unchanged => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SyncConfig {
        SyncConfig::default()
    }

    #[test]
    fn test_opens_only_at_threshold() {
        let cfg = config();
        let now = Instant::now();
        let mut state = SyncState::new(now);

        assert_eq!(state.record_failure(now, &cfg), Transition::Unchanged);
        assert_eq!(state.record_failure(now, &cfg), Transition::Unchanged);
        assert!(!state.is_open());
        assert_eq!(state.record_failure(now, &cfg), Transition::Opened);
        assert!(state.is_open());
        assert_eq!(state.next_fetch_at, now + cfg.cooldown);
    }

    #[test]
    fn test_success_resets_failure_run() {
        let cfg = config();
        let now = Instant::now();
        let mut state = SyncState::new(now);

        state.record_failure(now, &cfg);
        state.record_failure(now, &cfg);
        state.record_success(now, &cfg);
        state.record_failure(now, &cfg);
        state.record_failure(now, &cfg);

        assert!(!state.is_open());
        assert_eq!(state.consecutive_failures, 2);
    }

    #[test]
    fn test_probe_failure_reopens_with_same_cooldown() {
        let cfg = config();
        let start = Instant::now();
        let mut state = SyncState::new(start);
        for _ in 0..3 {
            state.record_failure(start, &cfg);
        }

        let probe_at = start + cfg.cooldown;
        state.begin_probe();
        assert_eq!(state.circuit, CircuitState::HalfOpen);
        assert_eq!(state.record_failure(probe_at, &cfg), Transition::Reopened);
        assert_eq!(state.open_until, Some(probe_at + cfg.cooldown));

        let second_probe = probe_at + cfg.cooldown;
        state.begin_probe();
        assert_eq!(state.record_success(second_probe, &cfg), Transition::Closed);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.next_fetch_at, second_probe + cfg.poll_interval);
    }
}
