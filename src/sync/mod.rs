//! Tally synchronization
//!
//! Keeps a fresh `TallySnapshot` per poll despite an unreliable upstream,
//! suspending polling behind a fixed-cooldown circuit breaker during outages.

pub mod circuit;
pub mod engine;

pub use circuit::{CircuitState, SyncConfig, SyncState, Transition};
pub use engine::{SyncEngine, SyncStatus};
