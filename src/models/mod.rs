//! Governance data models
//!
//! Contains the data structures shared by every component:
//! - Polls and vote records
//! - Tally snapshots published by the sync engine
//! - Agent scores returned by the scoring oracle

pub mod analysis;
pub mod poll;
pub mod tally;

pub use analysis::{
    AgentKind, AgentScore, AgentSelector, AnalysisReport, FlagSeverity, MAX_SCORE, MIN_SCORE,
    RiskFlag, clamp_score,
};
pub use poll::{PollRecord, VoteAction, VoteRecord};
pub use tally::{Freshness, TallyReading, TallySnapshot};
