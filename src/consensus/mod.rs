//! Risk consensus across analysis agents

pub mod aggregator;
pub mod band;

pub use aggregator::{ConsensusAggregator, ConsensusFreshness, ConsensusResult, ConsensusView};
pub use band::{Recommendation, RiskBand};
