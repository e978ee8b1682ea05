//! Vote submission
//!
//! - `backend`: the (poll, voter)-unique vote store contract and its HTTP client
//! - `ledger`: in-process implementation of that contract
//! - `protocol`: sign, submit, reconcile, trigger refresh

pub mod backend;
pub mod ledger;
pub mod protocol;

pub use backend::{HttpVoteBackend, VoteBackend, VoteReceipt, VoteRequest};
pub use ledger::InMemoryVoteLedger;
pub use protocol::{SubmissionError, VoteOutcome, VoteSubmitter};
