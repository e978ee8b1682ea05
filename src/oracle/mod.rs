//! Outbound oracle clients
//!
//! - Source oracle: current tally of a poll (backend API or on-chain account)
//! - Scoring oracle: agent risk assessments
//! - Ledger RPC: account data, balances and transaction history
//!
//! All clients are single-shot. Retry, backoff and staleness policy belong
//! to the callers.

pub mod health;
pub mod http;
pub mod ledger;
pub mod scoring;
pub mod source;

pub use health::HealthProbe;
pub use http::{HttpClientConfig, OracleHttpClient};
pub use ledger::{LedgerRpcClient, LedgerTallySource, decode_tally_account};
pub use scoring::{HttpScoringOracle, ScoringOracle};
pub use source::{BackendTallySource, TallySource, normalize_options};
