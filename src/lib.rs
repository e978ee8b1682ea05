//! GovAI Sentinel
//!
//! Keeps governance poll tallies in sync with an unreliable upstream, submits
//! signed votes with new/changed/unchanged reconciliation, and folds per-agent
//! risk scores into one bounded consensus figure.
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── lib.rs         - Crate root with re-exports
//! ├── main.rs        - Daemon entrypoint
//! ├── config.rs      - Environment configuration
//! ├── models/        - Polls, votes, tallies, agent scores
//! ├── oracle/        - Outbound clients
//! │   ├── http.rs     - Shared JSON-over-HTTP client
//! │   ├── source.rs   - Backend tally source
//! │   ├── ledger.rs   - On-chain tally source and account info
//! │   ├── scoring.rs  - Agent analysis client
//! │   └── health.rs   - Backend liveness probe
//! ├── sync/          - Tally sync engine
//! │   ├── circuit.rs  - Per-poll circuit breaker state
//! │   └── engine.rs   - Polling loops and snapshot publication
//! ├── consensus/     - Risk consensus
//! │   ├── band.rs       - Risk bands and recommendations
//! │   └── aggregator.rs - Cached mean-of-agents consensus
//! ├── wallet/        - Wallet sessions
//! │   ├── provider.rs - Signer providers and account info
//! │   └── session.rs  - Session lifecycle and persistence
//! ├── vote/          - Vote submission
//! │   ├── backend.rs  - Vote backend contract and HTTP client
//! │   ├── ledger.rs   - In-process vote ledger
//! │   └── protocol.rs - Sign, submit, reconcile
//! ├── crypto/        - Vote message signing
//! └── api/           - Local HTTP API
//! ```

pub mod api;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod models;
pub mod oracle;
pub mod sync;
pub mod vote;
pub mod wallet;

// Re-export main types for convenience
pub use config::{SentinelConfig, TallySourceKind};
pub use consensus::{
    ConsensusAggregator, ConsensusFreshness, ConsensusResult, ConsensusView, Recommendation,
    RiskBand,
};
pub use crypto::{WalletKeypair, vote_message};
pub use models::{
    AgentKind, AgentScore, AgentSelector, AnalysisReport, FlagSeverity, Freshness, PollRecord,
    TallyReading, TallySnapshot, VoteAction, VoteRecord,
};
pub use oracle::{
    BackendTallySource, HealthProbe, HttpClientConfig, HttpScoringOracle, LedgerRpcClient,
    LedgerTallySource, OracleHttpClient, ScoringOracle, TallySource,
};
pub use sync::{CircuitState, SyncConfig, SyncEngine, SyncStatus};
pub use vote::{
    HttpVoteBackend, InMemoryVoteLedger, SubmissionError, VoteBackend, VoteOutcome, VoteReceipt,
    VoteRequest, VoteSubmitter,
};
pub use wallet::{
    AccountInfoSource, ConnectionState, LocalKeypairProvider, SessionStore, WalletError,
    WalletProvider, WalletSession, WalletSessionManager,
};

// Re-export API types
pub use api::{ApiState, create_router};
