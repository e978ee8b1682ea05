use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::oracle::HttpClientConfig;
use crate::sync::SyncConfig;

/// Configuration for the GovAI sentinel daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentinelConfig {
    /// Local status API
    pub server: ServerConfig,
    /// Polling backend (tally, scoring, votes)
    pub backend: BackendConfig,
    /// Where tallies are read from
    pub tally_source: TallySourceKind,
    /// On-chain ledger access
    pub ledger: LedgerConfig,
    /// Sync engine cadence and circuit breaker
    pub sync: SyncSettings,
    pub wallet: WalletConfig,
    pub logging: LoggingConfig,
    /// Polls to monitor
    pub poll_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend origin, e.g. `http://localhost:8000`
    pub url: String,
    /// Reject plain http URLs
    pub require_https: bool,
    pub scoring_timeout_secs: u64,
    pub vote_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TallySourceKind {
    Backend,
    Ledger,
    /// In-process vote ledger; no upstream at all
    Memory,
}

impl FromStr for TallySourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "backend" => Ok(TallySourceKind::Backend),
            "ledger" => Ok(TallySourceKind::Ledger),
            "memory" => Ok(TallySourceKind::Memory),
            other => Err(anyhow::anyhow!(
                "Unknown tally source '{}' (expected backend, ledger or memory)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// JSON-RPC endpoint
    pub rpc_url: String,
    /// poll_id -> tally account address
    pub accounts: HashMap<String, String>,
    /// Option ids of ledger-backed polls, in counter order
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    pub poll_interval_secs: u64,
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    pub fetch_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Hex ed25519 seed for the local keypair provider. Never logged.
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    /// Persisted session record
    pub session_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8787,
            },
            backend: BackendConfig {
                url: "http://localhost:8000".to_string(),
                require_https: false,
                scoring_timeout_secs: 8,
                vote_timeout_secs: 8,
            },
            tally_source: TallySourceKind::Backend,
            ledger: LedgerConfig {
                rpc_url: "https://api.devnet.solana.com".to_string(),
                accounts: HashMap::new(),
                options: vec!["yes".to_string(), "no".to_string(), "abstain".to_string()],
            },
            sync: SyncSettings {
                poll_interval_secs: 10,
                failure_threshold: 3,
                cooldown_secs: 30,
                fetch_timeout_secs: 8,
            },
            wallet: WalletConfig {
                secret_key: None,
                session_file: ".govai-session.json".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
            poll_ids: Vec::new(),
        }
    }
}

impl SentinelConfig {
    /// Load configuration from environment variables and validate it
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Server configuration
        if let Some(host) = lookup("GOVAI_API_HOST") {
            config.server.host = host;
        }

        if let Some(port) = lookup("GOVAI_API_PORT") {
            config.server.port = port.parse().context("Invalid GOVAI_API_PORT value")?;
        }

        // Backend configuration
        if let Some(require_https) = lookup("GOVAI_REQUIRE_HTTPS") {
            config.backend.require_https = require_https
                .parse()
                .context("Invalid GOVAI_REQUIRE_HTTPS value")?;
        }

        if let Some(url) = lookup("GOVAI_BACKEND_URL") {
            config.backend.url = url;
        }

        if let Some(secs) = lookup("GOVAI_SCORING_TIMEOUT_SECS") {
            config.backend.scoring_timeout_secs = secs
                .parse()
                .context("Invalid GOVAI_SCORING_TIMEOUT_SECS value")?;
        }

        if let Some(secs) = lookup("GOVAI_VOTE_TIMEOUT_SECS") {
            config.backend.vote_timeout_secs = secs
                .parse()
                .context("Invalid GOVAI_VOTE_TIMEOUT_SECS value")?;
        }

        // Tally source
        if let Some(source) = lookup("GOVAI_TALLY_SOURCE") {
            config.tally_source = source.parse()?;
        }

        if let Some(rpc_url) = lookup("GOVAI_LEDGER_RPC_URL") {
            config.ledger.rpc_url = rpc_url;
        }

        if let Some(accounts) = lookup("GOVAI_LEDGER_ACCOUNTS") {
            config.ledger.accounts = parse_account_pairs(&accounts)?;
        }

        if let Some(options) = lookup("GOVAI_LEDGER_OPTIONS") {
            config.ledger.options = split_list(&options);
        }

        // Sync configuration
        if let Some(secs) = lookup("GOVAI_POLL_INTERVAL_SECS") {
            config.sync.poll_interval_secs = secs
                .parse()
                .context("Invalid GOVAI_POLL_INTERVAL_SECS value")?;
        }

        if let Some(threshold) = lookup("GOVAI_FAILURE_THRESHOLD") {
            config.sync.failure_threshold = threshold
                .parse()
                .context("Invalid GOVAI_FAILURE_THRESHOLD value")?;
        }

        if let Some(secs) = lookup("GOVAI_COOLDOWN_SECS") {
            config.sync.cooldown_secs = secs.parse().context("Invalid GOVAI_COOLDOWN_SECS value")?;
        }

        if let Some(secs) = lookup("GOVAI_FETCH_TIMEOUT_SECS") {
            config.sync.fetch_timeout_secs = secs
                .parse()
                .context("Invalid GOVAI_FETCH_TIMEOUT_SECS value")?;
        }

        // Wallet configuration
        config.wallet.secret_key = lookup("GOVAI_WALLET_SECRET_KEY").filter(|k| !k.trim().is_empty());
        if config.wallet.secret_key.is_none() {
            warn!("GOVAI_WALLET_SECRET_KEY not set, local wallet will use an ephemeral key");
        }

        if let Some(path) = lookup("GOVAI_SESSION_FILE") {
            config.wallet.session_file = path;
        }

        // Logging configuration
        if let Some(level) = lookup("GOVAI_LOG_LEVEL") {
            config.logging.level = level;
        }

        config.poll_ids = lookup("GOVAI_POLL_IDS")
            .map(|ids| split_list(&ids))
            .context("GOVAI_POLL_IDS environment variable is required")?;

        config.validate()?;

        info!(
            "Monitoring {} poll(s) via {:?} source",
            config.poll_ids.len(),
            config.tally_source
        );

        Ok(config)
    }

    /// Validate configuration for security and consistency
    pub fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("Server host cannot be empty"));
        }

        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port must be non-zero"));
        }

        if self.backend.url.is_empty() {
            return Err(anyhow::anyhow!("Backend URL cannot be empty"));
        }

        if self.backend.require_https {
            if !self.backend.url.starts_with("https://") {
                return Err(anyhow::anyhow!(
                    "HTTPS is required but backend URL is not HTTPS: {}",
                    self.backend.url
                ));
            }

            if self.tally_source == TallySourceKind::Ledger && !self.ledger.rpc_url.starts_with("https://") {
                return Err(anyhow::anyhow!(
                    "HTTPS is required but ledger RPC URL is not HTTPS: {}",
                    self.ledger.rpc_url
                ));
            }
        }

        if self.sync.poll_interval_secs == 0 {
            return Err(anyhow::anyhow!("Poll interval must be non-zero"));
        }

        if self.sync.failure_threshold == 0 {
            return Err(anyhow::anyhow!("Failure threshold must be non-zero"));
        }

        if self.sync.cooldown_secs == 0 {
            return Err(anyhow::anyhow!("Circuit cooldown must be non-zero"));
        }

        if self.sync.fetch_timeout_secs == 0
            || self.backend.scoring_timeout_secs == 0
            || self.backend.vote_timeout_secs == 0
        {
            return Err(anyhow::anyhow!("Timeouts must be non-zero"));
        }

        if self.poll_ids.is_empty() {
            return Err(anyhow::anyhow!("At least one poll id must be configured"));
        }

        if self.tally_source != TallySourceKind::Backend && self.ledger.options.is_empty() {
            return Err(anyhow::anyhow!("Ledger and memory modes need at least one option id"));
        }

        if self.tally_source == TallySourceKind::Ledger {
            for poll_id in &self.poll_ids {
                if !self.ledger.accounts.contains_key(poll_id) {
                    return Err(anyhow::anyhow!(
                        "Ledger mode needs an account for poll {} (GOVAI_LEDGER_ACCOUNTS)",
                        poll_id
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            poll_interval: Duration::from_secs(self.sync.poll_interval_secs),
            failure_threshold: self.sync.failure_threshold,
            cooldown: Duration::from_secs(self.sync.cooldown_secs),
            fetch_timeout: Duration::from_secs(self.sync.fetch_timeout_secs),
        }
    }

    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            require_https: self.backend.require_https,
            timeout: Duration::from_secs(
                self.sync
                    .fetch_timeout_secs
                    .max(self.backend.scoring_timeout_secs)
                    .max(self.backend.vote_timeout_secs),
            ),
            ..Default::default()
        }
    }

    pub fn scoring_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.scoring_timeout_secs)
    }

    pub fn vote_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.vote_timeout_secs)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_account_pairs(raw: &str) -> Result<HashMap<String, String>> {
    let mut accounts = HashMap::new();
    for pair in split_list(raw) {
        let (poll_id, account) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Invalid GOVAI_LEDGER_ACCOUNTS entry: {}", pair))?;
        accounts.insert(poll_id.trim().to_string(), account.trim().to_string());
    }
    Ok(accounts)
}

/// Sanitize sensitive data for logging.
///
/// Secrets are masked to their edges; wallet addresses are shortened to a
/// recognizable prefix and suffix.
pub fn sanitize_for_logging(data: &str) -> String {
    let sensitive_patterns = ["key", "token", "password", "secret", "seed", "credential"];

    let data_lower = data.to_lowercase();
    for pattern in &sensitive_patterns {
        if data_lower.contains(pattern) {
            if !data.is_ascii() {
                return "***".to_string();
            }
            if data.len() > 20 {
                return format!("{}***{}", &data[..6], &data[data.len().saturating_sub(6)..]);
            } else {
                return format!(
                    "{}***{}",
                    &data[..data.len().min(2)],
                    &data[data.len().saturating_sub(2)..]
                );
            }
        }
    }

    if data.len() > 16 && data.is_ascii() {
        return format!("{}...{}", &data[..6], &data[data.len() - 4..]);
    }

    data.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_sanitize_for_logging() {
        assert_eq!(sanitize_for_logging("wallet_secret_12"), "wa***12");
        assert_eq!(sanitize_for_logging("p1"), "p1");
        assert_eq!(
            sanitize_for_logging("7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU"),
            "7xKXtg...gAsU"
        );
    }

    #[test]
    fn test_sanitize_non_ascii_secret() {
        assert_eq!(sanitize_for_logging("clé_secret_ü"), "***");
        assert_eq!(sanitize_for_logging("ключ_secret_значение_длинное"), "***");
    }

    #[test]
    fn test_defaults_with_required_polls() {
        let config = SentinelConfig::from_lookup(lookup(&[("GOVAI_POLL_IDS", "p1, p2,")])).unwrap();
        assert_eq!(config.poll_ids, vec!["p1", "p2"]);
        assert_eq!(config.tally_source, TallySourceKind::Backend);

        let sync = config.sync_config();
        assert_eq!(sync.poll_interval, Duration::from_secs(10));
        assert_eq!(sync.failure_threshold, 3);
        assert_eq!(sync.cooldown, Duration::from_secs(30));
        assert_eq!(sync.fetch_timeout, Duration::from_secs(8));
    }

    #[test]
    fn test_poll_ids_required() {
        assert!(SentinelConfig::from_lookup(lookup(&[])).is_err());
    }

    #[test]
    fn test_ledger_mode_needs_accounts() {
        let missing = SentinelConfig::from_lookup(lookup(&[
            ("GOVAI_POLL_IDS", "p1"),
            ("GOVAI_TALLY_SOURCE", "ledger"),
        ]));
        assert!(missing.is_err());

        let config = SentinelConfig::from_lookup(lookup(&[
            ("GOVAI_POLL_IDS", "p1"),
            ("GOVAI_TALLY_SOURCE", "ledger"),
            ("GOVAI_LEDGER_ACCOUNTS", "p1=Acc111"),
        ]))
        .unwrap();
        assert_eq!(config.ledger.accounts["p1"], "Acc111");
    }

    #[test]
    fn test_memory_mode_needs_no_accounts() {
        let config = SentinelConfig::from_lookup(lookup(&[
            ("GOVAI_POLL_IDS", "p1"),
            ("GOVAI_TALLY_SOURCE", "Memory"),
        ]))
        .unwrap();
        assert_eq!(config.tally_source, TallySourceKind::Memory);

        let empty_options = SentinelConfig::from_lookup(lookup(&[
            ("GOVAI_POLL_IDS", "p1"),
            ("GOVAI_TALLY_SOURCE", "memory"),
            ("GOVAI_LEDGER_OPTIONS", " , "),
        ]));
        assert!(empty_options.is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SentinelConfig::default();
        config.poll_ids = vec!["p1".to_string()];
        assert!(config.validate().is_ok());

        config.backend.require_https = true;
        assert!(config.validate().is_err());
        config.backend.url = "https://govai.example".to_string();
        assert!(config.validate().is_ok());

        config.sync.cooldown_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        let result = SentinelConfig::from_lookup(lookup(&[
            ("GOVAI_POLL_IDS", "p1"),
            ("GOVAI_FAILURE_THRESHOLD", "three"),
        ]));
        assert!(result.is_err());
    }
}
