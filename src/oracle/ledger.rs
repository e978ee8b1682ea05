//! Ledger JSON-RPC access
//!
//! Reads on-chain tally accounts and wallet account info from a Solana-style
//! JSON-RPC endpoint. The tally account layout is four little-endian u64
//! values: `total, option_1, option_2, option_3`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::http::OracleHttpClient;
use super::source::TallySource;
use crate::models::{PollRecord, TallyReading};
use crate::wallet::AccountInfoSource;

const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;
const TALLY_ACCOUNT_LEN: usize = 32;
const SIGNATURE_HISTORY_LIMIT: u32 = 1000;

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct AccountValue {
    data: (String, String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureInfo {
    block_time: Option<i64>,
}

/// Minimal JSON-RPC client for the ledger endpoint
#[derive(Clone)]
pub struct LedgerRpcClient {
    http: OracleHttpClient,
    rpc_url: String,
    next_id: std::sync::Arc<AtomicU64>,
}

impl LedgerRpcClient {
    pub fn new(http: OracleHttpClient, rpc_url: impl Into<String>) -> Self {
        Self {
            http,
            rpc_url: rpc_url.into(),
            next_id: std::sync::Arc::new(AtomicU64::new(1)),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let response: RpcResponse<T> = self
            .http
            .post_json(&self.rpc_url, &request)
            .await
            .with_context(|| format!("RPC call {} failed", method))?;

        if let Some(error) = response.error {
            return Err(anyhow::anyhow!(
                "RPC {} returned error {}: {}",
                method,
                error.code,
                error.message
            ));
        }

        response
            .result
            .ok_or_else(|| anyhow::anyhow!("RPC {} returned no result", method))
    }

    /// Raw account data, or None when the account does not exist
    pub async fn account_data(&self, account: &str) -> Result<Option<Vec<u8>>> {
        let info: WithContext<Option<AccountValue>> = self
            .call(
                "getAccountInfo",
                json!([account, {"encoding": "base64", "commitment": "confirmed"}]),
            )
            .await?;

        match info.value {
            Some(value) => {
                let bytes = STANDARD
                    .decode(value.data.0)
                    .context("Account data is not valid base64")?;
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }

    pub async fn balance_sol(&self, address: &str) -> Result<f64> {
        let balance: WithContext<u64> = self.call("getBalance", json!([address])).await?;
        Ok(balance.value as f64 / LAMPORTS_PER_SOL)
    }

    /// Unix time of the oldest transaction in the recent history window
    pub async fn oldest_activity(&self, address: &str) -> Result<Option<i64>> {
        let signatures: Vec<SignatureInfo> = self
            .call(
                "getSignaturesForAddress",
                json!([address, {"limit": SIGNATURE_HISTORY_LIMIT}]),
            )
            .await?;

        Ok(signatures.last().and_then(|s| s.block_time))
    }
}

#[async_trait]
impl AccountInfoSource for LedgerRpcClient {
    async fn balance(&self, address: &str) -> f64 {
        match self.balance_sol(address).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!("Could not fetch wallet balance: {}", e);
                0.0
            }
        }
    }

    async fn age_days(&self, address: &str) -> u32 {
        match self.oldest_activity(address).await {
            Ok(Some(block_time)) => age_in_days(block_time, Utc::now().timestamp()),
            Ok(None) => 0,
            Err(e) => {
                warn!("Could not fetch wallet age: {}", e);
                0
            }
        }
    }
}

fn age_in_days(oldest: i64, now: i64) -> u32 {
    ((now - oldest).max(0) / 86_400) as u32
}

/// Decode an on-chain tally account into `(total, per-option counts)`
pub fn decode_tally_account(data: &[u8]) -> Result<(u64, [u64; 3])> {
    if data.len() < TALLY_ACCOUNT_LEN {
        return Err(anyhow::anyhow!(
            "Tally account too short: {} bytes (need {})",
            data.len(),
            TALLY_ACCOUNT_LEN
        ));
    }

    let read = |offset: usize| -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&data[offset..offset + 8]);
        u64::from_le_bytes(bytes)
    };

    Ok((read(0), [read(8), read(16), read(24)]))
}

/// Reads tallies straight from on-chain poll accounts
pub struct LedgerTallySource {
    rpc: LedgerRpcClient,
    /// poll_id -> (poll, account address)
    polls: HashMap<String, (PollRecord, String)>,
}

impl LedgerTallySource {
    pub fn new(rpc: LedgerRpcClient) -> Self {
        Self {
            rpc,
            polls: HashMap::new(),
        }
    }

    /// Register the account backing a poll. Only the first three options
    /// have on-chain counters.
    pub fn with_poll(mut self, poll: PollRecord, account: impl Into<String>) -> Self {
        self.polls
            .insert(poll.poll_id.clone(), (poll, account.into()));
        self
    }
}

#[async_trait]
impl TallySource for LedgerTallySource {
    async fn fetch_tally(&self, poll_id: &str) -> Result<TallyReading> {
        let (poll, account) = self
            .polls
            .get(poll_id)
            .ok_or_else(|| anyhow::anyhow!("No ledger account configured for poll {}", poll_id))?;

        let data = self
            .rpc
            .account_data(account)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Poll account not found: {}", account))?;

        let (total, option_counts) = decode_tally_account(&data)?;

        let counts: Vec<(String, u64)> = poll
            .options
            .iter()
            .cloned()
            .zip(option_counts)
            .collect();
        let reading = TallyReading::new(poll.clone(), counts);

        if reading.total() != total {
            warn!(
                poll_id = %poll_id,
                account_total = total,
                summed_total = reading.total(),
                "On-chain total disagrees with option counters"
            );
        }

        debug!(poll_id = %poll_id, total = reading.total(), "Fetched on-chain tally");
        Ok(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account_bytes(values: [u64; 4]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_decode_tally_account() {
        let data = account_bytes([6, 3, 2, 1]);
        let (total, counts) = decode_tally_account(&data).unwrap();
        assert_eq!(total, 6);
        assert_eq!(counts, [3, 2, 1]);
    }

    #[test]
    fn test_decode_rejects_short_account() {
        assert!(decode_tally_account(&[0u8; 31]).is_err());
    }

    #[test]
    fn test_age_in_days() {
        assert_eq!(age_in_days(0, 86_400 * 3 + 5), 3);
        assert_eq!(age_in_days(100, 50), 0);
    }

    #[test]
    fn test_rpc_account_shape() {
        let raw = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "context": {"slot": 1},
                "value": {"data": [STANDARD.encode(account_bytes([1, 1, 0, 0])), "base64"]}
            }
        });
        let parsed: RpcResponse<WithContext<Option<AccountValue>>> =
            serde_json::from_value(raw).unwrap();
        let value = parsed.result.unwrap().value.unwrap();
        assert_eq!(STANDARD.decode(value.data.0).unwrap().len(), 32);
    }
}
