//! Source Oracle Client
//!
//! Fetches the raw tally of one poll from the polling backend. Single-shot:
//! it never retries, the sync engine decides what a failure means.
//!
//! The backend is loosely typed: a poll's `options` may arrive as a JSON
//! list, a JSON-encoded string or a comma-separated string. All three are
//! normalized here into `PollRecord::options`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::http::{OracleHttpClient, endpoint};
use crate::models::{PollRecord, TallyReading};

/// Anything that can produce the current tally of a poll
#[async_trait]
pub trait TallySource: Send + Sync {
    async fn fetch_tally(&self, poll_id: &str) -> Result<TallyReading>;
}

/// Reads tallies from `GET {backend}/api/polls/{poll_id}`
pub struct BackendTallySource {
    http: OracleHttpClient,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct PollDetailsResponse {
    poll: RawPoll,
    #[serde(default)]
    votes: Vec<RawVote>,
}

#[derive(Debug, Deserialize)]
struct RawPoll {
    poll_id: Option<String>,
    #[serde(default)]
    question: String,
    #[serde(default)]
    options: Value,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawVote {
    vote_option: String,
}

impl BackendTallySource {
    pub fn new(http: OracleHttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl TallySource for BackendTallySource {
    async fn fetch_tally(&self, poll_id: &str) -> Result<TallyReading> {
        let url = endpoint(&self.base_url, &format!("/api/polls/{}", poll_id));
        let details: PollDetailsResponse = self
            .http
            .get_json(&url)
            .await
            .with_context(|| format!("Failed to fetch tally for poll {}", poll_id))?;

        reading_from_details(poll_id, details)
    }
}

fn reading_from_details(poll_id: &str, details: PollDetailsResponse) -> Result<TallyReading> {
    let options = normalize_options(&details.poll.options)
        .with_context(|| format!("Malformed options for poll {}", poll_id))?;

    let mut poll = PollRecord::new(
        details.poll.poll_id.unwrap_or_else(|| poll_id.to_string()),
        details.poll.question,
        options,
    );
    poll.description = details.poll.description;

    let mut counts: HashMap<String, u64> = HashMap::new();
    for vote in details.votes {
        if poll.accepts(&vote.vote_option) {
            *counts.entry(vote.vote_option).or_insert(0) += 1;
        } else {
            warn!(
                poll_id = %poll_id,
                option = %vote.vote_option,
                "Ignoring vote for unknown option"
            );
        }
    }

    let reading = TallyReading::new(poll, counts);
    debug!(poll_id = %poll_id, total = reading.total(), "Fetched tally");
    Ok(reading)
}

/// Normalize the backend's option representations into a list of ids
pub fn normalize_options(raw: &Value) -> Result<Vec<String>> {
    let options: Vec<String> = match raw {
        Value::Array(items) => items.iter().filter_map(option_id).collect(),
        Value::String(s) => {
            let trimmed = s.trim();
            let parsed = if trimmed.starts_with('[') {
                serde_json::from_str::<Vec<Value>>(trimmed)
                    .map_err(|e| warn!("Options string is not a JSON list ({}), splitting on commas", e))
                    .ok()
            } else {
                None
            };

            match parsed {
                Some(items) => items.iter().filter_map(option_id).collect(),
                None => trimmed.split(',').map(|o| o.trim().to_string()).collect(),
            }
        }
        other => {
            return Err(anyhow::anyhow!("Unsupported options representation: {}", other));
        }
    };

    let options: Vec<String> = options.into_iter().filter(|o| !o.is_empty()).collect();
    if options.is_empty() {
        return Err(anyhow::anyhow!("Poll declares no options"));
    }
    Ok(options)
}

fn option_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
