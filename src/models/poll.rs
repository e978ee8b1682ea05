//! Poll and vote records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A governance poll as published by the polling backend.
///
/// Immutable once created. `options` is already normalized: option
/// identifiers in display order, no blanks, no duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollRecord {
    pub poll_id: String,
    pub question: String,
    pub options: Vec<String>,
    pub description: Option<String>,
}

impl PollRecord {
    pub fn new(
        poll_id: impl Into<String>,
        question: impl Into<String>,
        options: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut normalized: Vec<String> = Vec::new();
        for option in options {
            let option = option.into().trim().to_string();
            if !option.is_empty() && !normalized.contains(&option) {
                normalized.push(option);
            }
        }

        Self {
            poll_id: poll_id.into(),
            question: question.into(),
            options: normalized,
            description: None,
        }
    }

    /// Whether `option` is one of this poll's option identifiers
    pub fn accepts(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }
}

/// A voter's active vote on a poll. Unique on (poll_id, voter).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub poll_id: String,
    pub voter: String,
    pub option: String,
    pub signature: String,
    pub wallet_age_days: Option<u32>,
    pub balance: Option<f64>,
    pub submitted_at: DateTime<Utc>,
}

/// How the vote backend classified a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteAction {
    /// First vote by this voter on this poll
    #[serde(alias = "recorded")]
    New,
    /// Existing vote overwritten with a different option
    Changed,
    /// Same option resubmitted; nothing counted twice
    Unchanged,
}

impl VoteAction {
    /// Whether the tally may have moved because of this vote
    pub fn mutates_tally(&self) -> bool {
        !matches!(self, VoteAction::Unchanged)
    }
}
