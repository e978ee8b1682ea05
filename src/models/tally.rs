//! Tally snapshot models
//!
//! A `TallyReading` is what one source fetch returns. A `TallySnapshot` is
//! what the sync engine publishes: a reading plus version and freshness.
//! Snapshots are immutable values, replaced whole, never edited in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::poll::PollRecord;

/// How much a published snapshot can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Last fetch succeeded
    Fresh,
    /// Last fetch failed, data is from an earlier successful fetch
    Stale,
    /// No fetch has ever succeeded
    Unavailable,
}

/// Latest known tally for one poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TallySnapshot {
    pub poll_id: String,
    pub counts: BTreeMap<String, u64>,
    pub total: u64,
    pub taken_at: DateTime<Utc>,
    pub freshness: Freshness,
    /// Increments whenever the per-option counts change. 0 means no data.
    pub version: u64,
}

impl TallySnapshot {
    /// Placeholder published before the first successful fetch
    pub fn unavailable(poll_id: &str) -> Self {
        Self {
            poll_id: poll_id.to_string(),
            counts: BTreeMap::new(),
            total: 0,
            taken_at: Utc::now(),
            freshness: Freshness::Unavailable,
            version: 0,
        }
    }

    pub fn count(&self, option: &str) -> u64 {
        self.counts.get(option).copied().unwrap_or(0)
    }

    pub fn is_fresh(&self) -> bool {
        self.freshness == Freshness::Fresh
    }

    /// Copy of this snapshot carrying a different freshness flag.
    /// The version is kept: the counts did not change.
    pub fn with_freshness(&self, freshness: Freshness) -> Self {
        Self {
            freshness,
            ..self.clone()
        }
    }
}

/// Raw result of a single successful source fetch
#[derive(Debug, Clone, PartialEq)]
pub struct TallyReading {
    pub poll: PollRecord,
    pub counts: BTreeMap<String, u64>,
}

impl TallyReading {
    /// Build a reading with every poll option present, zero-filled.
    /// Counts for options the poll does not declare are dropped.
    pub fn new(poll: PollRecord, counts: impl IntoIterator<Item = (String, u64)>) -> Self {
        let mut normalized: BTreeMap<String, u64> =
            poll.options.iter().map(|o| (o.clone(), 0)).collect();

        for (option, count) in counts {
            if let Some(slot) = normalized.get_mut(&option) {
                *slot += count;
            }
        }

        Self {
            poll,
            counts: normalized,
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_zero_fills_and_drops_unknown() {
        let poll = PollRecord::new("p1", "q", ["yes", "no", "abstain"]);
        let reading = TallyReading::new(
            poll,
            vec![("yes".to_string(), 2), ("bogus".to_string(), 7)],
        );

        assert_eq!(reading.counts.len(), 3);
        assert_eq!(reading.counts["yes"], 2);
        assert_eq!(reading.counts["abstain"], 0);
        assert_eq!(reading.total(), 2);
    }

    #[test]
    fn test_with_freshness_keeps_version() {
        let mut snapshot = TallySnapshot::unavailable("p1");
        snapshot.version = 4;
        snapshot.freshness = Freshness::Fresh;

        let stale = snapshot.with_freshness(Freshness::Stale);
        assert_eq!(stale.version, 4);
        assert!(!stale.is_fresh());
    }
}
