//! Consensus Aggregator
//!
//! Combines the per-agent risk scores of a poll into one bounded figure:
//! `round(mean(scores))` clamped to 1..=10. Results are cached per poll and
//! tagged with the tally version they were requested for.
//!
//! A cached result is served as current only while it is not invalidated and
//! its tally version is not older than the caller's. Oracle failures never
//! surface as errors: the last result comes back marked stale, or the floor
//! value when nothing was ever computed.
//!
//! Invalidations bump a per-poll generation. A recompute that started before
//! the latest invalidation is cached as already invalidated and returned as
//! stale, so a vote landing mid-recompute still forces the next read to the
//! oracle.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::band::{Recommendation, RiskBand};
use crate::models::{AgentScore, AgentSelector, AnalysisReport, MIN_SCORE, clamp_score};
use crate::oracle::ScoringOracle;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusResult {
    pub poll_id: String,
    pub score: u8,
    pub band: RiskBand,
    pub recommendation: Recommendation,
    pub agent_count: usize,
    pub agent_scores: Vec<AgentScore>,
    pub explanation: Option<String>,
    pub computed_at: DateTime<Utc>,
    pub tally_version: u64,
}

impl ConsensusResult {
    fn from_report(report: AnalysisReport, tally_version: u64) -> Self {
        let sum: f64 = report.scores.iter().map(|s| s.score as f64).sum();
        let score = clamp_score(sum / report.scores.len() as f64);

        Self {
            poll_id: report.poll_id,
            score,
            band: RiskBand::from_score(score),
            recommendation: Recommendation::from_score(score),
            agent_count: report.scores.len(),
            agent_scores: report.scores,
            explanation: report.explanation,
            computed_at: Utc::now(),
            tally_version,
        }
    }

    fn floor(poll_id: &str, tally_version: u64) -> Self {
        Self {
            poll_id: poll_id.to_string(),
            score: MIN_SCORE,
            band: RiskBand::from_score(MIN_SCORE),
            recommendation: Recommendation::from_score(MIN_SCORE),
            agent_count: 0,
            agent_scores: Vec::new(),
            explanation: None,
            computed_at: Utc::now(),
            tally_version,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusFreshness {
    /// Computed for the caller's tally version
    Fresh,
    /// Last known result; a recompute is due or failed
    Stale,
    /// Nothing computed yet; the floor value is shown
    NoData,
}

/// What a read returns: always displayable
#[derive(Debug, Clone, Serialize)]
pub struct ConsensusView {
    pub result: ConsensusResult,
    pub freshness: ConsensusFreshness,
    pub note: Option<String>,
}

impl ConsensusView {
    pub fn is_current(&self) -> bool {
        self.freshness == ConsensusFreshness::Fresh
    }

    /// e.g. `"MINIMAL — no data yet"`
    pub fn display_label(&self) -> String {
        match &self.note {
            Some(note) => format!("{} — {}", self.result.band, note),
            None => self.result.band.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: ConsensusResult,
    invalidated: bool,
}

pub struct ConsensusAggregator {
    oracle: Arc<dyn ScoringOracle>,
    timeout: Duration,
    cache: RwLock<HashMap<String, CacheEntry>>,
    /// poll_id -> invalidation count; only changed with `cache` write-locked
    generations: Mutex<HashMap<String, u64>>,
    /// Per-poll recompute gates: concurrent readers share one oracle call
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ConsensusAggregator {
    pub fn new(oracle: Arc<dyn ScoringOracle>, timeout: Duration) -> Self {
        Self {
            oracle,
            timeout,
            cache: RwLock::new(HashMap::new()),
            generations: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Consensus for `poll_id` as of tally version `tally_version`.
    /// Recomputes through the scoring oracle when the cache is not current.
    pub async fn consensus(&self, poll_id: &str, tally_version: u64) -> ConsensusView {
        if let Some(view) = self.current(poll_id, tally_version) {
            return view;
        }

        let gate = self.gate(poll_id);
        let _guard = gate.lock().await;

        // Another reader may have finished the recompute while we waited
        if let Some(view) = self.current(poll_id, tally_version) {
            return view;
        }

        let generation = self.generation(poll_id);
        let outcome = timeout(self.timeout, self.oracle.analyze(poll_id, AgentSelector::All)).await;

        match outcome {
            Ok(Ok(report)) if !report.scores.is_empty() => {
                let result = ConsensusResult::from_report(report, tally_version);

                let superseded = {
                    let mut cache = self.cache.write();
                    let superseded = self.generation(poll_id) != generation;
                    cache.insert(
                        poll_id.to_string(),
                        CacheEntry {
                            result: result.clone(),
                            invalidated: superseded,
                        },
                    );
                    superseded
                };

                if superseded {
                    debug!(poll_id = %poll_id, "Invalidated during recompute, result kept as stale");
                    return ConsensusView {
                        result,
                        freshness: ConsensusFreshness::Stale,
                        note: Some("stale".to_string()),
                    };
                }

                info!(
                    poll_id = %poll_id,
                    score = result.score,
                    band = %result.band,
                    agents = result.agent_count,
                    tally_version = tally_version,
                    "Consensus recomputed"
                );

                ConsensusView {
                    result,
                    freshness: ConsensusFreshness::Fresh,
                    note: None,
                }
            }
            Ok(Ok(_)) => {
                warn!(poll_id = %poll_id, "Scoring oracle returned no agent scores");
                self.fallback(poll_id, tally_version)
            }
            Ok(Err(e)) => {
                warn!(poll_id = %poll_id, "Scoring oracle call failed: {:#}", e);
                self.fallback(poll_id, tally_version)
            }
            Err(_) => {
                warn!(
                    poll_id = %poll_id,
                    timeout_secs = self.timeout.as_secs(),
                    "Scoring oracle call timed out"
                );
                self.fallback(poll_id, tally_version)
            }
        }
    }

    /// Force the next read of `poll_id` to go to the scoring oracle.
    /// Returns whether a cached result existed.
    pub fn invalidate(&self, poll_id: &str) -> bool {
        let mut cache = self.cache.write();
        *self.generations.lock().entry(poll_id.to_string()).or_insert(0) += 1;

        match cache.get_mut(poll_id) {
            Some(entry) => {
                entry.invalidated = true;
                debug!(poll_id = %poll_id, "Consensus cache invalidated");
                true
            }
            None => false,
        }
    }

    fn current(&self, poll_id: &str, tally_version: u64) -> Option<ConsensusView> {
        let cache = self.cache.read();
        let entry = cache.get(poll_id)?;

        if entry.invalidated || entry.result.tally_version < tally_version {
            return None;
        }

        Some(ConsensusView {
            result: entry.result.clone(),
            freshness: ConsensusFreshness::Fresh,
            note: None,
        })
    }

    fn fallback(&self, poll_id: &str, tally_version: u64) -> ConsensusView {
        if let Some(entry) = self.cache.read().get(poll_id) {
            return ConsensusView {
                result: entry.result.clone(),
                freshness: ConsensusFreshness::Stale,
                note: Some("stale".to_string()),
            };
        }

        ConsensusView {
            result: ConsensusResult::floor(poll_id, tally_version),
            freshness: ConsensusFreshness::NoData,
            note: Some("no data yet".to_string()),
        }
    }

    fn generation(&self, poll_id: &str) -> u64 {
        self.generations.lock().get(poll_id).copied().unwrap_or(0)
    }

    fn gate(&self, poll_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.gates
            .lock()
            .entry(poll_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AgentKind;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeOracle {
        scores: Vec<f64>,
        down: AtomicBool,
        slow: AtomicBool,
        calls: AtomicUsize,
    }

    impl FakeOracle {
        fn new(scores: &[f64]) -> Arc<Self> {
            Arc::new(Self {
                scores: scores.to_vec(),
                down: AtomicBool::new(false),
                slow: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ScoringOracle for FakeOracle {
        async fn analyze(&self, poll_id: &str, _agents: AgentSelector) -> Result<AnalysisReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.slow.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            if self.down.load(Ordering::SeqCst) {
                return Err(anyhow::anyhow!("connection refused"));
            }
            Ok(AnalysisReport {
                poll_id: poll_id.to_string(),
                scores: self
                    .scores
                    .iter()
                    .map(|s| AgentScore::new(AgentKind::WhaleWatch, *s))
                    .collect(),
                ..Default::default()
            })
        }
    }

    fn aggregator(oracle: Arc<FakeOracle>) -> ConsensusAggregator {
        ConsensusAggregator::new(oracle, Duration::from_secs(8))
    }

    #[tokio::test]
    async fn test_mean_is_rounded_and_banded() {
        let oracle = FakeOracle::new(&[8.0, 3.0]);
        let view = aggregator(oracle).consensus("p1", 1).await;

        assert!(view.is_current());
        assert_eq!(view.result.score, 6);
        assert_eq!(view.result.band, RiskBand::Moderate);
        assert_eq!(view.result.agent_count, 2);
        assert_eq!(view.result.tally_version, 1);
    }

    #[tokio::test]
    async fn test_no_data_reports_floor() {
        let oracle = FakeOracle::new(&[]);
        let view = aggregator(oracle).consensus("p1", 0).await;

        assert_eq!(view.freshness, ConsensusFreshness::NoData);
        assert_eq!(view.result.score, 1);
        assert_eq!(view.display_label(), "MINIMAL — no data yet");
    }

    #[tokio::test]
    async fn test_cache_served_until_invalidated() {
        let oracle = FakeOracle::new(&[4.0]);
        let agg = aggregator(oracle.clone());

        agg.consensus("p1", 1).await;
        agg.consensus("p1", 1).await;
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);

        assert!(agg.invalidate("p1"));
        agg.consensus("p1", 1).await;
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 2);

        agg.consensus("p1", 2).await;
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_oracle_failure_serves_stale() {
        let oracle = FakeOracle::new(&[9.0]);
        let agg = aggregator(oracle.clone());
        agg.consensus("p1", 1).await;

        oracle.down.store(true, Ordering::SeqCst);
        agg.invalidate("p1");
        let view = agg.consensus("p1", 2).await;

        assert_eq!(view.freshness, ConsensusFreshness::Stale);
        assert!(!view.is_current());
        assert_eq!(view.result.score, 9);
        assert_eq!(view.result.tally_version, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidation_during_recompute_is_kept() {
        let oracle = FakeOracle::new(&[5.0]);
        let agg = Arc::new(aggregator(oracle.clone()));
        agg.consensus("p1", 1).await;

        oracle.slow.store(true, Ordering::SeqCst);
        agg.invalidate("p1");
        let reader = {
            let agg = agg.clone();
            tokio::spawn(async move { agg.consensus("p1", 2).await })
        };

        // A vote lands while the oracle call is in flight
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(agg.invalidate("p1"));

        let during = reader.await.unwrap();
        assert_eq!(during.freshness, ConsensusFreshness::Stale);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 2);

        let after = agg.consensus("p1", 2).await;
        assert!(after.is_current());
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidation_before_first_result_is_kept() {
        let oracle = FakeOracle::new(&[5.0]);
        oracle.slow.store(true, Ordering::SeqCst);
        let agg = Arc::new(aggregator(oracle.clone()));

        let reader = {
            let agg = agg.clone();
            tokio::spawn(async move { agg.consensus("p1", 1).await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!agg.invalidate("p1"));

        assert!(!reader.await.unwrap().is_current());
        assert!(agg.consensus("p1", 1).await.is_current());
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 2);
    }
}
