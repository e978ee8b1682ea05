//! Tally Sync Engine
//!
//! Runs one polling loop per monitored poll against a `TallySource` and
//! publishes the latest known-good `TallySnapshot`.
//!
//! Each loop is a single task driven by one `select!`: the shutdown signal,
//! the next-fetch timer and (while the circuit is closed) out-of-band refresh
//! requests. A fetch is awaited inline, so a poll never has two fetches
//! outstanding. Refresh requests go through a capacity-1 channel and coalesce.

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, error, info, warn};

use super::circuit::{CircuitState, SyncConfig, SyncState, log_transition};
use crate::models::{Freshness, PollRecord, TallyReading, TallySnapshot};
use crate::oracle::TallySource;

/// Point-in-time view of one poll's sync loop
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub poll_id: String,
    pub circuit: CircuitState,
    pub consecutive_failures: u32,
    /// When the next probe is due while the circuit is open
    pub open_until: Option<DateTime<Utc>>,
    pub freshness: Freshness,
    pub version: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub fetches: u64,
}

struct Worker {
    refresh: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// State shared between the engine handle and its poll loops
struct Shared {
    snapshots: RwLock<HashMap<String, Arc<TallySnapshot>>>,
    polls: RwLock<HashMap<String, PollRecord>>,
    statuses: RwLock<HashMap<String, SyncStatus>>,
    updates: broadcast::Sender<Arc<TallySnapshot>>,
}

impl Shared {
    fn publish_reading(&self, poll_id: &str, reading: TallyReading) {
        let total = reading.total();
        let snapshot = {
            let mut snapshots = self.snapshots.write();
            let version = match snapshots.get(poll_id) {
                Some(previous) if previous.version > 0 && previous.counts == reading.counts => {
                    previous.version
                }
                Some(previous) => previous.version + 1,
                None => 1,
            };

            let snapshot = Arc::new(TallySnapshot {
                poll_id: poll_id.to_string(),
                counts: reading.counts,
                total,
                taken_at: Utc::now(),
                freshness: Freshness::Fresh,
                version,
            });
            snapshots.insert(poll_id.to_string(), snapshot.clone());
            snapshot
        };

        self.polls.write().insert(poll_id.to_string(), reading.poll);
        let _ = self.updates.send(snapshot);
    }

    fn mark_failed(&self, poll_id: &str) {
        let degraded = {
            let mut snapshots = self.snapshots.write();
            let current = snapshots
                .get(poll_id)
                .cloned()
                .unwrap_or_else(|| Arc::new(TallySnapshot::unavailable(poll_id)));

            let freshness = if current.version == 0 {
                Freshness::Unavailable
            } else {
                Freshness::Stale
            };

            if current.freshness == freshness {
                return;
            }

            let degraded = Arc::new(current.with_freshness(freshness));
            snapshots.insert(poll_id.to_string(), degraded.clone());
            degraded
        };

        let _ = self.updates.send(degraded);
    }

    fn record_status(&self, poll_id: &str, state: &SyncState, succeeded: bool) {
        let (freshness, version) = self
            .snapshots
            .read()
            .get(poll_id)
            .map(|s| (s.freshness, s.version))
            .unwrap_or((Freshness::Unavailable, 0));

        let mut statuses = self.statuses.write();
        let status = statuses
            .entry(poll_id.to_string())
            .or_insert_with(|| SyncStatus {
                poll_id: poll_id.to_string(),
                circuit: CircuitState::Closed,
                consecutive_failures: 0,
                open_until: None,
                freshness: Freshness::Unavailable,
                version: 0,
                last_success_at: None,
                fetches: 0,
            });

        status.circuit = state.circuit;
        status.consecutive_failures = state.consecutive_failures;
        status.open_until = state.open_until.map(|until| {
            let remaining = until.saturating_duration_since(Instant::now());
            Utc::now() + chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero())
        });
        status.freshness = freshness;
        status.version = version;
        status.fetches += 1;
        if succeeded {
            status.last_success_at = Some(Utc::now());
        }
    }
}

pub struct SyncEngine {
    source: Arc<dyn TallySource>,
    config: SyncConfig,
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    workers: Mutex<HashMap<String, Worker>>,
}

impl SyncEngine {
    pub fn new(source: Arc<dyn TallySource>, config: SyncConfig) -> Self {
        let (updates, _) = broadcast::channel(256);
        let (shutdown, _) = watch::channel(false);

        Self {
            source,
            config,
            shared: Arc::new(Shared {
                snapshots: RwLock::new(HashMap::new()),
                polls: RwLock::new(HashMap::new()),
                statuses: RwLock::new(HashMap::new()),
                updates,
            }),
            shutdown,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Start monitoring every poll in `poll_ids`
    pub fn start<I, S>(&self, poll_ids: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for poll_id in poll_ids {
            self.watch(poll_id.as_ref())?;
        }
        Ok(())
    }

    /// Start a polling loop for one poll. Watching a poll twice is a no-op.
    pub fn watch(&self, poll_id: &str) -> Result<()> {
        if *self.shutdown.borrow() {
            return Err(anyhow::anyhow!("Sync engine has been stopped"));
        }

        let mut workers = self.workers.lock();
        if workers.contains_key(poll_id) {
            return Ok(());
        }

        self.shared
            .snapshots
            .write()
            .entry(poll_id.to_string())
            .or_insert_with(|| Arc::new(TallySnapshot::unavailable(poll_id)));

        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let poll_loop = PollLoop {
            poll_id: poll_id.to_string(),
            source: self.source.clone(),
            config: self.config.clone(),
            shared: self.shared.clone(),
            refresh: refresh_rx,
            shutdown: self.shutdown.subscribe(),
        };

        let handle = tokio::spawn(poll_loop.run());
        workers.insert(
            poll_id.to_string(),
            Worker {
                refresh: refresh_tx,
                handle,
            },
        );

        info!(poll_id = %poll_id, "Watching poll");
        Ok(())
    }

    /// Stop every loop. Pending timers are cancelled; a fetch that completes
    /// after this call is discarded.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);

        let workers: Vec<Worker> = self.workers.lock().drain().map(|(_, w)| w).collect();
        let handles = workers.into_iter().map(|w| w.handle);

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!("Poll loop terminated abnormally: {}", e);
            }
        }

        info!("Sync engine stopped");
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Ask for an immediate fetch. Coalesces with an already pending request
    /// and is ignored while the circuit is open. Returns false when the poll
    /// is not watched.
    pub fn request_refresh(&self, poll_id: &str) -> bool {
        let workers = self.workers.lock();
        let Some(worker) = workers.get(poll_id) else {
            return false;
        };

        match worker.refresh.try_send(()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!(poll_id = %poll_id, "Refresh already pending, coalesced");
                true
            }
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }

    /// Latest published snapshot
    pub fn snapshot(&self, poll_id: &str) -> Option<Arc<TallySnapshot>> {
        self.shared.snapshots.read().get(poll_id).cloned()
    }

    /// Poll metadata from the last successful fetch
    pub fn poll_record(&self, poll_id: &str) -> Option<PollRecord> {
        self.shared.polls.read().get(poll_id).cloned()
    }

    pub fn status(&self, poll_id: &str) -> Option<SyncStatus> {
        self.shared.statuses.read().get(poll_id).cloned()
    }

    pub fn watched_polls(&self) -> Vec<String> {
        let mut polls: Vec<String> = self.workers.lock().keys().cloned().collect();
        polls.sort();
        polls
    }

    /// Every snapshot replacement, including freshness downgrades
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<TallySnapshot>> {
        self.shared.updates.subscribe()
    }
}

struct PollLoop {
    poll_id: String,
    source: Arc<dyn TallySource>,
    config: SyncConfig,
    shared: Arc<Shared>,
    refresh: mpsc::Receiver<()>,
    shutdown: watch::Receiver<bool>,
}

impl PollLoop {
    async fn run(mut self) {
        let mut state = SyncState::new(Instant::now());

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let due = state.next_fetch_at;
            let accept_refresh = !state.is_open();

            tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                _ = sleep_until(due) => {}
                Some(()) = self.refresh.recv(), if accept_refresh => {
                    debug!(poll_id = %self.poll_id, "Out-of-band refresh");
                }
            }

            if *self.shutdown.borrow() {
                break;
            }

            state.begin_probe();
            // Requests queued so far are satisfied by this fetch
            while self.refresh.try_recv().is_ok() {}

            let outcome = timeout(self.config.fetch_timeout, self.source.fetch_tally(&self.poll_id)).await;

            if *self.shutdown.borrow() {
                debug!(poll_id = %self.poll_id, "Engine stopped during fetch, result discarded");
                break;
            }

            let now = Instant::now();
            let (transition, succeeded) = match outcome {
                Ok(Ok(reading)) => {
                    self.shared.publish_reading(&self.poll_id, reading);
                    (state.record_success(now, &self.config), true)
                }
                Ok(Err(e)) => {
                    warn!(poll_id = %self.poll_id, "Tally fetch failed: {:#}", e);
                    self.shared.mark_failed(&self.poll_id);
                    (state.record_failure(now, &self.config), false)
                }
                Err(_) => {
                    warn!(
                        poll_id = %self.poll_id,
                        timeout_secs = self.config.fetch_timeout.as_secs(),
                        "Tally fetch timed out"
                    );
                    self.shared.mark_failed(&self.poll_id);
                    (state.record_failure(now, &self.config), false)
                }
            };

            log_transition(&self.poll_id, transition, &state, &self.config);
            self.shared.record_status(&self.poll_id, &state, succeeded);
        }

        debug!(poll_id = %self.poll_id, "Poll loop exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Source replaying scripted outcomes; `true` succeeds with `yes` votes
    /// equal to the call number.
    struct ScriptedSource {
        script: Mutex<VecDeque<bool>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(script: &[bool]) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TallySource for ScriptedSource {
        async fn fetch_tally(&self, poll_id: &str) -> Result<TallyReading> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as u64 + 1;
            let ok = self.script.lock().pop_front().unwrap_or(true);
            if !ok {
                return Err(anyhow::anyhow!("upstream down"));
            }
            let poll = PollRecord::new(poll_id, "q", ["yes", "no"]);
            Ok(TallyReading::new(poll, vec![("yes".to_string(), call)]))
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_fetch_is_immediate() {
        let source = ScriptedSource::new(&[true]);
        let engine = SyncEngine::new(source.clone(), SyncConfig::default());
        engine.watch("p1").unwrap();
        settle().await;

        let snapshot = engine.snapshot("p1").unwrap();
        assert_eq!(snapshot.freshness, Freshness::Fresh);
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.count("yes"), 1);
        assert_eq!(engine.poll_record("p1").unwrap().options, vec!["yes", "no"]);
        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_before_any_success_is_unavailable() {
        let source = ScriptedSource::new(&[false]);
        let engine = SyncEngine::new(source, SyncConfig::default());
        engine.watch("p1").unwrap();
        settle().await;

        let snapshot = engine.snapshot("p1").unwrap();
        assert_eq!(snapshot.freshness, Freshness::Unavailable);
        assert_eq!(engine.status("p1").unwrap().consecutive_failures, 1);
        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_after_success_keeps_stale_data() {
        let source = ScriptedSource::new(&[true, false]);
        let engine = SyncEngine::new(source, SyncConfig::default());
        engine.watch("p1").unwrap();
        settle().await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;

        let snapshot = engine.snapshot("p1").unwrap();
        assert_eq!(snapshot.freshness, Freshness::Stale);
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.count("yes"), 1);
        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_coalesces() {
        let source = ScriptedSource::new(&[]);
        let engine = SyncEngine::new(source.clone(), SyncConfig::default());
        engine.watch("p1").unwrap();
        settle().await;
        assert_eq!(source.calls(), 1);

        assert!(engine.request_refresh("p1"));
        assert!(engine.request_refresh("p1"));
        assert!(engine.request_refresh("p1"));
        settle().await;

        assert_eq!(source.calls(), 2);
        assert!(!engine.request_refresh("unknown"));
        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_timer() {
        let source = ScriptedSource::new(&[]);
        let engine = SyncEngine::new(source.clone(), SyncConfig::default());
        engine.watch("p1").unwrap();
        settle().await;
        engine.stop().await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(source.calls(), 1);
        assert!(engine.watch("p2").is_err());
    }
}
