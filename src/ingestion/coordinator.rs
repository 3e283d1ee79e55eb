//! Ingestion coordination: per-debate mutual exclusion and batch populate.
//!
//! Every debate id moves through a small state machine: not indexed,
//! in flight, indexed, or failed. The claim step is atomic under one lock,
//! so two callers asking for the same id produce exactly one fetch; the
//! loser awaits the winner's outcome over a watch channel. Failed ids are
//! re-enterable: a later claim simply tries again.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::ContributionSource;
use crate::ingestion::indexer::DebateIndexer;
use crate::ingestion::scheduler::TaskScheduler;
use crate::stores::Backend;
use crate::types::RagError;

/// Outcome of a blocking populate call.
#[derive(Clone, Debug, Serialize)]
pub struct PopulateSummary {
    /// Ids now present in the store, whether indexed by this call, by a
    /// concurrent caller, or previously.
    pub indexed: usize,
    /// Ids that could not be indexed, left re-enterable.
    pub failed: Vec<String>,
}

/// Point-in-time view of ingestion progress.
#[derive(Clone, Debug, Serialize)]
pub struct IndexStatus {
    pub record_count: usize,
    pub in_flight: Vec<String>,
    pub indexed: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Default)]
struct IndexState {
    /// Receivers resolve to `Some(success)` when the owning claim completes.
    in_flight: HashMap<String, watch::Receiver<Option<bool>>>,
    indexed: HashSet<String>,
    failed: HashSet<String>,
}

enum Claim {
    /// Caller owns the id and must call `complete` with this sender.
    Claimed(watch::Sender<Option<bool>>),
    /// Another caller owns the id; await its outcome here.
    InFlight(watch::Receiver<Option<bool>>),
    AlreadyIndexed,
}

/// Shared entry point for all ingestion: fire-and-forget triggers, blocking
/// populates, and periodic discovery polling.
#[derive(Clone)]
pub struct IngestionCoordinator {
    indexer: Arc<DebateIndexer>,
    scheduler: Arc<TaskScheduler>,
    store: Arc<dyn Backend>,
    state: Arc<Mutex<IndexState>>,
}

impl IngestionCoordinator {
    pub fn new(
        indexer: Arc<DebateIndexer>,
        scheduler: Arc<TaskScheduler>,
        store: Arc<dyn Backend>,
    ) -> Self {
        Self {
            indexer,
            scheduler,
            store,
            state: Arc::new(Mutex::new(IndexState::default())),
        }
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// Atomically claims an id. A failed id is cleared on claim so the new
    /// attempt starts fresh.
    fn claim(&self, ext_id: &str) -> Claim {
        let mut state = self.state.lock();
        if state.indexed.contains(ext_id) {
            return Claim::AlreadyIndexed;
        }
        if let Some(rx) = state.in_flight.get(ext_id) {
            // A dropped sender means the owning task died without ever
            // completing (aborted at shutdown). Its entry is stale:
            // reclaim the id rather than wait on an outcome that will
            // never arrive.
            if rx.has_changed().is_ok() {
                return Claim::InFlight(rx.clone());
            }
            state.in_flight.remove(ext_id);
        }
        state.failed.remove(ext_id);
        let (tx, rx) = watch::channel(None);
        state.in_flight.insert(ext_id.to_string(), rx);
        Claim::Claimed(tx)
    }

    /// Records the outcome of a claimed id and wakes any waiters.
    fn complete(&self, ext_id: &str, success: bool, tx: watch::Sender<Option<bool>>) {
        {
            let mut state = self.state.lock();
            state.in_flight.remove(ext_id);
            if success {
                state.indexed.insert(ext_id.to_string());
            } else {
                state.failed.insert(ext_id.to_string());
            }
        }
        let _ = tx.send(Some(success));
    }

    async fn run_claimed(&self, ext_id: String, tx: watch::Sender<Option<bool>>) -> bool {
        let cancel = self.scheduler.cancel_signal();
        let result = self.indexer.index_debate(&ext_id, &cancel).await;
        let success = match &result {
            Ok(outcome) => {
                debug!(
                    ext_id,
                    written = outcome.chunks_written,
                    skipped = outcome.chunks_skipped,
                    "indexing complete"
                );
                true
            }
            Err(err) => {
                warn!(ext_id, error = %err, "indexing failed");
                false
            }
        };
        self.complete(&ext_id, success, tx);
        success
    }

    /// Awaits the outcome of someone else's in-flight claim. A dropped
    /// sender (task aborted mid-flight) counts as failure.
    async fn await_in_flight(mut rx: watch::Receiver<Option<bool>>) -> bool {
        loop {
            if let Some(success) = *rx.borrow() {
                return success;
            }
            if rx.changed().await.is_err() {
                return false;
            }
        }
    }

    /// Starts background indexing for each id not already indexed or in
    /// flight. Returns the number of tasks started.
    pub fn trigger(&self, ext_ids: impl IntoIterator<Item = String>) -> usize {
        let mut started = 0usize;
        let mut seen = HashSet::new();
        for ext_id in ext_ids {
            if !seen.insert(ext_id.clone()) {
                continue;
            }
            let Claim::Claimed(tx) = self.claim(&ext_id) else {
                continue;
            };
            let coordinator = self.clone();
            let task_id = ext_id.clone();
            self.scheduler
                .fire_and_forget(format!("index:{ext_id}"), async move {
                    if coordinator.run_claimed(task_id.clone(), tx).await {
                        Ok(())
                    } else {
                        Err(RagError::Fetch(format!("indexing {task_id} failed")))
                    }
                });
            started += 1;
        }
        started
    }

    /// Indexes every id, blocking until all outcomes are known. Ids another
    /// caller is already indexing are awaited, not refetched.
    pub async fn populate(&self, ext_ids: impl IntoIterator<Item = String>) -> PopulateSummary {
        let mut seen = HashSet::new();
        let mut outcomes = Vec::new();

        for ext_id in ext_ids {
            if !seen.insert(ext_id.clone()) {
                continue;
            }
            let claim = self.claim(&ext_id);
            let coordinator = self.clone();
            outcomes.push(async move {
                let success = match claim {
                    Claim::AlreadyIndexed => true,
                    Claim::Claimed(tx) => coordinator.run_claimed(ext_id.clone(), tx).await,
                    Claim::InFlight(rx) => Self::await_in_flight(rx).await,
                };
                (ext_id, success)
            });
        }

        let mut summary = PopulateSummary {
            indexed: 0,
            failed: Vec::new(),
        };
        for (ext_id, success) in join_all(outcomes).await {
            if success {
                summary.indexed += 1;
            } else {
                summary.failed.push(ext_id);
            }
        }
        summary.failed.sort();
        info!(
            indexed = summary.indexed,
            failed = summary.failed.len(),
            "populate finished"
        );
        summary
    }

    /// Snapshot of the state machine plus the store's record count.
    /// In-flight entries whose task was aborted before completing are
    /// swept to failed here, keeping them re-enterable.
    pub async fn status(&self) -> Result<IndexStatus, RagError> {
        let record_count = self.store.count().await?;
        let mut state = self.state.lock();
        let abandoned: Vec<String> = state
            .in_flight
            .iter()
            .filter(|(_, rx)| rx.has_changed().is_err())
            .map(|(ext_id, _)| ext_id.clone())
            .collect();
        for ext_id in abandoned {
            state.in_flight.remove(&ext_id);
            state.failed.insert(ext_id);
        }
        let mut status = IndexStatus {
            record_count,
            in_flight: state.in_flight.keys().cloned().collect(),
            indexed: state.indexed.iter().cloned().collect(),
            failed: state.failed.iter().cloned().collect(),
        };
        status.in_flight.sort();
        status.indexed.sort();
        status.failed.sort();
        Ok(status)
    }

    #[cfg(test)]
    fn insert_dead_in_flight(&self, ext_id: &str) {
        let (tx, rx) = watch::channel(None);
        self.state.lock().in_flight.insert(ext_id.to_string(), rx);
        drop(tx);
    }

    /// Polls each member's contribution summary on a fixed period and
    /// triggers indexing for every debate discovered.
    pub fn spawn_contribution_poller(
        &self,
        source: Arc<dyn ContributionSource>,
        member_ids: Vec<i64>,
        period: Duration,
    ) {
        let coordinator = self.clone();
        self.scheduler
            .spawn_poller("contribution-discovery", period, move || {
                let coordinator = coordinator.clone();
                let source = source.clone();
                let member_ids = member_ids.clone();
                async move {
                    let mut discovered = Vec::new();
                    for member_id in member_ids {
                        match source.member_contributions(member_id, 1).await {
                            Ok(result) => discovered.extend(result.debate_ext_ids()),
                            Err(err) => {
                                warn!(member_id, error = %err, "contribution discovery failed");
                            }
                        }
                    }
                    let started = coordinator.trigger(discovered);
                    if started > 0 {
                        info!(started, "discovery triggered indexing");
                    }
                    Ok(())
                }
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;

    use crate::api::DebateSource;
    use crate::api::models::{Debate, DebateItem, DebateOverview};
    use crate::config::RagConfig;
    use crate::embeddings::MockEmbeddingProvider;
    use crate::stores::{ChunkRecord, SearchFilter};

    struct StubSource;

    #[async_trait]
    impl DebateSource for StubSource {
        async fn fetch_debate(&self, ext_id: &str) -> Result<Debate, RagError> {
            Ok(Debate {
                overview: Some(DebateOverview {
                    id: 1,
                    ext_id: ext_id.to_string(),
                    title: "Stub Debate".into(),
                    date: NaiveDate::from_ymd_opt(2024, 3, 12)
                        .unwrap()
                        .and_hms_opt(0, 0, 0)
                        .unwrap(),
                    location: None,
                    house: Some("Commons".into()),
                    content_last_updated: None,
                }),
                items: vec![DebateItem {
                    item_id: Some(1),
                    member_id: Some(7),
                    value: Some("A short speech.".into()),
                    ..Default::default()
                }],
                child_debates: vec![],
            })
        }
    }

    #[derive(Default)]
    struct MemoryBackend {
        written: Mutex<usize>,
    }

    #[async_trait]
    impl Backend for MemoryBackend {
        fn dimensions(&self) -> usize {
            8
        }

        async fn upsert_chunks(&self, chunks: Vec<ChunkRecord>) -> Result<usize, RagError> {
            let mut written = self.written.lock();
            *written += chunks.len();
            Ok(chunks.len())
        }

        async fn count(&self) -> Result<usize, RagError> {
            Ok(*self.written.lock())
        }

        async fn search_similar(
            &self,
            _query_embedding: &[f32],
            _top_k: usize,
            _filter: &SearchFilter,
        ) -> Result<Vec<(ChunkRecord, f32)>, RagError> {
            Ok(Vec::new())
        }

        async fn chunks_for_debate(&self, _ext_id: &str) -> Result<Vec<ChunkRecord>, RagError> {
            Ok(Vec::new())
        }
    }

    fn test_coordinator() -> IngestionCoordinator {
        let config = RagConfig::default();
        let store: Arc<dyn Backend> = Arc::new(MemoryBackend::default());
        let indexer = Arc::new(
            DebateIndexer::new(
                &config,
                Arc::new(StubSource),
                Arc::new(MockEmbeddingProvider::new(8)),
                store.clone(),
            )
            .unwrap(),
        );
        let scheduler = Arc::new(TaskScheduler::new(Duration::from_secs(1)));
        IngestionCoordinator::new(indexer, scheduler, store)
    }

    #[tokio::test]
    async fn abandoned_in_flight_entry_is_reclaimed() {
        let coordinator = test_coordinator();
        coordinator.insert_dead_in_flight("DEB-A");

        // The id is not wedged: a fresh populate claims it and indexes.
        let summary = coordinator.populate(vec!["DEB-A".to_string()]).await;
        assert_eq!(summary.indexed, 1);
        assert!(summary.failed.is_empty());

        let status = coordinator.status().await.unwrap();
        assert_eq!(status.indexed, vec!["DEB-A"]);
        assert!(status.in_flight.is_empty());
        assert!(status.failed.is_empty());
    }

    #[tokio::test]
    async fn abandoned_in_flight_entry_is_retriggerable() {
        let coordinator = test_coordinator();
        coordinator.insert_dead_in_flight("DEB-A");

        assert_eq!(coordinator.trigger(vec!["DEB-A".to_string()]), 1);
        let summary = coordinator.populate(vec!["DEB-A".to_string()]).await;
        assert_eq!(summary.indexed, 1);
    }

    #[tokio::test]
    async fn status_reports_abandoned_work_as_failed() {
        let coordinator = test_coordinator();
        coordinator.insert_dead_in_flight("DEB-GONE");

        let status = coordinator.status().await.unwrap();
        assert!(status.in_flight.is_empty());
        assert_eq!(status.failed, vec!["DEB-GONE"]);
    }
}
