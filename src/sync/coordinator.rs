use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{self, Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    db::{Database, SyncedMark},
    metrics::SyncMetricsTracker,
    sync::{orchestrator::SyncOrchestrator, types::SyncReport},
};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

/// Owns the record store side of syncing: loads the pending set, runs one
/// orchestrator cycle, then applies the whole report at once. A new trigger
/// cancels whatever cycle is still running.
#[derive(Clone)]
pub struct SyncCoordinator {
    db: Database,
    orchestrator: Arc<SyncOrchestrator>,
    metrics: SyncMetricsTracker,
    current: Arc<Mutex<Option<ActiveCycle>>>,
    next_cycle: Arc<AtomicU64>,
    cycle_lock: Arc<Mutex<()>>,
}

struct ActiveCycle {
    id: u64,
    cancel: CancellationToken,
}

impl SyncCoordinator {
    pub fn new(db: Database, orchestrator: SyncOrchestrator, metrics: SyncMetricsTracker) -> Self {
        Self {
            db,
            orchestrator: Arc::new(orchestrator),
            metrics,
            current: Arc::new(Mutex::new(None)),
            next_cycle: Arc::new(AtomicU64::new(0)),
            cycle_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    /// Cancels the in-flight cycle, if any, and runs a fresh one over the
    /// current unsynced set.
    pub async fn sync_now(&self) -> Result<SyncReport> {
        self.sync_until(CancellationToken::new()).await
    }

    /// `sync_now` with a caller-owned token: cancelling it stops the cycle the
    /// same way a newer trigger would.
    pub async fn sync_until(&self, cancel: CancellationToken) -> Result<SyncReport> {
        let cycle_id = self.next_cycle.fetch_add(1, Ordering::Relaxed);
        {
            let mut current = self.current.lock().await;
            let active = ActiveCycle {
                id: cycle_id,
                cancel: cancel.clone(),
            };
            if let Some(previous) = current.replace(active) {
                previous.cancel.cancel();
            }
        }

        // The superseded cycle still applies whatever it had folded, so wait
        // for it before reading the pending set again.
        let _cycle = self.cycle_lock.lock().await;
        let result = self.run_cycle(&cancel).await;

        let mut current = self.current.lock().await;
        if current.as_ref().is_some_and(|active| active.id == cycle_id) {
            *current = None;
        }
        result
    }

    /// Stops the running cycle without starting another.
    pub async fn cancel(&self) {
        if let Some(active) = self.current.lock().await.take() {
            active.cancel.cancel();
        }
    }

    async fn run_cycle(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        if cancel.is_cancelled() {
            return Ok(SyncReport {
                cancelled: true,
                ..SyncReport::default()
            });
        }

        let pending = self
            .db
            .list_unsynced_records()
            .await
            .context("failed to load unsynced records")?;
        if pending.is_empty() {
            return Ok(SyncReport::default());
        }

        let revisions: HashMap<&str, u64> = pending
            .iter()
            .map(|record| (record.id.as_str(), record.revision))
            .collect();

        let report = self
            .orchestrator
            .sync_sessions_until(&pending, cancel)
            .await?;

        let marks: Vec<SyncedMark> = report
            .synced_ids
            .iter()
            .filter_map(|id| {
                revisions.get(id.as_str()).map(|revision| SyncedMark {
                    id: id.clone(),
                    revision: *revision,
                })
            })
            .collect();
        let marked = self
            .db
            .mark_records_synced(marks)
            .await
            .context("failed to persist synced flags")?;

        if !report.retry_ids.is_empty() {
            log_info!("Sessions requiring retry: {:?}", report.retry_ids);
        }
        log_info!(
            "Sync cycle done: {} synced ({} persisted), {} to retry, {} dropped{}",
            report.synced_ids.len(),
            marked,
            report.retry_ids.len(),
            report.dropped_errors,
            if report.cancelled { ", cancelled" } else { "" }
        );

        // Metrics are display-only; a failure here must not undo the sync.
        if let Err(err) = self.metrics.record_cycle(&report, Utc::now()).await {
            log_error!("Failed to update sync metrics: {err:?}");
        }

        Ok(report)
    }

    /// Runs `sync_now` every `interval` until `shutdown` fires.
    pub fn spawn_periodic(&self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        coordinator.cancel().await;
                        log_info!("periodic sync shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        // A child token lets shutdown cut the running cycle short
                        // while its folded chunks are still applied.
                        match coordinator.sync_until(shutdown.child_token()).await {
                            Ok(report) if report.cancelled => {
                                log_info!("periodic sync cycle cancelled");
                            }
                            Ok(_) => {}
                            Err(err) => log_error!("periodic sync failed: {err:?}"),
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::{test_support, FocusFeedback, SessionRecord},
        sync::{
            testing::{
                network_error, real_config, record, saved, FixedIdentity, ScriptedTransport, Step,
            },
            types::BatchOutcome,
        },
    };

    fn coordinator(db: &Database, transport: &ScriptedTransport, chunk_size: usize) -> SyncCoordinator {
        let config = crate::settings::SyncConfig {
            chunk_size,
            ..real_config()
        };
        let orchestrator = SyncOrchestrator::new(
            config,
            Arc::new(transport.clone()),
            Arc::new(FixedIdentity(Some("test-anon-id"))),
        );
        SyncCoordinator::new(db.clone(), orchestrator, SyncMetricsTracker::new(db.clone()))
    }

    async fn seed(db: &Database, records: &[SessionRecord]) {
        for record in records {
            db.insert_session_record(record, 50).await.unwrap();
        }
    }

    #[tokio::test]
    async fn applies_report_to_store_and_metrics() {
        let test_db = test_support::open();
        let db = &test_db.db;
        seed(db, &[record("a", 0), record("b", 30)]).await;
        let transport = ScriptedTransport::new([Step::Reply(Ok(BatchOutcome {
            saved: vec!["a".into()],
            skipped: vec![],
            errors: vec![crate::sync::testing::error_entry(Some("b"), "rejected")],
        }))]);

        let report = coordinator(db, &transport, 50).sync_now().await.unwrap();
        assert_eq!(report.synced_ids, ["a"]);
        assert_eq!(report.retry_ids, ["b"]);

        assert!(db.get_session_record("a").await.unwrap().unwrap().synced);
        assert!(!db.get_session_record("b").await.unwrap().unwrap().synced);

        let metrics = db.read_sync_metrics().await.unwrap();
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.retry_count, 1);
        assert!(metrics.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn synced_records_are_not_resent() {
        let test_db = test_support::open();
        let db = &test_db.db;
        seed(db, &[record("a", 0)]).await;
        let transport = ScriptedTransport::default();
        let coordinator = coordinator(db, &transport, 50);

        coordinator.sync_now().await.unwrap();
        let second = coordinator.sync_now().await.unwrap();

        assert_eq!(second, SyncReport::default());
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn feedback_change_triggers_resync() {
        let test_db = test_support::open();
        let db = &test_db.db;
        seed(db, &[record("a", 0)]).await;
        let transport = ScriptedTransport::default();
        let coordinator = coordinator(db, &transport, 50);

        coordinator.sync_now().await.unwrap();
        db.set_focus_feedback("a", FocusFeedback::Yes).await.unwrap();
        let report = coordinator.sync_now().await.unwrap();

        assert_eq!(report.synced_ids, ["a"]);
        assert_eq!(transport.call_count(), 2);
        let stored = db.get_session_record("a").await.unwrap().unwrap();
        assert!(stored.synced);
        assert_eq!(stored.revision, 1);
    }

    #[tokio::test]
    async fn retry_ids_stay_pending_for_next_cycle() {
        let test_db = test_support::open();
        let db = &test_db.db;
        seed(db, &[record("a", 0)]).await;
        let transport =
            ScriptedTransport::new([network_error(), network_error(), network_error()]);
        let coordinator = coordinator(db, &transport, 50);

        let first = coordinator.sync_now().await.unwrap();
        assert_eq!(first.retry_ids, ["a"]);
        assert_eq!(db.count_unsynced_records().await.unwrap(), 1);

        let second = coordinator.sync_now().await.unwrap();
        assert_eq!(second.synced_ids, ["a"]);
        assert_eq!(db.count_unsynced_records().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn new_trigger_cancels_running_cycle() {
        let test_db = test_support::open();
        let db = &test_db.db;
        seed(db, &[record("a", 0), record("b", 30)]).await;
        let transport = ScriptedTransport::new([
            Step::Reply(Ok(BatchOutcome {
                saved: vec!["a".into()],
                ..BatchOutcome::default()
            })),
            Step::Delayed(Duration::from_secs(30), Ok(BatchOutcome::default())),
        ]);
        let coordinator = coordinator(db, &transport, 1);

        let first = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.sync_now().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = coordinator.sync_now().await.unwrap();
        let first = first.await.unwrap().unwrap();

        assert!(first.cancelled);
        assert_eq!(first.synced_ids, ["a"]);
        assert_eq!(second.synced_ids, ["b"]);
        assert_eq!(db.count_unsynced_records().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn periodic_loop_stops_on_shutdown() {
        let test_db = test_support::open();
        let db = &test_db.db;
        seed(db, &[record("a", 0)]).await;
        let transport = ScriptedTransport::default();
        let coordinator = coordinator(db, &transport, 50);
        let shutdown = CancellationToken::new();

        let handle = coordinator.spawn_periodic(Duration::from_millis(10), shutdown.clone());
        tokio::time::sleep(Duration::from_millis(60)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(db.count_unsynced_records().await.unwrap(), 0);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn shutdown_interrupts_in_flight_periodic_cycle() {
        let test_db = test_support::open();
        let db = &test_db.db;
        seed(db, &[record("a", 0), record("b", 30)]).await;
        let transport = ScriptedTransport::new([
            saved(&["a"]),
            Step::Delayed(Duration::from_secs(3), Ok(BatchOutcome::default())),
        ]);
        let coordinator = coordinator(db, &transport, 1);
        let shutdown = CancellationToken::new();

        let handle = coordinator.spawn_periodic(Duration::from_secs(60), shutdown.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        time::timeout(Duration::from_millis(500), handle)
            .await
            .expect("shutdown waited for the in-flight cycle")
            .unwrap();

        assert_eq!(transport.call_count(), 2);
        assert!(db.get_session_record("a").await.unwrap().unwrap().synced);
        assert!(!db.get_session_record("b").await.unwrap().unwrap().synced);
    }
}
