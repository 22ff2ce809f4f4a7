use std::{collections::HashSet, sync::Arc};

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    db::SessionRecord,
    identity::IdentitySource,
    settings::SyncConfig,
    sync::{
        events::{SyncEvent, SyncEvents},
        retry::{with_retry, RetryPolicy},
        transport::BatchTransport,
        types::{BatchOutcome, Connectivity, SyncReport, TransportError},
    },
};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Drives one sync cycle: chunks the pending records, sends each chunk through
/// the retry controller and folds per-record outcomes into a `SyncReport`.
///
/// Chunks run strictly one after another. The orchestrator never touches the
/// record store; applying the report is the caller's job.
pub struct SyncOrchestrator {
    config: SyncConfig,
    policy: RetryPolicy,
    transport: Arc<dyn BatchTransport>,
    identity: Arc<dyn IdentitySource>,
    connectivity: watch::Receiver<Connectivity>,
    events: SyncEvents,
}

/// Accumulates chunk results while keeping `synced` and `retry` disjoint.
#[derive(Default)]
struct Fold {
    report: SyncReport,
    synced: HashSet<String>,
    retry: HashSet<String>,
}

impl Fold {
    fn push_synced(&mut self, id: &str) {
        if !self.retry.contains(id) && self.synced.insert(id.to_string()) {
            self.report.synced_ids.push(id.to_string());
        }
    }

    fn push_retry(&mut self, id: &str) {
        if self.synced.remove(id) {
            self.report.synced_ids.retain(|synced| synced != id);
        }
        if self.retry.insert(id.to_string()) {
            self.report.retry_ids.push(id.to_string());
        }
    }
}

/// Counts for one folded chunk, used for logging and events.
struct ChunkTally {
    synced: usize,
    retry: usize,
    dropped: usize,
}

impl SyncOrchestrator {
    pub fn new(
        config: SyncConfig,
        transport: Arc<dyn BatchTransport>,
        identity: Arc<dyn IdentitySource>,
    ) -> Self {
        let (_, connectivity) = watch::channel(Connectivity::Unknown);
        Self {
            policy: RetryPolicy::from_config(&config),
            config,
            transport,
            identity,
            connectivity,
            events: SyncEvents::new(),
        }
    }

    pub fn with_connectivity(mut self, connectivity: watch::Receiver<Connectivity>) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn with_events(mut self, events: SyncEvents) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &SyncEvents {
        &self.events
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn sync_sessions(&self, records: &[SessionRecord]) -> Result<SyncReport> {
        self.sync_sessions_until(records, &CancellationToken::new())
            .await
    }

    /// Like `sync_sessions`, but stops issuing chunk attempts once `cancel`
    /// fires. Chunks folded before that point stay in the report; the rest are
    /// abandoned and remain pending for the next cycle.
    ///
    /// Errors only for setup failures (identity unavailable). Delivery
    /// failures come back as `retry_ids`.
    pub async fn sync_sessions_until(
        &self,
        records: &[SessionRecord],
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        if records.is_empty() {
            return Ok(SyncReport::default());
        }

        let chunk_size = self.config.chunk_size.max(1);
        let chunk_count = records.len().div_ceil(chunk_size);
        let ids = || records.iter().map(|record| record.id.as_str());

        if !self.config.real_sync_enabled {
            log_info!("Mock sync mode: simulating successful sync");
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Ok(SyncReport {
                        cancelled: true,
                        abandoned_chunks: chunk_count,
                        ..SyncReport::default()
                    });
                }
                _ = tokio::time::sleep(self.config.mock_delay()) => {}
            }
            return Ok(SyncReport::all_synced(ids()));
        }

        let offline = *self.connectivity.borrow() == Connectivity::Offline;
        if offline {
            log_info!("Offline: deferring {} records to the next cycle", records.len());
            return Ok(SyncReport::all_deferred(ids()));
        }

        let anon_id = self
            .identity
            .anon_id()
            .await
            .context("sync requires a client identity")?;

        self.events.emit(SyncEvent::CycleStarted {
            records: records.len(),
            chunks: chunk_count,
        });

        let mut fold = Fold::default();
        let transport = &self.transport;
        let events = &self.events;
        let anon_id = anon_id.as_str();

        for (chunk_index, chunk) in records.chunks(chunk_size).enumerate() {
            let result = with_retry(
                &self.policy,
                cancel,
                move |attempt| {
                    events.emit(SyncEvent::AttemptStarted {
                        chunk_index,
                        attempt,
                    });
                    transport.post_batch(anon_id, chunk)
                },
                |retry| {
                    log_warn!(
                        "Batch sync failed: chunk {} attempt {}/{}: {}; retrying in {:?}",
                        chunk_index,
                        retry.attempt,
                        self.policy.max_attempts,
                        retry.error,
                        retry.next_delay
                    );
                    events.attempt_failed(
                        chunk_index,
                        retry.attempt,
                        retry.error.to_string(),
                        retry.next_delay,
                    );
                },
            )
            .await;

            match result {
                Ok(outcome) => {
                    let tally = self.fold_outcome(&mut fold, chunk_index, chunk, outcome);
                    log_info!(
                        "Chunk {} synced={} retry={} dropped={}",
                        chunk_index,
                        tally.synced,
                        tally.retry,
                        tally.dropped
                    );
                    self.events.emit(SyncEvent::ChunkCompleted {
                        chunk_index,
                        synced: tally.synced,
                        retry: tally.retry,
                        dropped: tally.dropped,
                    });
                }
                Err(TransportError::Cancelled) => {
                    fold.report.cancelled = true;
                    fold.report.abandoned_chunks = chunk_count - chunk_index;
                    log_info!(
                        "Sync cycle cancelled; abandoning {} of {} chunks",
                        fold.report.abandoned_chunks,
                        chunk_count
                    );
                    break;
                }
                Err(err) => {
                    log_error!(
                        "Batch sync failed: chunk {} gave up after {} attempts: {}",
                        chunk_index,
                        self.policy.max_attempts,
                        err
                    );
                    for record in chunk {
                        fold.push_retry(&record.id);
                    }
                    self.events.emit(SyncEvent::ChunkFailed {
                        chunk_index,
                        records: chunk.len(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        let report = fold.report;
        self.events.emit(SyncEvent::CycleFinished {
            synced: report.synced_ids.len(),
            retry: report.retry_ids.len(),
            dropped: report.dropped_errors,
            cancelled: report.cancelled,
        });
        Ok(report)
    }

    fn fold_outcome(
        &self,
        fold: &mut Fold,
        chunk_index: usize,
        chunk: &[SessionRecord],
        outcome: BatchOutcome,
    ) -> ChunkTally {
        let chunk_ids: HashSet<&str> = chunk.iter().map(|record| record.id.as_str()).collect();
        let synced_before = fold.report.synced_ids.len();
        let retry_before = fold.report.retry_ids.len();
        let mut dropped = 0;

        for id in outcome.delivered() {
            if chunk_ids.contains(id.as_str()) {
                fold.push_synced(id);
            } else {
                log_warn!("Chunk {} acknowledged unknown id {}; ignoring", chunk_index, id);
            }
        }

        for error in outcome.errors {
            match error.id {
                Some(id) if chunk_ids.contains(id.as_str()) => fold.push_retry(&id),
                Some(id) => {
                    log_warn!("Chunk {} reported error for unknown id {}: {}", chunk_index, id, error.message);
                }
                None => {
                    dropped += 1;
                    log_warn!(
                        "Chunk {} dropped non-attributable error: {}",
                        chunk_index,
                        error.message
                    );
                    self.events.emit(SyncEvent::ErrorDropped {
                        chunk_index,
                        message: error.message,
                    });
                }
            }
        }

        fold.report.dropped_errors += dropped;
        ChunkTally {
            synced: fold.report.synced_ids.len().saturating_sub(synced_before),
            retry: fold.report.retry_ids.len() - retry_before,
            dropped,
        }
    }
}
