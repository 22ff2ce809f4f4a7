use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// Structured progress of a sync cycle. Chunk indices are 0-based; attempts
/// are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    #[serde(rename_all = "camelCase")]
    CycleStarted { records: usize, chunks: usize },
    #[serde(rename_all = "camelCase")]
    AttemptStarted { chunk_index: usize, attempt: u32 },
    #[serde(rename_all = "camelCase")]
    AttemptFailed {
        chunk_index: usize,
        attempt: u32,
        reason: String,
        next_delay_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    ChunkCompleted {
        chunk_index: usize,
        synced: usize,
        retry: usize,
        dropped: usize,
    },
    #[serde(rename_all = "camelCase")]
    ChunkFailed {
        chunk_index: usize,
        records: usize,
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    ErrorDropped { chunk_index: usize, message: String },
    #[serde(rename_all = "camelCase")]
    CycleFinished {
        synced: usize,
        retry: usize,
        dropped: usize,
        cancelled: bool,
    },
}

/// Fan-out of `SyncEvent`s. Emitting never blocks and never fails the cycle,
/// whether or not anyone is listening.
#[derive(Clone)]
pub struct SyncEvents {
    sender: broadcast::Sender<SyncEvent>,
}

impl SyncEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: SyncEvent) {
        let _ = self.sender.send(event);
    }

    pub(crate) fn attempt_failed(
        &self,
        chunk_index: usize,
        attempt: u32,
        reason: String,
        next_delay: Duration,
    ) {
        self.emit(SyncEvent::AttemptFailed {
            chunk_index,
            attempt,
            reason,
            next_delay_ms: next_delay.as_millis() as u64,
        });
    }
}

impl Default for SyncEvents {
    fn default() -> Self {
        Self::new()
    }
}
