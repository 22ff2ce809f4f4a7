use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted sync health counters. Display-only: nothing in the engine reads
/// them back to make decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetrics {
    pub last_sync_at: Option<DateTime<Utc>>,
    pub success_count: u64,
    pub retry_count: u64,
    pub failed_count: u64,
}

impl SyncMetrics {
    pub fn has_pending_work(&self) -> bool {
        self.retry_count > 0 || self.failed_count > 0
    }
}

/// Increments applied by `SyncMetricsTracker::record_outcome`. Absent fields
/// leave the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsUpdate {
    pub synced_count: Option<u64>,
    pub retry_count: Option<u64>,
    pub failed_count: Option<u64>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl MetricsUpdate {
    pub fn is_empty(&self) -> bool {
        self.synced_count.is_none()
            && self.retry_count.is_none()
            && self.failed_count.is_none()
            && self.timestamp.is_none()
    }
}
