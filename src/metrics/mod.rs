mod types;

pub use types::{MetricsUpdate, SyncMetrics};

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::{db::Database, sync::SyncReport};

/// Persists sync counters derived from cycle outcomes.
#[derive(Clone)]
pub struct SyncMetricsTracker {
    db: Database,
}

impl SyncMetricsTracker {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Counters are additive; nothing here ever resets them.
    pub async fn record_outcome(&self, update: MetricsUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }
        self.db.apply_sync_metrics(update).await
    }

    /// Folds one finished (or cancelled) cycle into the counters. The last-sync
    /// time only moves when something was actually delivered.
    pub async fn record_cycle(&self, report: &SyncReport, now: DateTime<Utc>) -> Result<()> {
        let mut update = MetricsUpdate::default();
        if !report.synced_ids.is_empty() {
            update.synced_count = Some(report.synced_ids.len() as u64);
            update.timestamp = Some(now);
        }
        if !report.retry_ids.is_empty() {
            update.retry_count = Some(report.retry_ids.len() as u64);
        }
        if report.dropped_errors > 0 {
            update.failed_count = Some(report.dropped_errors as u64);
        }
        self.record_outcome(update).await
    }

    pub async fn read_metrics(&self) -> Result<SyncMetrics> {
        self.db.read_sync_metrics().await
    }

    /// Explicit caller policy; the engine itself never calls this.
    pub async fn reset(&self) -> Result<()> {
        self.db.reset_sync_metrics().await
    }
}

pub fn format_age(timestamp: Option<DateTime<Utc>>) -> String {
    format_age_at(timestamp, Utc::now())
}

pub fn format_age_at(timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(timestamp) = timestamp else {
        return "never".to_string();
    };

    // Clock skew can put the timestamp slightly in the future.
    let minutes = (now - timestamp).num_minutes().max(0);
    let plural = |n: i64, unit: &str| {
        if n == 1 {
            format!("1 {unit} ago")
        } else {
            format!("{n} {unit}s ago")
        }
    };

    match minutes {
        0 => "just now".to_string(),
        1..=59 => plural(minutes, "minute"),
        60..=1439 => plural(minutes / 60, "hour"),
        _ => plural(minutes / 1440, "day"),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::db::test_support;

    #[test]
    fn formats_relative_ages() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let ago = |d: Duration| Some(now - d);

        assert_eq!(format_age_at(None, now), "never");
        assert_eq!(format_age_at(ago(Duration::seconds(30)), now), "just now");
        assert_eq!(format_age_at(Some(now + Duration::minutes(2)), now), "just now");
        assert_eq!(format_age_at(ago(Duration::minutes(1)), now), "1 minute ago");
        assert_eq!(format_age_at(ago(Duration::minutes(59)), now), "59 minutes ago");
        assert_eq!(format_age_at(ago(Duration::minutes(60)), now), "1 hour ago");
        assert_eq!(format_age_at(ago(Duration::hours(23)), now), "23 hours ago");
        assert_eq!(format_age_at(ago(Duration::hours(24)), now), "1 day ago");
        assert_eq!(format_age_at(ago(Duration::days(9)), now), "9 days ago");
    }

    #[tokio::test]
    async fn counters_accumulate_across_calls() {
        let test_db = test_support::open();
        let tracker = SyncMetricsTracker::new(test_db.db.clone());
        let first = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();

        tracker
            .record_outcome(MetricsUpdate {
                synced_count: Some(2),
                timestamp: Some(first),
                ..Default::default()
            })
            .await
            .unwrap();
        tracker
            .record_outcome(MetricsUpdate {
                synced_count: Some(3),
                retry_count: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();

        let metrics = tracker.read_metrics().await.unwrap();
        assert_eq!(metrics.success_count, 5);
        assert_eq!(metrics.retry_count, 1);
        assert_eq!(metrics.failed_count, 0);
        assert_eq!(metrics.last_sync_at, Some(first));
        assert!(metrics.has_pending_work());

        tracker.reset().await.unwrap();
        assert_eq!(tracker.read_metrics().await.unwrap(), SyncMetrics::default());
    }

    #[tokio::test]
    async fn cycle_without_deliveries_keeps_last_sync_time() {
        let test_db = test_support::open();
        let tracker = SyncMetricsTracker::new(test_db.db.clone());
        let report = SyncReport {
            retry_ids: vec!["a".into(), "b".into()],
            dropped_errors: 1,
            ..Default::default()
        };

        tracker.record_cycle(&report, Utc::now()).await.unwrap();

        let metrics = tracker.read_metrics().await.unwrap();
        assert_eq!(metrics.last_sync_at, None);
        assert_eq!(metrics.retry_count, 2);
        assert_eq!(metrics.failed_count, 1);
    }
}
