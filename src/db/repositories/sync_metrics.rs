use anyhow::Result;
use rusqlite::params;

use crate::{
    db::{
        helpers::{parse_optional_datetime, to_i64, to_u64},
        Database,
    },
    metrics::{MetricsUpdate, SyncMetrics},
};

impl Database {
    pub async fn read_sync_metrics(&self) -> Result<SyncMetrics> {
        self.execute(|conn| {
            let (last_sync_at, success, retry, failed) = conn.query_row(
                "SELECT last_sync_at, success_count, retry_count, failed_count
                 FROM sync_metrics WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )?;

            Ok(SyncMetrics {
                last_sync_at: parse_optional_datetime(last_sync_at, "last_sync_at")?,
                success_count: to_u64(success, "success_count")?,
                retry_count: to_u64(retry, "retry_count")?,
                failed_count: to_u64(failed, "failed_count")?,
            })
        })
        .await
    }

    /// Adds the update's counts onto the stored counters in one statement.
    pub async fn apply_sync_metrics(&self, update: MetricsUpdate) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "UPDATE sync_metrics
                 SET last_sync_at = COALESCE(?1, last_sync_at),
                     success_count = success_count + ?2,
                     retry_count = retry_count + ?3,
                     failed_count = failed_count + ?4
                 WHERE id = 1",
                params![
                    update.timestamp.map(|dt| dt.to_rfc3339()),
                    to_i64(update.synced_count.unwrap_or(0))?,
                    to_i64(update.retry_count.unwrap_or(0))?,
                    to_i64(update.failed_count.unwrap_or(0))?,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn reset_sync_metrics(&self) -> Result<()> {
        self.execute(|conn| {
            conn.execute(
                "UPDATE sync_metrics
                 SET last_sync_at = NULL, success_count = 0, retry_count = 0, failed_count = 0
                 WHERE id = 1",
                [],
            )?;
            Ok(())
        })
        .await
    }
}
