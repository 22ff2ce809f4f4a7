use anyhow::{anyhow, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use log::warn;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    helpers::{parse_datetime, parse_feedback, to_i64, to_u32, to_u64},
    models::{FocusFeedback, SessionRecord, SyncedMark},
    Database,
};

const SELECT_COLUMNS: &str = "id, started_at, ended_at, scheduled_duration_sec, actual_duration_sec,
     pause_count, focus_feedback, synced, revision";

/// Fixed-width timestamps so `ORDER BY ended_at` is chronological.
fn to_stored(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn row_to_record(row: &Row) -> Result<SessionRecord> {
    let started_at: String = row.get("started_at")?;
    let ended_at: String = row.get("ended_at")?;
    let scheduled: i64 = row.get("scheduled_duration_sec")?;
    let actual: i64 = row.get("actual_duration_sec")?;
    let pause_count: i64 = row.get("pause_count")?;
    let feedback: String = row.get("focus_feedback")?;
    let revision: i64 = row.get("revision")?;

    Ok(SessionRecord {
        id: row.get("id")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        ended_at: parse_datetime(&ended_at, "ended_at")?,
        scheduled_duration_sec: to_u64(scheduled, "scheduled_duration_sec")?,
        actual_duration_sec: to_u64(actual, "actual_duration_sec")?,
        pause_count: to_u32(pause_count, "pause_count")?,
        focus_feedback: parse_feedback(&feedback)?,
        synced: row.get::<_, bool>("synced")?,
        revision: to_u64(revision, "revision")?,
    })
}

fn collect_records(conn: &Connection, sql: &str, limit: Option<i64>) -> Result<Vec<SessionRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = match limit {
        Some(limit) => stmt.query(params![limit])?,
        None => stmt.query([])?,
    };
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        records.push(row_to_record(row)?);
    }
    Ok(records)
}

/// Brings the history back to `limit` rows by evicting the oldest synced
/// records. Unsynced records are never evicted, so the table may sit above the
/// bound until they are delivered.
fn enforce_retention(conn: &Connection, limit: usize) -> Result<usize> {
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM session_records", [], |row| {
        row.get(0)
    })?;
    let excess = total - to_i64(limit as u64)?;
    if excess <= 0 {
        return Ok(0);
    }

    let evicted = conn.execute(
        "DELETE FROM session_records
         WHERE id IN (
             SELECT id FROM session_records
             WHERE synced = 1
             ORDER BY ended_at ASC
             LIMIT ?1
         )",
        params![excess],
    )?;

    if (evicted as i64) < excess {
        warn!(
            "History holds {} unsynced records beyond the retention limit of {}",
            excess - evicted as i64,
            limit
        );
    }

    Ok(evicted)
}

impl Database {
    /// Inserts a freshly completed session and applies the retention bound.
    pub async fn insert_session_record(
        &self,
        record: &SessionRecord,
        history_limit: usize,
    ) -> Result<usize> {
        let record = record.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO session_records
                 (id, started_at, ended_at, scheduled_duration_sec, actual_duration_sec,
                  pause_count, focus_feedback, synced, revision, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.id,
                    to_stored(&record.started_at),
                    to_stored(&record.ended_at),
                    to_i64(record.scheduled_duration_sec)?,
                    to_i64(record.actual_duration_sec)?,
                    record.pause_count,
                    record.focus_feedback.as_str(),
                    record.synced,
                    to_i64(record.revision)?,
                    to_stored(&Utc::now()),
                ],
            )?;
            let evicted = enforce_retention(&tx, history_limit)?;
            tx.commit()?;
            Ok(evicted)
        })
        .await
    }

    pub async fn get_session_record(&self, id: &str) -> Result<Option<SessionRecord>> {
        let id = id.to_string();
        self.execute(move |conn| {
            let sql = format!("SELECT {SELECT_COLUMNS} FROM session_records WHERE id = ?1");
            let record = conn
                .query_row(&sql, params![id], |row| Ok(row_to_record(row)))
                .optional()?
                .transpose()?;
            Ok(record)
        })
        .await
    }

    /// Most recent first.
    pub async fn list_session_records(&self, limit: usize) -> Result<Vec<SessionRecord>> {
        let limit = to_i64(limit as u64)?;
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {SELECT_COLUMNS} FROM session_records
                 ORDER BY ended_at DESC, id DESC
                 LIMIT ?1"
            );
            collect_records(conn, &sql, Some(limit))
        })
        .await
    }

    /// Oldest first, so chunking over the result is deterministic.
    pub async fn list_unsynced_records(&self) -> Result<Vec<SessionRecord>> {
        self.execute(|conn| {
            let sql = format!(
                "SELECT {SELECT_COLUMNS} FROM session_records
                 WHERE synced = 0
                 ORDER BY ended_at ASC, id ASC"
            );
            collect_records(conn, &sql, None)
        })
        .await
    }

    pub async fn count_unsynced_records(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM session_records WHERE synced = 0",
                [],
                |row| row.get(0),
            )?;
            to_u64(count, "unsynced count")
        })
        .await
    }

    /// Records the user's answer. A changed answer invalidates any server copy,
    /// so the record becomes unsynced under a new revision. Returns whether the
    /// stored value changed.
    pub async fn set_focus_feedback(&self, id: &str, feedback: FocusFeedback) -> Result<bool> {
        let id = id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "UPDATE session_records
                 SET focus_feedback = ?1,
                     revision = revision + 1,
                     synced = 0
                 WHERE id = ?2 AND focus_feedback != ?1",
                params![feedback.as_str(), id],
            )?;

            if rows_affected > 0 {
                return Ok(true);
            }

            let exists: Option<String> = conn
                .query_row(
                    "SELECT id FROM session_records WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            match exists {
                Some(_) => Ok(false),
                None => Err(anyhow!("Session record {id} not found")),
            }
        })
        .await
    }

    /// Marks delivered records. A mark only applies while the record is still
    /// at the revision that was sent; anything edited mid-cycle stays pending.
    pub async fn mark_records_synced(&self, marks: Vec<SyncedMark>) -> Result<usize> {
        if marks.is_empty() {
            return Ok(0);
        }
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut updated = 0;
            {
                let mut stmt = tx.prepare(
                    "UPDATE session_records
                     SET synced = 1
                     WHERE id = ?1 AND revision = ?2",
                )?;
                for mark in &marks {
                    updated += stmt.execute(params![mark.id, to_i64(mark.revision)?])?;
                }
            }
            tx.commit()?;
            Ok(updated)
        })
        .await
    }
}
