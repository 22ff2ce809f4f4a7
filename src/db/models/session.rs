//! Session record data models.
//!
//! `SessionRecord` is the locally stored row; `SessionPayload` is the shape the
//! sessions-batch endpoint receives (no delivery bookkeeping).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum FocusFeedback {
    Yes,
    No,
    #[default]
    Unanswered,
}

impl FocusFeedback {
    pub fn as_str(&self) -> &'static str {
        match self {
            FocusFeedback::Yes => "yes",
            FocusFeedback::No => "no",
            FocusFeedback::Unanswered => "unanswered",
        }
    }

    /// Unanswered goes over the wire as `null`.
    pub fn as_wire(&self) -> Option<&'static str> {
        match self {
            FocusFeedback::Unanswered => None,
            answered => Some(answered.as_str()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub scheduled_duration_sec: u64,
    pub actual_duration_sec: u64,
    pub pause_count: u32,
    pub focus_feedback: FocusFeedback,
    /// Local-only delivery flag.
    pub synced: bool,
    /// Bumped whenever the business content changes after creation.
    pub revision: u64,
}

impl SessionRecord {
    pub fn new(
        id: impl Into<String>,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        scheduled_duration_sec: u64,
        actual_duration_sec: u64,
        pause_count: u32,
    ) -> Self {
        Self {
            id: id.into(),
            started_at,
            ended_at,
            scheduled_duration_sec,
            actual_duration_sec,
            pause_count,
            focus_feedback: FocusFeedback::Unanswered,
            synced: false,
            revision: 0,
        }
    }

    pub fn with_feedback(mut self, feedback: FocusFeedback) -> Self {
        self.focus_feedback = feedback;
        self
    }
}

/// Identifies the content generation that a sync cycle actually delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedMark {
    pub id: String,
    pub revision: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload<'a> {
    pub id: &'a str,
    pub started_at: String,
    pub ended_at: String,
    pub scheduled_duration_sec: u64,
    pub actual_duration_sec: u64,
    pub pause_count: u32,
    pub focus_feedback: Option<&'static str>,
}

impl<'a> From<&'a SessionRecord> for SessionPayload<'a> {
    fn from(record: &'a SessionRecord) -> Self {
        Self {
            id: &record.id,
            started_at: record.started_at.to_rfc3339(),
            ended_at: record.ended_at.to_rfc3339(),
            scheduled_duration_sec: record.scheduled_duration_sec,
            actual_duration_sec: record.actual_duration_sec,
            pause_count: record.pause_count,
            focus_feedback: record.focus_feedback.as_wire(),
        }
    }
}
