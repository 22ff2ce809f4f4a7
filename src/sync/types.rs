use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-record result of one sessions-batch exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    #[serde(default)]
    pub saved: Vec<String>,
    /// Already present server-side; delivered as far as the client cares.
    #[serde(default)]
    pub skipped: Vec<String>,
    #[serde(default)]
    pub errors: Vec<BatchError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl BatchOutcome {
    /// Every id reported as an error, used when the server gave no usable
    /// per-record detail.
    pub fn all_failed<'a, I>(ids: I, message: &str) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self {
            saved: Vec::new(),
            skipped: Vec::new(),
            errors: ids
                .into_iter()
                .map(|id| BatchError {
                    id: Some(id.to_string()),
                    message: message.to_string(),
                })
                .collect(),
        }
    }

    pub fn delivered(&self) -> impl Iterator<Item = &String> {
        self.saved.iter().chain(self.skipped.iter())
    }
}

/// A batch exchange that produced no `BatchOutcome` at all.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out after {0} ms")]
    Timeout(u64),
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("sync cycle cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Cancelled)
    }
}

/// Result of one sync cycle. `synced_ids` and `retry_ids` are disjoint; an id
/// in neither was either dropped as non-attributable or abandoned by
/// cancellation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub synced_ids: Vec<String>,
    pub retry_ids: Vec<String>,
    /// `errors[]` entries without an id.
    pub dropped_errors: usize,
    /// Chunks that were never attempted because the cycle was cancelled.
    pub abandoned_chunks: usize,
    pub cancelled: bool,
}

impl SyncReport {
    pub fn all_synced<'a, I>(ids: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self {
            synced_ids: ids.into_iter().map(str::to_string).collect(),
            ..Self::default()
        }
    }

    pub fn all_deferred<'a, I>(ids: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self {
            retry_ids: ids.into_iter().map(str::to_string).collect(),
            ..Self::default()
        }
    }
}

/// Known reachability of the backend. Only `Offline` skips the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Connectivity {
    Online,
    Offline,
    #[default]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_server_outcome_with_idless_error() {
        let outcome: BatchOutcome = serde_json::from_str(
            r#"{"saved":["a"],"errors":[{"id":"b","message":"bad"},{"message":"no id"}]}"#,
        )
        .unwrap();
        assert_eq!(outcome.saved, ["a"]);
        assert!(outcome.skipped.is_empty());
        assert_eq!(outcome.errors[0].id.as_deref(), Some("b"));
        assert_eq!(outcome.errors[1].id, None);
    }

    #[test]
    fn cancellation_is_not_retryable() {
        assert!(!TransportError::Cancelled.is_retryable());
        assert!(TransportError::Timeout(5000).is_retryable());
    }
}
