use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;

use crate::{
    db::{SessionPayload, SessionRecord},
    settings::SyncConfig,
    sync::types::{BatchOutcome, TransportError},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

pub const SESSIONS_BATCH_PATH: &str = "sessions-batch";
pub const ANON_ID_HEADER: &str = "X-Anon-Id";

/// One network exchange per chunk. Implementations return `Err` only when no
/// outcome was obtained at all.
#[async_trait]
pub trait BatchTransport: Send + Sync {
    async fn post_batch(
        &self,
        anon_id: &str,
        records: &[SessionRecord],
    ) -> Result<BatchOutcome, TransportError>;
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    sessions: Vec<SessionPayload<'a>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    RateLimited,
    ServerError,
    ClientError,
    Unexpected,
}

impl StatusClass {
    pub fn of(status: StatusCode) -> Self {
        if status.is_success() {
            StatusClass::Success
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            StatusClass::RateLimited
        } else if status.is_server_error() {
            StatusClass::ServerError
        } else if status.is_client_error() {
            StatusClass::ClientError
        } else {
            StatusClass::Unexpected
        }
    }
}

/// Maps a non-2xx status to an outcome that fails every record in the chunk.
/// Non-429 4xx responses are retried like 5xx for now; whether a rejected
/// payload should instead be discarded is unresolved server policy.
pub fn outcome_for_failed_status(status: StatusCode, records: &[SessionRecord]) -> BatchOutcome {
    let class = StatusClass::of(status);
    let message = match class {
        StatusClass::RateLimited => format!("rate limited ({status})"),
        StatusClass::ServerError => format!("server error ({status})"),
        StatusClass::ClientError => format!("request rejected ({status})"),
        StatusClass::Success | StatusClass::Unexpected => format!("unexpected status ({status})"),
    };
    BatchOutcome::all_failed(records.iter().map(|r| r.id.as_str()), &message)
}

#[derive(Clone)]
pub struct HttpBatchTransport {
    client: Client,
    endpoint: String,
    anon_key: String,
    timeout: Duration,
}

impl HttpBatchTransport {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint(SESSIONS_BATCH_PATH),
            anon_key: config.anon_key.clone(),
            timeout: config.request_timeout(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn exchange(
        &self,
        anon_id: &str,
        records: &[SessionRecord],
    ) -> Result<BatchOutcome, TransportError> {
        let body = BatchRequest {
            sessions: records.iter().map(SessionPayload::from).collect(),
        };

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(ANON_ID_HEADER, anon_id)
            .json(&body);
        if !self.anon_key.is_empty() {
            request = request
                .bearer_auth(&self.anon_key)
                .header("apikey", &self.anon_key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            // Drain the body for the log line; its content is never interpreted.
            let text = response.text().await.unwrap_or_default();
            log_warn!(
                "sessions-batch returned {status} for {} records: {}",
                records.len(),
                text.chars().take(200).collect::<String>()
            );
            return Ok(outcome_for_failed_status(status, records));
        }

        response
            .json::<BatchOutcome>()
            .await
            .map_err(|err| TransportError::Decode(err.to_string()))
    }
}

#[async_trait]
impl BatchTransport for HttpBatchTransport {
    async fn post_batch(
        &self,
        anon_id: &str,
        records: &[SessionRecord],
    ) -> Result<BatchOutcome, TransportError> {
        log_debug!("POST {} with {} records", self.endpoint, records.len());
        // Dropping the timed-out future aborts the in-flight request.
        match tokio::time::timeout(self.timeout, self.exchange(anon_id, records)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}
