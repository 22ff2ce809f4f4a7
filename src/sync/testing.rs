//! In-memory fakes for exercising the sync cycle without a network.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use crate::{
    db::SessionRecord,
    identity::IdentitySource,
    settings::SyncConfig,
    sync::{
        transport::BatchTransport,
        types::{BatchError, BatchOutcome, TransportError},
    },
};

pub enum Step {
    Reply(Result<BatchOutcome, TransportError>),
    /// Sleeps before replying; used to hold a request in flight.
    Delayed(Duration, Result<BatchOutcome, TransportError>),
    /// Acknowledges every record in the chunk as saved.
    SaveAll,
}

/// Replays scripted steps in order; once the script runs out every call is
/// answered with `SaveAll`.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<VecDeque<Step>>>,
    calls: Arc<Mutex<Vec<Vec<String>>>>,
}

impl ScriptedTransport {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: Arc::new(Mutex::new(steps.into_iter().collect())),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl BatchTransport for ScriptedTransport {
    async fn post_batch(
        &self,
        _anon_id: &str,
        records: &[SessionRecord],
    ) -> Result<BatchOutcome, TransportError> {
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        self.calls.lock().unwrap().push(ids.clone());
        let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::SaveAll);
        match step {
            Step::Reply(result) => result,
            Step::Delayed(delay, result) => {
                tokio::time::sleep(delay).await;
                result
            }
            Step::SaveAll => Ok(BatchOutcome {
                saved: ids,
                ..BatchOutcome::default()
            }),
        }
    }
}

pub struct FixedIdentity(pub Option<&'static str>);

#[async_trait]
impl IdentitySource for FixedIdentity {
    async fn anon_id(&self) -> Result<String> {
        self.0
            .map(str::to_string)
            .ok_or_else(|| anyhow!("identity storage unavailable"))
    }
}

pub fn saved(ids: &[&str]) -> Step {
    Step::Reply(Ok(BatchOutcome {
        saved: ids.iter().map(|id| id.to_string()).collect(),
        ..BatchOutcome::default()
    }))
}

pub fn network_error() -> Step {
    Step::Reply(Err(TransportError::Network("connection refused".into())))
}

pub fn error_entry(id: Option<&str>, message: &str) -> BatchError {
    BatchError {
        id: id.map(str::to_string),
        message: message.to_string(),
    }
}

pub fn record(id: impl Into<String>, minute: i64) -> SessionRecord {
    let started = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
        + chrono::Duration::minutes(minute);
    SessionRecord::new(id, started, started + chrono::Duration::minutes(25), 1500, 1500, 0)
}

pub fn records(count: usize) -> Vec<SessionRecord> {
    (1..=count)
        .map(|i| record(format!("session-{i}"), i as i64))
        .collect()
}

/// Real-sync config with millisecond backoff so retry tests stay fast.
pub fn real_config() -> SyncConfig {
    SyncConfig {
        api_base_url: "https://api.test.com".into(),
        real_sync_enabled: true,
        backoff_base_ms: 1,
        mock_delay_ms: 5,
        ..SyncConfig::default()
    }
}
