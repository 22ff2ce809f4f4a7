use std::{collections::BTreeMap, sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::{identity::IdentitySource, settings::SyncConfig, sync::transport::ANON_ID_HEADER};

pub const SURVEY_SUBMIT_PATH: &str = "survey-submit";

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SurveyPayload {
    pub survey_key: String,
    pub answers: BTreeMap<String, Value>,
    pub metadata: Option<BTreeMap<String, Value>>,
}

/// One-shot survey submission. Unlike session sync there is no retry queue:
/// failures go straight back to the caller.
pub struct SurveyClient {
    client: Client,
    endpoint: String,
    anon_key: String,
    timeout: Duration,
    identity: Arc<dyn IdentitySource>,
}

impl SurveyClient {
    pub fn new(config: &SyncConfig, identity: Arc<dyn IdentitySource>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint(SURVEY_SUBMIT_PATH),
            anon_key: config.anon_key.clone(),
            timeout: config.request_timeout(),
            identity,
        })
    }

    pub async fn submit(&self, payload: &SurveyPayload) -> Result<()> {
        let anon_id = self.identity.anon_id().await?;

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(ANON_ID_HEADER, anon_id)
            .json(payload);
        if !self.anon_key.is_empty() {
            request = request
                .bearer_auth(&self.anon_key)
                .header("apikey", &self.anon_key);
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| anyhow!("Survey submit timed out after {:?}", self.timeout))?
            .context("Survey submit request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Survey submit failed: {} {}", status.as_u16(), text);
        }
        Ok(())
    }
}
