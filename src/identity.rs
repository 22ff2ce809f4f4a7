use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::db::Database;

const ANON_ID_KEY: &str = "anon_id";

/// Source of the pseudonymous client id that partitions server-side data.
#[async_trait]
pub trait IdentitySource: Send + Sync {
    async fn anon_id(&self) -> Result<String>;
}

/// Generates a v4 id on first use and persists it for the lifetime of the
/// installation. Storage failures propagate; sync cannot run without it.
#[derive(Clone)]
pub struct IdentityProvider {
    db: Database,
    cached: std::sync::Arc<OnceCell<String>>,
}

impl IdentityProvider {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            cached: std::sync::Arc::new(OnceCell::new()),
        }
    }

    pub async fn get_anon_id(&self) -> Result<String> {
        let id = self
            .cached
            .get_or_try_init(|| async {
                if let Some(existing) = self
                    .db
                    .get_app_state(ANON_ID_KEY)
                    .await
                    .context("failed to load anonymous id")?
                {
                    return Ok::<_, anyhow::Error>(existing);
                }

                let generated = Uuid::new_v4().to_string();
                let stored = self
                    .db
                    .get_or_insert_app_state(ANON_ID_KEY, &generated)
                    .await
                    .context("failed to persist anonymous id")?;
                log::info!("Generated anonymous client id");
                Ok(stored)
            })
            .await?;
        Ok(id.clone())
    }
}

#[async_trait]
impl IdentitySource for IdentityProvider {
    async fn anon_id(&self) -> Result<String> {
        self.get_anon_id().await
    }
}
