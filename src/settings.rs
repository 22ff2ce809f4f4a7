use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{PoisonError, RwLock},
    time::Duration,
};

pub const ENV_API_BASE_URL: &str = "ZEEN_API_BASE_URL";
pub const ENV_ANON_KEY: &str = "ZEEN_ANON_KEY";
pub const ENV_ENABLE_REAL_SYNC: &str = "ZEEN_ENABLE_REAL_SYNC";

/// Everything the sync engine needs from the outside world. Passed by value
/// into the engine at construction; nothing reads process-wide state later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub anon_key: String,
    /// When false the engine runs in mock mode and never touches the network.
    pub real_sync_enabled: bool,
    pub chunk_size: usize,
    pub request_timeout_ms: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub mock_delay_ms: u64,
    pub history_limit: usize,
    pub sync_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: String::new(),
            anon_key: String::new(),
            real_sync_enabled: false,
            chunk_size: 50,
            request_timeout_ms: 5_000,
            max_attempts: 3,
            backoff_base_ms: 500,
            mock_delay_ms: 400,
            history_limit: 10,
            sync_interval_secs: 60,
        }
    }
}

impl SyncConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn mock_delay(&self) -> Duration {
        Duration::from_millis(self.mock_delay_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk_size must be greater than zero");
        }
        if self.max_attempts == 0 {
            bail!("max_attempts must be greater than zero");
        }
        if self.real_sync_enabled && self.api_base_url.trim().is_empty() {
            bail!("api_base_url is required when real sync is enabled");
        }
        Ok(())
    }

    /// Applies `ZEEN_*` overrides through `lookup` so callers (and tests) choose
    /// the source instead of this reading the process environment directly.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base) = lookup(ENV_API_BASE_URL) {
            self.api_base_url = base;
        }
        if let Some(key) = lookup(ENV_ANON_KEY) {
            self.anon_key = key;
        }
        if let Some(flag) = lookup(ENV_ENABLE_REAL_SYNC) {
            self.real_sync_enabled = flag == "1" || flag.eq_ignore_ascii_case("true");
        }
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UserSettings {
    #[serde(default)]
    sync: SyncConfig,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str(&contents) {
                Ok(data) => data,
                Err(err) => {
                    log::warn!(
                        "Ignoring unreadable settings at {}: {err}",
                        path.display()
                    );
                    UserSettings::default()
                }
            }
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Stored config with environment overrides applied. Overrides are never
    /// written back to disk.
    pub fn sync_config(&self) -> SyncConfig {
        let stored = self
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sync
            .clone();
        stored.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn update_sync_config(&self, config: SyncConfig) -> Result<()> {
        config.validate()?;
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        guard.sync = config;
        self.persist(&guard)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
