mod db;
mod identity;
mod metrics;
mod settings;
mod sync;
mod utils;

use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use db::{Database, FocusFeedback, SessionRecord};
pub use identity::{IdentityProvider, IdentitySource};
pub use metrics::{format_age, MetricsUpdate, SyncMetrics, SyncMetricsTracker};
pub use settings::{SettingsStore, SyncConfig};
pub use sync::{
    BatchError, BatchOutcome, BatchTransport, Connectivity, HttpBatchTransport, SurveyClient,
    SurveyPayload, SyncCoordinator, SyncEvent, SyncEvents, SyncOrchestrator, SyncReport,
    TransportError,
};

const ENV_DATA_DIR: &str = "ZEEN_DATA_DIR";

/// Everything the host app needs to record sessions and keep them delivered.
pub struct SyncEngine {
    pub db: Database,
    pub settings: SettingsStore,
    pub identity: IdentityProvider,
    pub metrics: SyncMetricsTracker,
    pub coordinator: SyncCoordinator,
    pub connectivity: watch::Sender<Connectivity>,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn open(data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let settings = SettingsStore::new(data_dir.join("settings.json"))?;
        let config = settings.sync_config();
        config.validate().context("invalid sync configuration")?;

        let db = Database::new(data_dir.join("zeen.sqlite3"))?;
        let identity = IdentityProvider::new(db.clone());
        let metrics = SyncMetricsTracker::new(db.clone());
        let (connectivity, connectivity_rx) = watch::channel(Connectivity::Unknown);

        let orchestrator = SyncOrchestrator::new(
            config.clone(),
            Arc::new(HttpBatchTransport::new(&config)?),
            Arc::new(identity.clone()),
        )
        .with_connectivity(connectivity_rx);
        let coordinator = SyncCoordinator::new(db.clone(), orchestrator, metrics.clone());

        log::info!(
            "Sync engine ready ({} mode, chunk size {})",
            if config.real_sync_enabled { "real" } else { "mock" },
            config.chunk_size
        );

        Ok(Self {
            db,
            settings,
            identity,
            metrics,
            coordinator,
            connectivity,
            config,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Stores a completed session and kicks off delivery.
    pub async fn record_session(&self, record: SessionRecord) -> Result<SyncReport> {
        let evicted = self
            .db
            .insert_session_record(&record, self.config.history_limit)
            .await?;
        if evicted > 0 {
            log::info!("Evicted {evicted} synced records from history");
        }
        self.coordinator.sync_now().await
    }

    /// Records the user's late answer; a changed answer is re-delivered.
    pub async fn submit_focus_feedback(
        &self,
        id: &str,
        feedback: FocusFeedback,
    ) -> Result<SyncReport> {
        if self.db.set_focus_feedback(id, feedback).await? {
            self.coordinator.sync_now().await
        } else {
            Ok(SyncReport::default())
        }
    }

    pub fn set_connectivity(&self, connectivity: Connectivity) {
        self.connectivity.send_replace(connectivity);
    }

    pub fn survey_client(&self) -> Result<SurveyClient> {
        SurveyClient::new(&self.config, Arc::new(self.identity.clone()))
    }
}

fn parse_feedback_arg(value: &str) -> Result<FocusFeedback> {
    match value {
        "yes" => Ok(FocusFeedback::Yes),
        "no" => Ok(FocusFeedback::No),
        other => Err(anyhow!("feedback must be 'yes' or 'no', got '{other}'")),
    }
}

fn parse_u64_arg(args: &[String], index: usize, name: &str) -> Result<u64> {
    let raw = args
        .get(index)
        .ok_or_else(|| anyhow!("missing <{name}> argument"))?;
    raw.parse()
        .with_context(|| format!("<{name}> must be a non-negative integer"))
}

fn session_start(ended_at: DateTime<Utc>, actual_sec: u64) -> Result<DateTime<Utc>> {
    i64::try_from(actual_sec)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|elapsed| ended_at.checked_sub_signed(elapsed))
        .ok_or_else(|| anyhow!("<actual-sec> {actual_sec} is out of range"))
}

async fn print_status(engine: &SyncEngine) -> Result<()> {
    let metrics = engine.metrics.read_metrics().await?;
    let pending = engine.db.count_unsynced_records().await?;
    println!("database:    {}", engine.db.path().display());
    println!("last sync:   {}", format_age(metrics.last_sync_at));
    println!("pending:     {pending}");
    println!("synced:      {}", metrics.success_count);
    println!("retries:     {}", metrics.retry_count);
    println!("failed:      {}", metrics.failed_count);
    for record in engine.db.list_session_records(engine.config.history_limit).await? {
        println!(
            "  {} {:>5}s/{:>5}s feedback={} {}",
            record.id,
            record.actual_duration_sec,
            record.scheduled_duration_sec,
            record.focus_feedback.as_str(),
            if record.synced { "synced" } else { "pending" }
        );
    }
    Ok(())
}

fn print_report(report: &SyncReport) {
    println!(
        "synced {} / retry {} / dropped {}{}",
        report.synced_ids.len(),
        report.retry_ids.len(),
        report.dropped_errors,
        if report.cancelled { " (cancelled)" } else { "" }
    );
}

async fn dispatch(engine: &SyncEngine, args: &[String]) -> Result<()> {
    let command = args.first().map(String::as_str).unwrap_or("sync");
    match command {
        "sync" => print_report(&engine.coordinator.sync_now().await?),
        "status" => print_status(engine).await?,
        "record" => {
            let scheduled = parse_u64_arg(args, 1, "scheduled-sec")?;
            let actual = parse_u64_arg(args, 2, "actual-sec")?;
            let pauses = match args.get(3) {
                Some(_) => parse_u64_arg(args, 3, "pauses")?,
                None => 0,
            };
            let ended_at = Utc::now();
            let record = SessionRecord::new(
                Uuid::new_v4().to_string(),
                session_start(ended_at, actual)?,
                ended_at,
                scheduled,
                actual,
                u32::try_from(pauses).context("<pauses> out of range")?,
            );
            println!("recorded {}", record.id);
            print_report(&engine.record_session(record).await?);
        }
        "feedback" => {
            let id = args.get(1).ok_or_else(|| anyhow!("missing <id> argument"))?;
            let feedback = parse_feedback_arg(
                args.get(2)
                    .ok_or_else(|| anyhow!("missing <yes|no> argument"))?,
            )?;
            print_report(&engine.submit_focus_feedback(id, feedback).await?);
        }
        "watch" => {
            let shutdown = CancellationToken::new();
            let handle = engine
                .coordinator
                .spawn_periodic(engine.config.sync_interval(), shutdown.clone());
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl-c")?;
            shutdown.cancel();
            handle.await.context("periodic sync task failed to join")?;
        }
        other => bail!("unknown command '{other}' (expected sync, status, record, feedback, watch)"),
    }
    Ok(())
}

pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    log::info!("Zeen sync starting up...");

    let data_dir = std::env::var_os(ENV_DATA_DIR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("zeen-data"));
    let args: Vec<String> = std::env::args().skip(1).collect();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async {
        let engine = SyncEngine::open(data_dir)?;
        dispatch(&engine, &args).await
    })
}
