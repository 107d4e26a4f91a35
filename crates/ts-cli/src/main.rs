//! trial-sync: one reconciliation job between the tracker and the protocol
//! database.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::Instrument;
use ts_core::config::Config;
use ts_core::store::SyncStore;
use ts_core::types::TicketKind;
use ts_integrations::jira::sync::{NoMapRenderer, ProtocolManager};
use ts_integrations::jira::JiraClient;
use ts_telemetry::logging::{self, LogFormat};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TicketType {
    Epic,
    Trial,
    Subtask,
}

impl From<TicketType> for TicketKind {
    fn from(t: TicketType) -> Self {
        match t {
            TicketType::Epic => TicketKind::Epic,
            TicketType::Trial => TicketKind::Trial,
            TicketType::Subtask => TicketKind::Subtask,
        }
    }
}

/// Sync protocol, trial and uploaded-data records into tracker tickets.
#[derive(Debug, Parser)]
#[command(name = "trial-sync", version, about)]
struct Cli {
    /// Config file (default: ~/.trial-sync/config.toml).
    #[arg(long, env = "TRIAL_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Restrict the job to one epic (epic runs) or one issue (subtask runs).
    #[arg(long)]
    ticket_key: Option<String>,

    /// Which ticket level to reconcile.
    #[arg(long, value_enum, ignore_case = true, default_value = "epic")]
    ticket_type: TicketType,

    /// Emit JSON log lines regardless of the configured format.
    #[arg(long)]
    json_logs: bool,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load().context("failed to load config")?,
    };

    if cli.print_config {
        println!("{}", config.to_toml().context("failed to render config")?);
        return Ok(());
    }

    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        config
            .general
            .log_format
            .parse()
            .map_err(anyhow::Error::msg)
            .context("invalid general.log_format")?
    };
    logging::init("trial-sync", format, &config.general.log_level);

    let span = tracing::info_span!("sync_run", run_id = %uuid::Uuid::new_v4());
    run(cli, config).instrument(span).await
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    let db_path = config.database.resolved_path();
    let store = SyncStore::open(&db_path)
        .await
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    if config.database.bootstrap_source_tables {
        store
            .ensure_source_tables()
            .await
            .context("failed to create source tables")?;
    }

    let client = JiraClient::from_config(&config.tracker).with_context(|| {
        format!(
            "failed to build tracker client (is {} set?)",
            config.tracker.token_env
        )
    })?;
    tracing::info!(server = %client.base_url, db = %db_path.display(), "starting sync");

    let manager = ProtocolManager::new(&config, Arc::new(client), store, Arc::new(NoMapRenderer));
    let report = manager
        .run(cli.ticket_key.as_deref(), cli.ticket_type.into())
        .await
        .context("sync run failed")?;

    tracing::info!(report = ?report, "sync complete");
    Ok(())
}
