//! Mule CLI - drive sync runs, queue drains, and conflict resolution
//! against an ERP backend from the terminal.

use std::env;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use thiserror::Error;

use mule_core::conflict::ConflictTracker;
use mule_core::db::Database;
use mule_core::models::{Resolution, PARTNER_ENTITY, PRODUCT_ENTITY};
use mule_core::queue::OfflineQueue;
use mule_core::remote::{JsonRpcRemote, RpcConfig};
use mule_core::sync::{CancelFlag, SyncEngine};
use mule_core::SyncSettings;

#[derive(Parser)]
#[command(name = "mule")]
#[command(about = "Offline-first sync client for ERP backends")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to local database file
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sync over the given entity types
    Sync {
        /// Entity types to sync (defaults to the known master data set)
        entity_types: Vec<String>,
        /// Output the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect and drain the offline mutation queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Inspect and resolve sync conflicts
    Conflicts {
        #[command(subcommand)]
        action: ConflictAction,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Show pending/failed counts
    Status,
    /// List queued operations in replay order
    List {
        /// Number of operations to show
        #[arg(short, long, default_value = "20")]
        limit: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replay pending operations against the remote
    Process,
    /// Reset a failed operation for automatic processing again
    Retry {
        /// Operation id
        id: i64,
    },
    /// Delete every queued operation
    Clear,
}

#[derive(Subcommand)]
enum ConflictAction {
    /// List pending conflicts
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve one conflict toward a side
    Resolve {
        /// Conflict id
        id: i64,
        /// Side to keep
        #[arg(long, value_enum)]
        keep: KeepSide,
    },
    /// Drop pending conflicts that are representational false positives
    Sweep,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KeepSide {
    Local,
    Server,
}

impl From<KeepSide> for Resolution {
    fn from(side: KeepSide) -> Self {
        match side {
            KeepSide::Local => Self::Local,
            KeepSide::Server => Self::Server,
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] mule_core::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Missing environment variable {0}")]
    MissingEnv(&'static str),
    #[error("{0} must be an integer user id")]
    InvalidUserId(&'static str),
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mule=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    tracing::debug!(path = %db_path.display(), "Using local database");

    match cli.command {
        Commands::Sync { entity_types, json } => run_sync(&entity_types, json, &db_path).await?,
        Commands::Queue { action } => match action {
            QueueAction::Status => run_queue_status(&db_path).await?,
            QueueAction::List { limit, json } => run_queue_list(limit, json, &db_path).await?,
            QueueAction::Process => run_queue_process(&db_path).await?,
            QueueAction::Retry { id } => run_queue_retry(id, &db_path).await?,
            QueueAction::Clear => run_queue_clear(&db_path).await?,
        },
        Commands::Conflicts { action } => match action {
            ConflictAction::List { json } => run_conflicts_list(json, &db_path).await?,
            ConflictAction::Resolve { id, keep } => {
                run_conflicts_resolve(id, keep.into(), &db_path).await?;
            }
            ConflictAction::Sweep => run_conflicts_sweep(&db_path).await?,
        },
    }

    Ok(())
}

fn resolve_db_path(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| env::var("MULE_DB_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("mule.db"))
}

fn remote_from_env(settings: &SyncSettings) -> Result<JsonRpcRemote, CliError> {
    let endpoint = require_env("MULE_ENDPOINT")?;
    let database = require_env("MULE_DATABASE")?;
    let user_id = require_env("MULE_USER_ID")?
        .parse::<i64>()
        .map_err(|_| CliError::InvalidUserId("MULE_USER_ID"))?;
    let api_key = require_env("MULE_API_KEY")?;

    Ok(JsonRpcRemote::new(
        RpcConfig {
            endpoint,
            database,
            user_id,
            api_key,
        },
        settings.remote_timeout,
    )?)
}

fn require_env(name: &'static str) -> Result<String, CliError> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or(CliError::MissingEnv(name))
}

async fn run_sync(entity_types: &[String], json: bool, db_path: &Path) -> Result<(), CliError> {
    let settings = SyncSettings::default();
    let remote = remote_from_env(&settings)?;
    let db = Database::open(db_path).await?;
    let queue = OfflineQueue::new(db.connection(), settings.max_retries);
    let mut engine = SyncEngine::new(&remote, db.connection(), &queue, settings);

    let requested: Vec<&str> = if entity_types.is_empty() {
        vec![PARTNER_ENTITY, PRODUCT_ENTITY]
    } else {
        entity_types.iter().map(String::as_str).collect()
    };

    let report = engine.sync(&requested, &CancelFlag::new()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Sync {:?} ({} mode)", report.status, report.mode);
    for entry in &report.synced {
        println!("  {}: {} records", entry.entity_type, entry.records_processed);
    }
    for failure in &report.errors {
        println!("  {}: FAILED - {}", failure.entity_type, failure.message);
    }
    println!("Total: {} records processed", report.total_processed());
    Ok(())
}

async fn run_queue_status(db_path: &Path) -> Result<(), CliError> {
    let db = Database::open(db_path).await?;
    let queue = OfflineQueue::new(db.connection(), SyncSettings::default().max_retries);
    let counts = queue.counts().await?;
    println!("Pending: {}", counts.pending);
    println!("Failed:  {}", counts.failed);
    Ok(())
}

async fn run_queue_list(limit: u32, json: bool, db_path: &Path) -> Result<(), CliError> {
    let db = Database::open(db_path).await?;
    let queue = OfflineQueue::new(db.connection(), SyncSettings::default().max_retries);
    let operations = queue.operations(limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&operations)?);
        return Ok(());
    }

    if operations.is_empty() {
        println!("Queue is empty");
        return Ok(());
    }
    for op in operations {
        let record = op
            .record_id
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        println!(
            "#{} {} {} record={} status={} retries={}/{}{}",
            op.id,
            op.kind,
            op.entity_type,
            record,
            op.status,
            op.retry_count,
            op.max_retries,
            op.last_error
                .map_or_else(String::new, |error| format!(" error={error}")),
        );
    }
    Ok(())
}

async fn run_queue_process(db_path: &Path) -> Result<(), CliError> {
    let settings = SyncSettings::default();
    let remote = remote_from_env(&settings)?;
    let db = Database::open(db_path).await?;
    let queue = OfflineQueue::new(db.connection(), settings.max_retries);

    let report = queue.process_queue(&remote, &CancelFlag::new()).await?;
    println!(
        "Completed: {}, requeued: {}, dead-lettered: {}",
        report.completed(),
        report.requeued(),
        report.dead_lettered()
    );
    if let Some(reason) = report.halted {
        println!("Drain halted: {reason}");
    }
    Ok(())
}

async fn run_queue_retry(id: i64, db_path: &Path) -> Result<(), CliError> {
    let db = Database::open(db_path).await?;
    let queue = OfflineQueue::new(db.connection(), SyncSettings::default().max_retries);
    queue.retry_operation(id).await?;
    println!("Operation #{id} queued for retry");
    Ok(())
}

async fn run_queue_clear(db_path: &Path) -> Result<(), CliError> {
    let db = Database::open(db_path).await?;
    let queue = OfflineQueue::new(db.connection(), SyncSettings::default().max_retries);
    queue.clear_all().await?;
    println!("Queue cleared");
    Ok(())
}

async fn run_conflicts_list(json: bool, db_path: &Path) -> Result<(), CliError> {
    let db = Database::open(db_path).await?;
    let queue = OfflineQueue::new(db.connection(), SyncSettings::default().max_retries);
    let tracker = ConflictTracker::new(db.connection(), &queue);
    let conflicts = tracker.pending().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&conflicts)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No pending conflicts");
        return Ok(());
    }
    for conflict in conflicts {
        let detected = chrono::DateTime::from_timestamp_millis(conflict.detected_at)
            .map_or_else(|| conflict.detected_at.to_string(), |ts| ts.to_rfc3339());
        println!(
            "#{} {}#{} fields=[{}] detected={detected}",
            conflict.id,
            conflict.entity_type,
            conflict.record_id,
            conflict.fields.join(", "),
        );
    }
    Ok(())
}

async fn run_conflicts_resolve(
    id: i64,
    resolution: Resolution,
    db_path: &Path,
) -> Result<(), CliError> {
    let db = Database::open(db_path).await?;
    let queue = OfflineQueue::new(db.connection(), SyncSettings::default().max_retries);
    let tracker = ConflictTracker::new(db.connection(), &queue);
    tracker.resolve(id, resolution).await?;
    println!("Conflict #{id} resolved ({resolution})");
    Ok(())
}

async fn run_conflicts_sweep(db_path: &Path) -> Result<(), CliError> {
    let db = Database::open(db_path).await?;
    let queue = OfflineQueue::new(db.connection(), SyncSettings::default().max_retries);
    let tracker = ConflictTracker::new(db.connection(), &queue);
    let cleared = tracker.clear_false_positives().await?;
    println!("Cleared {cleared} false-positive conflicts");
    Ok(())
}
