//! Hippocampus daemon
//!
//! Loads the configuration, opens the optional SQLite store, registers the
//! configured maintenance tasks and drives the scheduler until Ctrl-C.

use anyhow::Context;
use clap::{Parser, Subcommand};
use hippocampus::{
    DriverHandle, EventBus, HippocampusConfig, MemoryEngine, ServiceRegistry, SqliteStorage,
    TaskScheduler, TaskSpec,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser)]
#[command(name = "hippocampus")]
#[command(about = "Background maintenance runtime for a layered memory store", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Set log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Config file (defaults to the user config directory)
    #[arg(short, long, env = "HIPPOCAMPUS_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and memory engine until interrupted
    Run {
        /// SQLite database path (overrides the config file)
        #[arg(long, env = "HIPPOCAMPUS_DB_PATH")]
        db_path: Option<PathBuf>,
    },

    /// Print the default configuration as TOML
    Config,
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<HippocampusConfig> {
    let explicit = path.is_some();
    let path = path.unwrap_or_else(HippocampusConfig::default_path);

    if !path.exists() {
        if explicit {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        debug!("No config at {}, using defaults", path.display());
        return Ok(HippocampusConfig::default());
    }

    let config = HippocampusConfig::from_file(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}

async fn run(config: HippocampusConfig, db_path: Option<PathBuf>) -> anyhow::Result<()> {
    let events = EventBus::default();
    let mut engine = MemoryEngine::new(config.memory.clone()).with_events(events.clone());

    if let Some(path) = db_path.or_else(|| config.storage.path.clone()) {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let storage = SqliteStorage::open(&path).await?;
        engine = engine.with_storage(Arc::new(storage));
    } else {
        warn!("No storage configured; memories live in process memory only");
    }

    let engine = Arc::new(engine);
    let loaded = engine.hydrate(config.storage.hydrate_limit).await?;
    info!("Memory engine ready with {} memories", loaded);

    let scheduler = TaskScheduler::new(
        config.scheduler.clone(),
        ServiceRegistry::new().with_memory(engine.clone()),
    )
    .with_events(events.clone());
    for (task_type, job) in config.jobs.entries() {
        let id = scheduler
            .register_task(TaskSpec::from_config(task_type.clone(), job))
            .await?;
        debug!("Task {} -> {}", task_type, id);
    }

    let mut drivers = DriverHandle::new(CancellationToken::new());
    drivers.spawn_notification_logger(events.subscribe());
    drivers.spawn_ticker(scheduler.clone());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");

    drivers.stop().await?;
    engine.flush().await;

    let stats = scheduler.stats().await;
    let memory = engine.stats().await;
    info!(
        "Final state: {} tasks ({} successes, {} failures recently), {} memories, {} connections",
        stats.total_tasks,
        stats.recent_successes,
        stats.recent_failures,
        memory.total,
        memory.total_connections
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::new(format!(
        "hippocampus={},tokio::sync::broadcast=error",
        level.as_str().to_lowercase()
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!("Hippocampus v{} starting...", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Config => {
            print!("{}", HippocampusConfig::default().to_toml()?);
            Ok(())
        }
        Commands::Run { db_path } => {
            let config = load_config(cli.config)?;
            config.validate()?;
            run(config, db_path).await
        }
    }
}
