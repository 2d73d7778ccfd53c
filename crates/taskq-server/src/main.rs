use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use taskq_core::{InMemoryBackend, QueueManager};
use taskq_server::{router, AppState, HeaderOperatorProvider, ServerConfig};
use tracing_subscriber::EnvFilter;

/// Task-to-operator assignment broker.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address, overrides the config file and TASKQ_BIND_ADDR
    #[arg(short, long)]
    bind: Option<String>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long)]
    verbose: bool,

    /// Free task to preload into the in-memory backend (repeatable)
    #[arg(long = "seed-task", value_name = "TASK_ID")]
    seed_tasks: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut config = ServerConfig::load(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
        config.validate()?;
    }

    let backend = Arc::new(InMemoryBackend::new());
    for task_id in &cli.seed_tasks {
        backend.add_free_task(task_id.as_str()).await;
    }
    if !cli.seed_tasks.is_empty() {
        tracing::info!(count = cli.seed_tasks.len(), "Seeded free tasks");
    }

    let manager = QueueManager::new(backend, config.queue.clone());
    let app = router(AppState {
        manager,
        identity: Arc::new(HeaderOperatorProvider),
        keepalive_interval: config.keepalive_interval(),
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(
        addr = %config.bind_addr,
        thinking_timeout_secs = config.queue.thinking_timeout_secs,
        "Task queue listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("Task queue stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
