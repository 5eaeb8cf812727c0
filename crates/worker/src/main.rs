use anyhow::Result;
use clap::Parser;
use locus_core::{config::AppConfig, runtime::LocusRuntime};
use std::{path::PathBuf, sync::Arc};
use tokio::signal;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use worker::WorkerPool;

#[derive(Parser)]
#[command(name = "locus-worker")]
#[command(about = "Validates extracted facility records and forwards them to the merge stage")]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "LOCUS_CONFIG", default_value = "config/config.toml")]
    config: PathBuf,

    /// Number of workers; overrides `queue.workers`
    #[arg(short, long)]
    workers: Option<usize>,
}

/// Initializes the logging system based on the configuration.
///
/// `RUST_LOG` takes precedence over `logging.level`.
fn init_logging(config: &AppConfig) {
    let filter = if let Ok(env_filter) = std::env::var("RUST_LOG") {
        if env_filter == "debug" || env_filter == "trace" {
            EnvFilter::new(format!("warn,locus_core={env_filter},worker={env_filter}"))
        } else {
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("warn,locus_core=info,worker=info"))
        }
    } else {
        let level = &config.logging.level;
        EnvFilter::try_new(format!("warn,locus_core={level},worker={level}"))
            .unwrap_or_else(|_| EnvFilter::new("warn,locus_core=info,worker=info"))
    };

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format.as_str() == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(fmt_layer).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::from_file(&cli.config)
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;
    if let Some(workers) = cli.workers {
        config.queue.workers = workers;
    }

    init_logging(&config);
    info!("Starting Locus validation worker");
    debug!(
        config_path = %cli.config.display(),
        environment = %config.environment,
        validation_enabled = config.validator.enabled,
        providers_count = config.enrichment.providers.len(),
        "Configuration loaded"
    );

    let workers = config.queue.workers;
    let runtime = LocusRuntime::builder()
        .with_config(config)
        .build()
        .await
        .map_err(|e| anyhow::anyhow!("Runtime initialization failed: {e}"))?;

    let pool = Arc::new(WorkerPool::new(&runtime, workers));
    let shutdown_tx = runtime.shutdown_trigger();
    let handles = pool.spawn(&shutdown_tx);

    shutdown_signal().await;

    let stats = runtime.metrics_collector().get_internal_metrics().await;
    runtime.shutdown().await;
    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Worker task failed");
        }
    }

    info!(
        jobs_total = stats.jobs_total,
        jobs_passed = stats.jobs_passed,
        jobs_failed = stats.jobs_failed,
        locations_total = stats.locations_total,
        locations_rejected = stats.locations_rejected,
        "Worker shutdown complete"
    );

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                () = std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, finishing in-flight jobs");
}
