//! chuted - category-routing log relay daemon
//!
//! Clients hand batches of `(category, message)` records to the relay; each
//! batch descends a per-category tree of composable stores that buffer,
//! bucket, rotate to local files, or forward to upstream peers. Tail
//! sources feed configured files into the same path.
//!
//! # Usage
//!
//! ```bash
//! chuted --config /etc/chute/chuted.toml
//! chuted --config chuted.toml --log-level debug
//! ```

mod router;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chute_config::DaemonConfig;
use chute_metrics::CounterRegistry;
use chute_sources::{TailConfig, TailSource};
use chute_stores::{StaticDiscovery, StoreContext};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use router::Router;

/// chuted - category-routing log relay daemon
#[derive(Parser, Debug)]
#[command(name = "chuted")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "chuted.toml")]
    config: std::path::PathBuf,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = DaemonConfig::from_file(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log.level);
    init_logging(level)?;

    tracing::info!(
        config = %cli.config.display(),
        stores = config.stores.len(),
        sources = config.sources.len(),
        "chuted starting"
    );

    let counters = Arc::new(CounterRegistry::new());
    let ctx = StoreContext::new(Arc::clone(&counters), Arc::new(StaticDiscovery::new()));
    let router = Arc::new(Router::from_config(ctx, &config).await);

    let cancel = CancellationToken::new();

    // One long-lived task per configured tail.
    let mut source_tasks = Vec::new();
    for section in &config.sources {
        match section.get_string("type") {
            Some("tail") => {
                let (Some(category), Some(file)) =
                    (section.get_string("category"), section.get_string("file"))
                else {
                    tracing::error!("tail source needs both category and file, skipping");
                    continue;
                };
                let source = TailSource::new(
                    TailConfig {
                        category: category.to_string(),
                        file: file.into(),
                    },
                    Arc::clone(&router) as Arc<dyn chute_protocol::LogHandler>,
                    Arc::clone(&counters),
                );
                source_tasks.push(tokio::spawn(source.run(cancel.clone())));
            }
            other => {
                tracing::error!(source_type = ?other, "unable to create source for unknown type");
            }
        }
    }

    // Wall-clock maintenance: rotation, reconnects, spool draining.
    let ticker_router = Arc::clone(&router);
    let ticker_cancel = cancel.clone();
    let interval = Duration::from_secs(config.check_interval_secs.max(1));
    let ticker = tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker_cancel.cancelled() => break,
                _ = tick.tick() => ticker_router.periodic_check_all().await,
            }
        }
    });

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, draining");

    cancel.cancel();
    for task in source_tasks {
        let _ = task.await;
    }
    let _ = ticker.await;

    router.close_all().await;

    for snapshot in counters.snapshot() {
        tracing::info!(
            category = %snapshot.category,
            counter = %snapshot.counter,
            value = snapshot.value,
            "final counter"
        );
    }
    tracing::info!("chuted stopped");
    Ok(())
}

/// Initialize the tracing subscriber for logging.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}

/// Block until SIGTERM or SIGINT.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
