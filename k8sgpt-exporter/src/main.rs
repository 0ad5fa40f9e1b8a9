//! Prometheus exporter for K8sGPT analysis results.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use k8sgpt_common::init_tracing;
use k8sgpt_exporter::config::Overrides;
use k8sgpt_exporter::{
    ExporterConfig, HttpServer, MetricCollector, NamespaceFilter, Poller, build_source,
};

/// Prometheus exporter for K8sGPT analysis results.
#[derive(Parser, Debug)]
#[command(name = "k8sgpt-exporter")]
#[command(about = "Export K8sGPT analysis results as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long, env = "EXPORTER_CONFIG")]
    config: Option<String>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// HTTP port (overrides the port of the listen address).
    #[arg(long, env = "EXPORTER_PORT")]
    port: Option<u16>,

    /// Seconds between poll cycles.
    #[arg(long, env = "POLL_INTERVAL")]
    poll_interval: Option<u64>,

    /// Only list results in this namespace (empty = all namespaces).
    #[arg(long, env = "NAMESPACE")]
    namespace: Option<String>,

    /// Maximum characters in a free-text label value.
    #[arg(long, env = "TRUNCATE_LABEL")]
    truncate_label: Option<usize>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            listen: self.listen.clone(),
            port: self.port,
            poll_interval_secs: self.poll_interval,
            namespace: self.namespace.clone(),
            label_max_len: self.truncate_label,
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => ExporterConfig::load_from_file(path)?,
        None => ExporterConfig::default(),
    };
    config.apply(args.overrides())?;

    // Initialize logging
    init_tracing(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting K8sGPT Prometheus Exporter"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let collector = Arc::new(MetricCollector::new(
        config.prometheus.clone(),
        config.labels.clone(),
    ));

    let source = build_source(&config.source);
    let poller = Poller::new(
        source,
        collector.clone(),
        NamespaceFilter::new(&config.filters),
        Duration::from_secs(config.polling.interval_secs),
    );
    let http_server = HttpServer::new(
        collector.clone(),
        config.listen_addr()?,
        config.prometheus.path.clone(),
    );

    // Start poll loop
    let poller_task = tokio::spawn(poller.run(shutdown_rx.clone()));

    // Start HTTP server
    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(http_shutdown).await {
            error!("HTTP server error: {:#}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    // Signal shutdown
    shutdown_tx.send(true)?;

    // Wait for tasks to complete
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = poller_task.await;
        let _ = http_task.await;
    })
    .await;

    let stats = collector.stats();
    info!(
        polls_total = stats.polls_total,
        polls_failed = stats.polls_failed,
        series_count = collector.series_count(),
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
