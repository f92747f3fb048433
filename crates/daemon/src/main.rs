//! Meshwatch Daemon
//!
//! Joins the node to the mesh, reports per-peer bandwidth to the controller
//! and serves the local status API until terminated.

use anyhow::Context;
use clap::Parser;
use meshwatch_common::{MeshProvider, TailscaleCli};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod accounting;
mod config;
mod launcher;
mod notifier;
mod reporter;
mod retry;
mod supervisor;

use accounting::BandwidthAccountant;
use config::{ConfigAcquirer, StartupParams};
use launcher::DaemonLauncher;
use notifier::ChangeNotifier;
use reporter::Reporter;
use retry::{Sleeper, TokioSleeper};
use supervisor::Supervisor;

/// Command line flags. Environment variables of the same parameters win.
#[derive(Parser)]
#[command(name = "meshwatchd")]
#[command(about = "Mesh VPN membership supervisor with per-peer bandwidth reporting")]
#[command(version)]
struct Cli {
    /// Path to local configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base URL of the remote controller
    #[arg(long, alias = "remoteConfig")]
    remote_config: Option<String>,

    /// Address to listen on
    #[arg(long, default_value = config::DEFAULT_LISTEN)]
    listen: String,

    /// Log level (DEBUG, INFO, WARN, ERROR, FATAL)
    #[arg(long, default_value = config::DEFAULT_LOG_LEVEL)]
    log_level: String,

    /// URL to notify on peer changes
    #[arg(long)]
    notify: Option<String>,

    /// Mesh auth key
    #[arg(long)]
    authkey: Option<String>,

    /// Mesh hostname
    #[arg(long)]
    hostname: Option<String>,

    /// Mesh control server URL
    #[arg(long)]
    control_url: Option<String>,

    /// Bandwidth report URL (defaults to the controller's endpoint)
    #[arg(long)]
    report_url: Option<String>,
}

impl Cli {
    fn into_params(self) -> StartupParams {
        StartupParams {
            config_path: self.config,
            remote_config_url: self.remote_config,
            listen: self.listen,
            log_level: self.log_level,
            notify_url: self.notify,
            auth_key: self.authkey,
            hostname: self.hostname,
            control_url: self.control_url,
            report_url: self.report_url,
        }
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            return;
        }
    }

    let _ = tokio::signal::ctrl_c().await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let params = Cli::parse().into_params().with_process_env();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config::log_filter(&params.log_level)));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("Meshwatch daemon v{}", env!("CARGO_PKG_VERSION"));

    let listen_addr = params.listen_addr()?;
    let http = reqwest::Client::new();
    let sleeper: Arc<dyn Sleeper> = Arc::new(TokioSleeper);

    // Session config
    let source = params.config_source()?;
    let session = ConfigAcquirer::new(http.clone(), sleeper.clone())
        .acquire(source)
        .await
        .context("Failed to load configuration")?;

    // Bootstrap the mesh session
    let provider: Arc<dyn MeshProvider> = Arc::new(TailscaleCli::new());
    let mut supervisor = Supervisor::new(provider.clone(), DaemonLauncher::tailscale(), sleeper);
    supervisor
        .bootstrap(&session)
        .await
        .context("Failed to ensure mesh session")?;

    let shutdown = CancellationToken::new();

    // Bandwidth reporter
    let (notifier, notifier_worker) =
        ChangeNotifier::start(http.clone(), params.notify_url.clone());
    let report_url = params.report_url();
    let reporter_handle = if report_url.is_some() || notifier.is_enabled() {
        let reporter = Reporter::new(
            provider.clone(),
            Arc::new(BandwidthAccountant::new()),
            notifier,
            http.clone(),
            report_url,
        );
        Some(tokio::spawn(reporter.run(shutdown.clone())))
    } else {
        info!("No bandwidth sink or notify URL configured, reporter disabled");
        None
    };

    // Status API
    let server_token = shutdown.clone();
    let server_provider = provider.clone();
    let server_handle = tokio::spawn(async move {
        let stop = async move { server_token.cancelled().await };
        if let Err(e) = meshwatch_web::serve(listen_addr, server_provider, stop).await {
            error!("HTTP server failed: {:#}", e);
        }
    });

    // Wait for shutdown signal
    wait_for_shutdown_signal().await;
    info!("Shutting down...");

    shutdown.cancel();
    supervisor.shutdown().await;

    if let Err(e) = server_handle.await {
        error!("HTTP server task failed: {}", e);
    }
    if let Some(handle) = reporter_handle {
        if let Err(e) = handle.await {
            error!("Reporter task failed: {}", e);
        }
    }
    // The reporter owned the last notifier handle; queued changes drain first
    if let Some(worker) = notifier_worker {
        if let Err(e) = worker.await {
            error!("Notifier task failed: {}", e);
        }
    }

    info!("Daemon shutdown complete");
    Ok(())
}
