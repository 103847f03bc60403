//! WiFiKeeper - keeps a captive-portal Wi-Fi connection alive
//!
//! Probes connectivity on a fixed interval, rejoins the network when it drops
//! and re-submits the portal login form when the portal intercepts traffic.

mod browser;
mod clock;
mod config;
mod connectivity;
mod http;
mod link;
mod models;
mod monitor;
mod portal;

use anyhow::{Context, Result};
use browser::ChromiumLauncher;
use clap::Parser;
use clock::{Clock, TokioClock};
use connectivity::HttpClassifier;
use link::{NetworkLink, NmcliLink};
use monitor::{Monitor, MonitorSettings};
use portal::selectors::{DEFAULT_FIELDS, SUBMIT_LOCATORS};
use portal::{candidate_urls, FormFillEngine, NavigatorSettings, PortalNavigator, SnapshotSink};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Upper bound on releasing the browser once a shutdown is requested
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "wifikeeper")]
#[command(about = "Captive portal keepalive daemon", long_about = None)]
struct Args {
    /// Config file path (default: search config.toml, /etc/wifikeeper, ~/.config/wifikeeper)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single check (and any recovery it triggers), then exit
    #[arg(long)]
    once: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = config::Config::load(args.config.as_deref())?;

    if args.print_config {
        print!("{}", cfg.to_redacted_toml()?);
        return Ok(());
    }

    init_logging(&cfg.logging)?;

    tracing::info!("WiFiKeeper v{} - Captive Portal Keepalive", env!("CARGO_PKG_VERSION"));
    tracing::info!("==========================================");

    let clock: Arc<dyn Clock> = Arc::new(TokioClock);
    let link: Arc<dyn NetworkLink> = Arc::new(NmcliLink::new(
        cfg.network.interface.clone(),
        Duration::from_secs(cfg.network.join_timeout_secs),
    ));

    report_startup(&cfg, link.as_ref()).await;

    let mut monitor = build_monitor(&cfg, link, clock)?;

    if args.once {
        run_once(&mut monitor).await
    } else {
        run_daemon(&mut monitor).await
    }
}

fn init_logging(cfg: &config::LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));

    match &cfg.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }

    Ok(())
}

async fn report_startup(cfg: &config::Config, link: &dyn NetworkLink) {
    tracing::info!("Target SSID: {}", cfg.network.ssid);
    tracing::info!("Portal: {}", cfg.portal.auth_url);
    tracing::info!("Check interval: {:?}", cfg.check_interval());

    match link.local_mac_address().await {
        Some(mac) => tracing::info!("Adapter MAC: {}", mac),
        None => tracing::warn!("Could not determine adapter MAC address"),
    }

    match link.current_ssid().await {
        Ok(Some(ssid)) if ssid == cfg.network.ssid => tracing::info!("Already on '{}'", ssid),
        Ok(Some(ssid)) => tracing::info!("Currently on '{}'", ssid),
        Ok(None) => tracing::info!("Not associated with any network"),
        Err(e) => tracing::warn!("Failed to read current SSID: {:#}", e),
    }
    tracing::info!("---");
}

fn build_monitor(
    cfg: &config::Config,
    link: Arc<dyn NetworkLink>,
    clock: Arc<dyn Clock>,
) -> Result<Monitor> {
    let classifier = HttpClassifier::new(&cfg.probe)?;

    let engine = FormFillEngine::new(
        DEFAULT_FIELDS,
        SUBMIT_LOCATORS,
        Duration::from_millis(cfg.portal.keystroke_delay_ms),
        clock.clone(),
    );

    let snapshots = if cfg.browser.snapshots {
        SnapshotSink::new(Some(cfg.browser.snapshot_dir.clone()), clock.clone())
    } else {
        SnapshotSink::disabled(clock.clone())
    };

    let navigator = PortalNavigator::new(
        Box::new(ChromiumLauncher::new(cfg.browser.clone())),
        candidate_urls(&cfg.portal.auth_url, &cfg.portal.extra_candidates),
        cfg.form_data(),
        engine,
        snapshots,
        clock.clone(),
        NavigatorSettings {
            navigation_timeout: Duration::from_secs(cfg.portal.navigation_timeout_secs),
            settle: Duration::from_secs(cfg.portal.settle_secs),
        },
    );

    Ok(Monitor::new(
        Box::new(classifier),
        link,
        Box::new(navigator),
        clock,
        MonitorSettings::from_config(cfg),
    ))
}

/// Single check - classify, recover if needed, then exit
async fn run_once(monitor: &mut Monitor) -> Result<()> {
    let status = monitor.check_once().await;
    let state = monitor.state();

    tracing::info!("Status: {}", status);
    tracing::info!(
        "Failures: {}, successes: {}, last success: {}",
        state.consecutive_failures,
        state.total_successes,
        state
            .last_success
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );

    shutdown(monitor).await;
    Ok(())
}

/// Daemon mode - monitor until Ctrl-C or SIGTERM
async fn run_daemon(monitor: &mut Monitor) -> Result<()> {
    tracing::info!("Starting daemon mode...");

    tokio::select! {
        _ = monitor.run() => {}
        _ = shutdown_signal() => {
            tracing::info!("Shutdown requested");
        }
    }

    shutdown(monitor).await;
    Ok(())
}

async fn shutdown(monitor: &mut Monitor) {
    if tokio::time::timeout(SHUTDOWN_GRACE, monitor.shutdown()).await.is_err() {
        tracing::warn!("Browser did not close within {:?}", SHUTDOWN_GRACE);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
