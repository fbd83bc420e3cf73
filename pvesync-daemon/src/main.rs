//! # pvesync
//!
//! Keeps NetBox virtual machines, interfaces, disks and IP addresses in step
//! with the guests of a Proxmox VE cluster.
//!
//! ## Modes
//! - no intervals: one full sync, then exit (exit code 1 if it failed)
//! - `SYNC_INTERVAL_SECONDS`: full sync on that interval
//! - `QUICK_CHECK_INTERVAL_SECONDS`: cheap change detection on that interval,
//!   with a full sync every `SYNC_INTERVAL_SECONDS` (default one hour)
//!
//! ## Usage
//! ```bash
//! pvesync --config /etc/pvesync/pvesync.yaml
//! PVE_API_HOST=pve1 NB_API_URL=https://netbox ... pvesync --dry-run
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

mod cli;
mod config;
mod metrics_server;

use pvesync_common::{log_section, LogFormat};
use pvesync_engine::{shutdown_channel, Engine, Provisioner, Scheduler, ShutdownTrigger, SyncMetrics};
use pvesync_netbox::{Gateway, HttpTransport, NetboxClient};
use pvesync_proxmox::ProxmoxClient;

use cli::{Args, DEFAULT_CONFIG_PATH};
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args)?;
    if let Err(errors) = config.validate() {
        eprintln!("Invalid configuration:");
        for e in &errors {
            eprintln!("  - {}", e);
        }
        std::process::exit(2);
    }

    match config.log_format() {
        LogFormat::Pretty => pvesync_common::init_logging(&config.logging.level)?,
        LogFormat::Json => pvesync_common::init_logging_json(&config.logging.level)?,
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting pvesync"
    );

    run(config).await
}

/// Explicit config paths must exist; the default path is optional.
fn load_config(args: &Args) -> Result<Config> {
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => match Config::load(DEFAULT_CONFIG_PATH) {
            Ok(cfg) => cfg,
            Err(_) if !std::path::Path::new(DEFAULT_CONFIG_PATH).exists() => Config::default(),
            Err(e) => return Err(e),
        },
    };
    Ok(config.with_cli_overrides(args))
}

async fn run(config: Config) -> Result<()> {
    let options = config.sync_options();
    let mode = config.mode();

    info!(
        cluster_id = options.cluster_id,
        sync_vms = options.sync_vms,
        sync_lxc = options.sync_lxc,
        dry_run = options.dry_run,
        cleanup = options.enable_cleanup,
        mode = ?mode,
        "Sync configured"
    );
    if options.dry_run {
        warn!("Dry-run mode: no changes will be written to NetBox");
    }

    let proxmox = ProxmoxClient::new(&config.proxmox_config())
        .context("Failed to build Proxmox VE client")?;
    let transport = HttpTransport::new(&config.netbox_http())
        .context("Failed to build NetBox client")?;
    let gateway = Arc::new(Gateway::new(Arc::new(transport), config.gateway()));
    let netbox = NetboxClient::new(gateway);

    log_section("Provisioning NetBox");
    let roles = Provisioner::new(netbox.clone(), options.dry_run)
        .provision(&config.role_settings())
        .await
        .context("NetBox provisioning failed")?;
    info!(vm_role = ?roles.vm, lxc_role = ?roles.lxc, "NetBox provisioned");

    let (trigger, shutdown) = shutdown_channel();
    let metrics = Arc::new(SyncMetrics::new());

    let engine = Engine::new(Arc::new(proxmox), netbox, options)
        .with_roles(roles)
        .with_metrics(Arc::clone(&metrics))
        .with_shutdown(shutdown.clone());

    let exporter = if config.features.enable_metrics {
        let listener = metrics_server::bind(config.features.metrics_port).await?;
        let shutdown = shutdown.clone();
        Some(tokio::spawn(metrics_server::serve(listener, Arc::clone(&metrics), shutdown)))
    } else {
        None
    };

    let signals = tokio::spawn(forward_signals(trigger));

    let result = Scheduler::new(mode, shutdown).run(&engine).await;

    signals.abort();
    if let Some(exporter) = exporter {
        // Single-run finishes without a signal; stop the exporter with it.
        exporter.abort();
    }

    match result {
        Ok(()) => {
            info!("pvesync stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Sync failed");
            Err(e.into())
        }
    }
}

/// Trip the shutdown signal on SIGINT or SIGTERM.
async fn forward_signals(trigger: ShutdownTrigger) {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!(signal = "SIGINT", "Shutdown requested"),
        _ = terminate => info!(signal = "SIGTERM", "Shutdown requested"),
    }
    trigger.trigger();
}
