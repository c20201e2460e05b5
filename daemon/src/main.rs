//! peerlease daemon
//!
//! Serves the admin HTTP API and runs the maintenance scheduler.
//!
//! Usage:
//!   SERVER_ENDPOINT=vpn.example.net:51820 peerlease --backend local

use anyhow::{Context, Result};
use clap::Parser;
use peerlease_daemon::{AdminRegistry, AppState, Args, build_router, parse_admin_tokens};
use peerlease_db::PeerDirectory;
use peerlease_provision::build_provisioner;
use peerlease_scheduler::{LogNotifier, Scheduler};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!("peerlease starting...");

    let backend = args.backend_config().context("invalid backend configuration")?;
    let scheduler_config = args
        .scheduler_config()
        .context("invalid scheduler configuration")?;

    let directory = PeerDirectory::open(&args.database)
        .with_context(|| format!("failed to open database {}", args.database.display()))?;
    info!("Database: {}", args.database.display());

    let provisioner = build_provisioner(backend, directory.clone())
        .await
        .context("failed to start provisioning backend")?;

    let admins = Arc::new(AdminRegistry::from_tokens(parse_admin_tokens(&args.admin_tokens)));
    if admins.is_empty().await {
        warn!("No admin tokens configured; admin routes will reject every request");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Arc::new(Scheduler::new(
        directory.clone(),
        Arc::new(LogNotifier),
        scheduler_config,
    ));
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx.clone()));

    let app = build_router(AppState::new(directory, Arc::clone(&provisioner), admins));
    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    info!("Admin API listening on {}", args.listen);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => warn!("Failed to listen for ctrl-c: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    let mut server_shutdown = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .context("HTTP server failed")?;

    if let Err(e) = scheduler_task.await {
        warn!("Scheduler task ended abnormally: {}", e);
    }
    if let Err(e) = provisioner.close().await {
        warn!("Failed to close provisioning backend: {}", e);
    }
    info!("peerlease stopped");
    Ok(())
}
