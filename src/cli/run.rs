use crate::config::parse::{load_config, ConfigError};
use crate::state::{DaemonState, SharedState};
use crate::status::load_services;
use crate::watcher::RotationWatcher;
use crate::web::run_server;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("config not found; searched ~/.config/batchlog/config.yml and /etc/batchlog/config.yml (use --config <path> or run 'batchlog config init')")]
    ConfigNotFound,

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("web server error: {0}")]
    WebServer(#[from] std::io::Error),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), RunError> {
    let config_path = config_path.ok_or(RunError::ConfigNotFound)?;
    run_daemon(&config_path).await
}

async fn run_daemon(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = Arc::new(load_config(config_path)?);

    let services = load_services(&config.status_path);
    let state: SharedState = Arc::new(DaemonState::new(config.clone(), services));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    info!(
        logs_path = %config.logs_path.display(),
        interval = ?config.status_update_interval,
        "Starting rotation watcher"
    );
    let watcher = RotationWatcher::new(state.clone());
    let watcher_handle = tokio::spawn(watcher.run(shutdown_rx.clone()));

    info!("Starting web server on {}", config.listen);
    let mut web_handle = tokio::spawn(run_server(state.clone(), shutdown_rx));

    info!("batchlog started, press Ctrl+C to shutdown");

    let web_result = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
            None
        }
        result = &mut web_handle => Some(result),
    };

    let _ = shutdown_tx.send(true);
    state.tails.shutdown();

    let web_result = match web_result {
        Some(result) => result,
        None => web_handle.await,
    };

    match watcher_handle.await {
        Ok(()) => info!("Rotation watcher stopped"),
        Err(e) => error!(error = %e, "Rotation watcher join error"),
    }

    web_result??;
    info!("Shutdown complete");
    Ok(())
}
