use crate::batch::{is_valid_service_name, resolve, BatchMapping, RawFileEntry, UnmappedPolicy};
use crate::state::SharedState;
use crate::status::StatusReporter;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("couldn't list services in {path}: {source}")]
    ListServices {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of one scan over all services.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub scanned: usize,
    /// `(service, error text)` for every service that failed.
    pub failures: Vec<(String, String)>,
}

/// Periodically rescans every service directory and refreshes its mapping.
pub struct RotationWatcher {
    state: SharedState,
    reporter: StatusReporter,
}

impl RotationWatcher {
    pub fn new(state: SharedState) -> Self {
        let reporter = StatusReporter::new(state.clone());
        Self { state, reporter }
    }

    /// Runs a pass now, then one every `status_update_interval` until shutdown.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.state.config.status_update_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval = ?self.state.config.status_update_interval,
            "Rotation watcher started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                _ = async { let _ = shutdown_rx.wait_for(|&v| v).await; } => {
                    info!("Rotation watcher shutting down");
                    break;
                }
            }
        }
    }

    /// One pass plus the status write that always follows it.
    pub async fn tick(&self) {
        self.state.tails.prune();
        match self.scan_all().await {
            Ok(report) => {
                debug!(
                    scanned = report.scanned,
                    failed = report.failures.len(),
                    "Rotation scan finished"
                );
                self.reporter.persist(None).await;
            }
            Err(e) => {
                error!(error = %e, "Exception thrown during rotation scan");
                self.reporter.persist(Some(format!("Error: {}.", e))).await;
            }
        }
    }

    /// Scans every service directory under the log root.
    pub async fn scan_all(&self) -> Result<PassReport, WatcherError> {
        let root = &self.state.config.logs_path;
        let services = self
            .state
            .scanner
            .list_services(root)
            .await
            .map_err(|source| WatcherError::ListServices {
                path: root.display().to_string(),
                source,
            })?;

        let mut report = PassReport::default();
        for service in services.iter().filter(|s| is_valid_service_name(s)) {
            report.scanned += 1;
            if let Err(message) = self.scan_service(service).await {
                report.failures.push((service.clone(), message));
            }
        }
        Ok(report)
    }

    /// Refreshes one service's mapping. On failure the previous mapping is
    /// kept and the error is recorded on the service.
    pub async fn scan_service(&self, service: &str) -> Result<(), String> {
        let service_dir = self.state.service_dir(service);
        let last_mapping: BatchMapping = self.state.mapping_for(service).await;

        let result = match self.state.scanner.list_rotated(&service_dir).await {
            Ok(names) => {
                let files = names.into_iter().map(|name| RawFileEntry::new(name, 0)).collect();
                UnmappedPolicy::tolerant(&last_mapping, self.state.config.skip_batches_on_mismatch)
                    .and_then(|policy| resolve(&last_mapping, files, policy))
                    .map_err(|e| e.to_string())
            }
            Err(e) => Err(e.to_string()),
        };

        let mut services = self.state.services.write().await;
        let entry = services.entry(service.to_string()).or_default();
        match result {
            Ok(resolution) => {
                if resolution.mapping != entry.mapping {
                    debug!(
                        service,
                        files = resolution.mapping.len(),
                        last_id = ?resolution.last_id(),
                        "Batch mapping updated"
                    );
                }
                entry.mapping = resolution.mapping;
                entry.last_error = None;
                Ok(())
            }
            Err(message) => {
                let message = format!(
                    "Couldn't check rotation status for: {} with error: {}",
                    service_dir.display(),
                    message
                );
                warn!(service, error = %message, "Rotation scan failed");
                entry.last_error = Some(message.clone());
                Err(message)
            }
        }
    }
}
