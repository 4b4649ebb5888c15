use crate::batch::{
    is_valid_service_name, list_batches, BatchDescriptor, BatchMapping, DirectoryScanner,
    FsScanner, ListingError, ListingOptions,
};
use crate::config::Config;
use crate::tail::TailManager;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Rotation bookkeeping for one service directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRotationState {
    #[serde(default)]
    pub mapping: BatchMapping,
    /// Text of the last failed scan, cleared by the next good one.
    #[serde(default, rename = "lastError", skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

pub type ServiceMap = BTreeMap<String, ServiceRotationState>;

/// Everything the watcher, the HTTP handlers and the status reporter share.
pub struct DaemonState {
    pub config: Arc<Config>,
    pub services: RwLock<ServiceMap>,
    pub tails: TailManager,
    pub scanner: Arc<dyn DirectoryScanner>,
    pub launched_at: DateTime<Utc>,
}

pub type SharedState = Arc<DaemonState>;

impl DaemonState {
    pub fn new(config: Arc<Config>, services: ServiceMap) -> Self {
        Self::with_scanner(config, services, Arc::new(FsScanner))
    }

    pub fn with_scanner(
        config: Arc<Config>,
        services: ServiceMap,
        scanner: Arc<dyn DirectoryScanner>,
    ) -> Self {
        let tails = TailManager::new(config.tail.clone());
        Self {
            config,
            services: RwLock::new(services),
            tails,
            scanner,
            launched_at: Utc::now(),
        }
    }

    /// Directory holding a service's log files.
    pub fn service_dir(&self, service: &str) -> PathBuf {
        self.config.logs_path.join(service)
    }

    /// Copy of the persisted mapping for a service (empty if never scanned).
    pub async fn mapping_for(&self, service: &str) -> BatchMapping {
        self.services
            .read()
            .await
            .get(service)
            .map(|s| s.mapping.clone())
            .unwrap_or_default()
    }

    /// Race-tolerant listing of a service's batches against its persisted mapping.
    pub async fn list_batches(&self, service: &str) -> Result<Vec<BatchDescriptor>, ListingError> {
        let service_dir = self.service_dir(service);
        if !is_valid_service_name(service) {
            return Err(ListingError::ServiceNotFound(service_dir));
        }
        let mapping = self.mapping_for(service).await;
        let options = ListingOptions {
            max_retries: self.config.listing.max_retries,
            retry_delay: self.config.listing.retry_delay,
        };
        list_batches(self.scanner.as_ref(), &service_dir, &mapping, options).await
    }
}
