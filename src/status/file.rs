use super::{StatusError, StatusSnapshot};
use crate::state::ServiceMap;
use serde::Deserialize;
use std::path::Path;

/// The part of a persisted status file that survives a restart.
#[derive(Debug, Deserialize)]
struct PersistedStatus {
    #[serde(rename = "Payload")]
    payload: PersistedPayload,
}

#[derive(Debug, Deserialize)]
struct PersistedPayload {
    #[serde(rename = "Services", default)]
    services: ServiceMap,
}

/// Writes the snapshot atomically, creating the parent directory.
pub async fn write_status(path: &Path, snapshot: &StatusSnapshot) -> Result<usize, StatusError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let content = serde_json::to_vec_pretty(snapshot)?;
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    tokio::fs::write(&tmp_name, &content).await?;
    tokio::fs::rename(&tmp_name, path).await?;

    tracing::debug!(path = %path.display(), bytes = content.len(), "Wrote status file");
    Ok(content.len())
}

/// Reads the batch mappings out of a previous status file.
pub fn read_services(path: &Path) -> Result<Option<ServiceMap>, StatusError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let persisted: PersistedStatus = serde_json::from_str(&raw)?;
    Ok(Some(persisted.payload.services))
}

/// Restores batch mappings at startup. A missing or unreadable file means an
/// empty start; tail lists are never restored.
pub fn load_services(path: &Path) -> ServiceMap {
    match read_services(path) {
        Ok(Some(services)) => {
            tracing::info!(
                path = %path.display(),
                services = services.len(),
                "Restored batch mappings from status file"
            );
            services
        }
        Ok(None) => {
            tracing::info!(path = %path.display(), "No status file found, starting fresh");
            ServiceMap::new()
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Error reading state from disk, starting fresh");
            ServiceMap::new()
        }
    }
}
