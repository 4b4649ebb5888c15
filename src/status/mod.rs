pub mod file;

use crate::config::Config;
use crate::state::{ServiceMap, SharedState};
use crate::tail::TailTask;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sysinfo::{ProcessesToUpdate, System};
use thiserror::Error;

pub use file::{load_services, read_services, write_status};

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("process stats unavailable: {0}")]
    ProcessStats(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusSnapshot {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub payload: StatusPayload,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusPayload {
    pub uptime: i64,
    pub memory_bytes_used: Option<u64>,
    pub open_files: Option<u64>,
    pub config: Config,
    pub services: ServiceMap,
    pub tails_active: Vec<TailTask>,
    pub tails_term: Vec<TailTask>,
}

#[derive(Debug, Clone, Copy)]
struct ProcessStats {
    memory_bytes: u64,
    open_files: Option<u64>,
}

/// Builds health snapshots from the shared daemon state and persists them.
#[derive(Clone)]
pub struct StatusReporter {
    state: SharedState,
}

impl StatusReporter {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Assembles a snapshot. Never fails: if process stats cannot be
    /// collected the snapshot carries that error instead.
    pub async fn snapshot(&self, error: Option<String>) -> StatusSnapshot {
        let now = Utc::now();
        let stats = tokio::task::spawn_blocking(collect_process_stats)
            .await
            .unwrap_or_else(|e| Err(StatusError::ProcessStats(e.to_string())));

        let mut errors: Vec<String> = error.into_iter().collect();
        let (memory_bytes_used, open_files) = match stats {
            Ok(stats) => (Some(stats.memory_bytes), stats.open_files),
            Err(e) => {
                errors.push(format!("Error: {}.", e));
                (None, None)
            }
        };

        let services = self.state.services.read().await.clone();

        StatusSnapshot {
            status: status_text(self.state.launched_at, now).to_string(),
            error: if errors.is_empty() {
                None
            } else {
                Some(errors.join(" "))
            },
            timestamp: now,
            payload: StatusPayload {
                uptime: (now - self.state.launched_at).num_seconds(),
                memory_bytes_used,
                open_files,
                config: (*self.state.config).clone(),
                services,
                tails_active: self.state.tails.active(),
                tails_term: self.state.tails.terminated(),
            },
        }
    }

    /// Writes a snapshot to the configured status path. Failures are logged,
    /// never propagated.
    pub async fn persist(&self, error: Option<String>) {
        let snapshot = self.snapshot(error).await;
        let path = &self.state.config.status_path;
        match write_status(path, &snapshot).await {
            Ok(bytes) => tracing::info!(path = %path.display(), bytes, "Wrote status JSON"),
            Err(e) => tracing::error!(path = %path.display(), error = %e, "Failed to write status JSON"),
        }
    }
}

fn status_text(launched_at: DateTime<Utc>, now: DateTime<Utc>) -> &'static str {
    if now.timestamp() <= launched_at.timestamp() {
        "starting"
    } else {
        "started"
    }
}

fn collect_process_stats() -> Result<ProcessStats, StatusError> {
    let pid = sysinfo::get_current_pid().map_err(|e| StatusError::ProcessStats(e.to_string()))?;
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    let process = system
        .process(pid)
        .ok_or_else(|| StatusError::ProcessStats(format!("process {} not found", pid)))?;

    Ok(ProcessStats {
        memory_bytes: process.memory(),
        open_files: count_open_files(),
    })
}

#[cfg(target_os = "linux")]
fn count_open_files() -> Option<u64> {
    std::fs::read_dir("/proc/self/fd")
        .ok()
        .map(|entries| entries.count() as u64)
}

#[cfg(not(target_os = "linux"))]
fn count_open_files() -> Option<u64> {
    None
}
