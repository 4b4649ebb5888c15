use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Root directory holding one subdirectory per service.
    pub logs_path: PathBuf,
    #[serde(default = "default_status_path")]
    pub status_path: PathBuf,
    #[serde(default = "default_status_update_interval", with = "humantime_serde")]
    pub status_update_interval: Duration,
    #[serde(default = "default_skip_batches_on_mismatch")]
    pub skip_batches_on_mismatch: u64,
    #[serde(default)]
    pub listing: ListingConfig,
    #[serde(default)]
    pub tail: TailConfig,
}

impl Config {
    /// Config with every optional field at its default.
    pub fn new(logs_path: impl Into<PathBuf>) -> Self {
        Self {
            listen: default_listen(),
            logs_path: logs_path.into(),
            status_path: default_status_path(),
            status_update_interval: default_status_update_interval(),
            skip_batches_on_mismatch: default_skip_batches_on_mismatch(),
            listing: ListingConfig::default(),
            tail: TailConfig::default(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_status_path() -> PathBuf {
    PathBuf::from("./status/status.json")
}

fn default_status_update_interval() -> Duration {
    Duration::from_secs(20)
}

fn default_skip_batches_on_mismatch() -> u64 {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First pause between raced attempts; doubles up to 500ms.
    #[serde(default = "default_retry_delay", with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
        }
    }
}

fn default_max_retries() -> u32 {
    10
}

fn default_retry_delay() -> Duration {
    Duration::from_millis(5)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TailConfig {
    /// Follow-capable executable, invoked with GNU/busybox `tail` flags.
    #[serde(default = "default_tail_program")]
    pub program: PathBuf,
    #[serde(default = "default_rotation_check_interval", with = "humantime_serde")]
    pub rotation_check_interval: Duration,
    /// How many times one follow request may re-resolve after rotations.
    #[serde(default = "default_max_reresolve")]
    pub max_reresolve: u32,
    /// Time between SIGTERM and SIGKILL.
    #[serde(default = "default_termination_grace", with = "humantime_serde")]
    pub termination_grace: Duration,
    #[serde(default = "default_retention", with = "humantime_serde")]
    pub retention: Duration,
    #[serde(default = "default_max_terminated")]
    pub max_terminated: usize,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            program: default_tail_program(),
            rotation_check_interval: default_rotation_check_interval(),
            max_reresolve: default_max_reresolve(),
            termination_grace: default_termination_grace(),
            retention: default_retention(),
            max_terminated: default_max_terminated(),
        }
    }
}

fn default_tail_program() -> PathBuf {
    PathBuf::from("tail")
}

fn default_rotation_check_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_max_reresolve() -> u32 {
    16
}

fn default_termination_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_retention() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_max_terminated() -> usize {
    100
}
