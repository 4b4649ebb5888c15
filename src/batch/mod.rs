pub mod listing;
pub mod resolver;
pub mod scanner;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use listing::{list_batches, ListingError, ListingOptions};
pub use resolver::{resolve, Resolution, ResolveError, UnmappedPolicy};
pub use scanner::{DirectoryScanner, FsScanner};

/// Positive batch identifier. `0` is reserved and never assigned.
pub type BatchId = u64;

/// Per-service table from physical file name to batch id.
pub type BatchMapping = BTreeMap<String, BatchId>;

/// Name of the live, still-growing log file in every service directory.
pub const CURRENT_FILE: &str = "current";

/// Prefix the rotation tool puts on archived files.
pub const ROTATION_MARKER: char = '@';

/// One file found in a service directory, before id assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFileEntry {
    pub file_name: String,
    pub clean_filename: String,
    pub size_bytes: u64,
}

impl RawFileEntry {
    pub fn new(file_name: impl Into<String>, size_bytes: u64) -> Self {
        let file_name = file_name.into();
        let clean_filename = clean_filename(&file_name);
        Self {
            file_name,
            clean_filename,
            size_bytes,
        }
    }
}

/// A batch as exposed over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDescriptor {
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "id")]
    pub batch_id: BatchId,
    #[serde(rename = "batchSize")]
    pub size_bytes: u64,
}

impl BatchDescriptor {
    pub fn is_current(&self) -> bool {
        self.file_name == CURRENT_FILE
    }
}

/// Strips the rotation marker and the state suffix (`.s` complete, `.u`
/// unfinished) so that the remaining key sorts chronologically.
pub fn clean_filename(file_name: &str) -> String {
    let name = file_name
        .strip_prefix(ROTATION_MARKER)
        .unwrap_or(file_name);
    let name = name
        .strip_suffix(".s")
        .or_else(|| name.strip_suffix(".u"))
        .unwrap_or(name);
    name.to_string()
}

/// Whether a directory entry is an archived (rotated) log file.
pub fn is_rotated_file(file_name: &str) -> bool {
    file_name.starts_with(ROTATION_MARKER)
}

/// Service names are single directory components under the log root.
pub fn is_valid_service_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}
