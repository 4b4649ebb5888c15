use super::is_rotated_file;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::io;
use std::path::Path;

/// Read-only view of the log root.
///
/// Implementations make no consistency promise between two calls: the
/// rotation tool may rename or delete files at any moment.
#[async_trait]
pub trait DirectoryScanner: Send + Sync {
    /// Archived files in a service directory (names carrying the rotation marker).
    async fn list_rotated(&self, service_dir: &Path) -> io::Result<BTreeSet<String>>;

    /// Size in bytes of a single file.
    async fn stat_size(&self, path: &Path) -> io::Result<u64>;

    /// Service directories directly under the log root.
    async fn list_services(&self, root: &Path) -> io::Result<Vec<String>>;
}

/// Scanner backed by the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsScanner;

#[async_trait]
impl DirectoryScanner for FsScanner {
    async fn list_rotated(&self, service_dir: &Path) -> io::Result<BTreeSet<String>> {
        let mut entries = tokio::fs::read_dir(service_dir).await?;
        let mut rotated = BTreeSet::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if is_rotated_file(name) {
                    rotated.insert(name.to_string());
                }
            }
        }
        Ok(rotated)
    }

    async fn stat_size(&self, path: &Path) -> io::Result<u64> {
        Ok(tokio::fs::metadata(path).await?.len())
    }

    async fn list_services(&self, root: &Path) -> io::Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(root).await?;
        let mut services = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                services.push(name.to_string());
            }
        }
        services.sort();
        Ok(services)
    }
}
