use super::resolver::{next_id, resolve, ResolveError, UnmappedPolicy};
use super::scanner::DirectoryScanner;
use super::{BatchDescriptor, BatchMapping, RawFileEntry, CURRENT_FILE};
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Upper bound for the delay between two listing attempts.
const MAX_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("service directory not found: {0}")]
    ServiceNotFound(PathBuf),

    #[error(transparent)]
    Unresolved(#[from] ResolveError),

    #[error("directory kept changing during listing, gave up after {attempts} attempts")]
    StaleDirectoryRace { attempts: u32 },

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct ListingOptions {
    /// Attempts made before giving up with `StaleDirectoryRace`.
    pub max_retries: u32,
    /// Delay after the first raced attempt, doubled after each further one.
    pub retry_delay: Duration,
}

impl Default for ListingOptions {
    fn default() -> Self {
        Self {
            max_retries: 10,
            retry_delay: Duration::from_millis(5),
        }
    }
}

enum Attempt {
    Listed(Vec<BatchDescriptor>),
    Raced,
}

/// Lists a service's batches, most recent first, including `current`.
///
/// Ids come from `mapping` under the strict policy: listing never invents an
/// id for a file whose chain has no anchor in the mapping. The directory is
/// listed again after the per-file stats and the whole result is discarded
/// if the set of rotated files moved underneath us.
pub async fn list_batches(
    scanner: &dyn DirectoryScanner,
    service_dir: &Path,
    mapping: &BatchMapping,
    options: ListingOptions,
) -> Result<Vec<BatchDescriptor>, ListingError> {
    let attempts = options.max_retries.max(1);
    let mut backoff = options.retry_delay;
    for attempt in 1..=attempts {
        match list_once(scanner, service_dir, mapping).await? {
            Attempt::Listed(batches) => return Ok(batches),
            Attempt::Raced if attempt < attempts => {
                tracing::debug!(
                    path = %service_dir.display(),
                    attempt,
                    backoff_ms = backoff.as_millis(),
                    "Directory changed during listing, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, MAX_RETRY_DELAY);
            }
            Attempt::Raced => {}
        }
    }

    tracing::warn!(
        path = %service_dir.display(),
        attempts,
        "Giving up on listing, directory never settled"
    );
    Err(ListingError::StaleDirectoryRace { attempts })
}

async fn list_once(
    scanner: &dyn DirectoryScanner,
    service_dir: &Path,
    mapping: &BatchMapping,
) -> Result<Attempt, ListingError> {
    let before = match scanner.list_rotated(service_dir).await {
        Ok(names) => names,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ListingError::ServiceNotFound(service_dir.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::with_capacity(before.len());
    for name in &before {
        match scanner.stat_size(&service_dir.join(name)).await {
            Ok(size) => files.push(RawFileEntry::new(name.clone(), size)),
            // Renamed or deleted since the listing.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Attempt::Raced),
            Err(e) => return Err(e.into()),
        }
    }

    let resolution = resolve(mapping, files, UnmappedPolicy::Strict)?;
    let current_id = match resolution.last_id() {
        Some(id) => next_id(id)?,
        None => 1,
    };

    let current_size = match scanner.stat_size(&service_dir.join(CURRENT_FILE)).await {
        Ok(size) => size,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Attempt::Raced),
        Err(e) => return Err(e.into()),
    };

    let after: BTreeSet<String> = scanner.list_rotated(service_dir).await?;
    if after != before {
        return Ok(Attempt::Raced);
    }

    let mut batches = resolution.batches;
    batches.push(BatchDescriptor {
        file_name: CURRENT_FILE.to_string(),
        batch_id: current_id,
        size_bytes: current_size,
    });
    batches.reverse();
    Ok(Attempt::Listed(batches))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::FsScanner;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, len: usize) {
        fs::write(dir.join(name), vec![b'x'; len]).unwrap();
    }

    #[tokio::test]
    async fn test_lists_most_recent_first() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "@a", 10);
        write(temp_dir.path(), "@b", 20);
        write(temp_dir.path(), "current", 5);
        let mapping = BatchMapping::from([("@a".to_string(), 1), ("@b".to_string(), 2)]);

        let batches = list_batches(&FsScanner, temp_dir.path(), &mapping, ListingOptions::default())
            .await
            .unwrap();

        let summary: Vec<_> = batches
            .iter()
            .map(|b| (b.file_name.as_str(), b.batch_id, b.size_bytes))
            .collect();
        assert_eq!(summary, vec![("current", 3, 5), ("@b", 2, 20), ("@a", 1, 10)]);
    }

    #[tokio::test]
    async fn test_current_only_gets_id_one() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "current", 3);

        let batches = list_batches(
            &FsScanner,
            temp_dir.path(),
            &BatchMapping::new(),
            ListingOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].batch_id, 1);
        assert!(batches[0].is_current());
    }

    #[tokio::test]
    async fn test_unmapped_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "@a", 1);
        write(temp_dir.path(), "current", 1);

        let err = list_batches(
            &FsScanner,
            temp_dir.path(),
            &BatchMapping::new(),
            ListingOptions::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ListingError::Unresolved(_)));
    }

    #[tokio::test]
    async fn test_missing_service_directory() {
        let temp_dir = TempDir::new().unwrap();
        let err = list_batches(
            &FsScanner,
            &temp_dir.path().join("ghost"),
            &BatchMapping::new(),
            ListingOptions::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ListingError::ServiceNotFound(_)));
    }

    #[tokio::test]
    async fn test_current_id_overflow_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "@a.s", 1);
        write(temp_dir.path(), "current", 1);
        let mapping = BatchMapping::from([("@a.s".to_string(), u64::MAX)]);

        let err = list_batches(&FsScanner, temp_dir.path(), &mapping, ListingOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ListingError::Unresolved(ResolveError::IdOverflow { after: u64::MAX })
        ));
    }

    #[tokio::test]
    async fn test_listing_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "@a.s", 4);
        write(temp_dir.path(), "current", 2);
        let mapping = BatchMapping::from([("@a.s".to_string(), 9)]);

        let first = list_batches(&FsScanner, temp_dir.path(), &mapping, ListingOptions::default())
            .await
            .unwrap();
        let second = list_batches(&FsScanner, temp_dir.path(), &mapping, ListingOptions::default())
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    /// Reports a different rotated set on every second listing call until
    /// `settle_after` listings have been served.
    struct FlappingScanner {
        calls: AtomicU32,
        settle_after: u32,
    }

    #[async_trait]
    impl DirectoryScanner for FlappingScanner {
        async fn list_rotated(&self, _service_dir: &Path) -> io::Result<BTreeSet<String>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let mut names = BTreeSet::from(["@a".to_string()]);
            if call < self.settle_after && call % 2 == 1 {
                names.insert("@b".to_string());
            }
            Ok(names)
        }

        async fn stat_size(&self, _path: &Path) -> io::Result<u64> {
            Ok(1)
        }

        async fn list_services(&self, _root: &Path) -> io::Result<Vec<String>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_retries_until_directory_settles() {
        let scanner = FlappingScanner {
            calls: AtomicU32::new(0),
            settle_after: 4,
        };
        let mapping = BatchMapping::from([("@a".to_string(), 1)]);

        let batches = list_batches(&scanner, Path::new("/logs/svc"), &mapping, ListingOptions::default())
            .await
            .unwrap();

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].batch_id, 2);
        // Two raced attempts, then a clean one.
        assert_eq!(scanner.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_gives_up_after_bounded_retries() {
        let scanner = FlappingScanner {
            calls: AtomicU32::new(0),
            settle_after: u32::MAX,
        };
        let mapping = BatchMapping::from([("@a".to_string(), 1), ("@b".to_string(), 2)]);

        let err = list_batches(
            &scanner,
            Path::new("/logs/svc"),
            &mapping,
            ListingOptions {
                max_retries: 3,
                retry_delay: Duration::from_millis(1),
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ListingError::StaleDirectoryRace { attempts: 3 }));
    }

    /// Current disappears for the first stat, as during a rename by the
    /// rotation tool.
    struct RotatingCurrentScanner {
        current_stats: AtomicU32,
    }

    #[async_trait]
    impl DirectoryScanner for RotatingCurrentScanner {
        async fn list_rotated(&self, _service_dir: &Path) -> io::Result<BTreeSet<String>> {
            Ok(BTreeSet::new())
        }

        async fn stat_size(&self, _path: &Path) -> io::Result<u64> {
            if self.current_stats.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(io::Error::from(io::ErrorKind::NotFound))
            } else {
                Ok(42)
            }
        }

        async fn list_services(&self, _root: &Path) -> io::Result<Vec<String>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_vanished_current_counts_as_race() {
        let scanner = RotatingCurrentScanner {
            current_stats: AtomicU32::new(0),
        };

        let batches = list_batches(
            &scanner,
            Path::new("/logs/svc"),
            &BatchMapping::new(),
            ListingOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(batches[0].size_bytes, 42);
    }
    /// Hides `current` until `visible_at`, like a rotation tool that renames
    /// it away and recreates it a few milliseconds later.
    struct SlowRecreateScanner {
        visible_at: tokio::time::Instant,
    }

    #[async_trait]
    impl DirectoryScanner for SlowRecreateScanner {
        async fn list_rotated(&self, _service_dir: &Path) -> io::Result<BTreeSet<String>> {
            Ok(BTreeSet::new())
        }

        async fn stat_size(&self, _path: &Path) -> io::Result<u64> {
            if tokio::time::Instant::now() < self.visible_at {
                Err(io::Error::from(io::ErrorKind::NotFound))
            } else {
                Ok(7)
            }
        }

        async fn list_services(&self, _root: &Path) -> io::Result<Vec<String>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_backoff_outlasts_short_rotation_gap() {
        let scanner = SlowRecreateScanner {
            visible_at: tokio::time::Instant::now() + Duration::from_millis(30),
        };

        let batches = list_batches(
            &scanner,
            Path::new("/logs/svc"),
            &BatchMapping::new(),
            ListingOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].size_bytes, 7);
    }

    #[tokio::test]
    async fn test_backoff_grows_between_attempts() {
        let scanner = FlappingScanner {
            calls: AtomicU32::new(0),
            settle_after: u32::MAX,
        };
        let mapping = BatchMapping::from([("@a".to_string(), 1), ("@b".to_string(), 2)]);
        let started = std::time::Instant::now();

        let err = list_batches(
            &scanner,
            Path::new("/logs/svc"),
            &mapping,
            ListingOptions {
                max_retries: 4,
                retry_delay: Duration::from_millis(20),
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ListingError::StaleDirectoryRace { attempts: 4 }));
        // 20 + 40 + 80, no sleep after the last attempt.
        assert!(started.elapsed() >= Duration::from_millis(140));
    }
}
