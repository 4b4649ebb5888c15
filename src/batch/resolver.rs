use super::{BatchDescriptor, BatchId, BatchMapping, RawFileEntry};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("stale mapping, cannot resolve batch id for '{file_name}'")]
    UnresolvedBatchId { file_name: String },

    #[error("batch id space exhausted after id {after}")]
    IdOverflow { after: BatchId },
}

/// What to do with a file that has neither a mapping entry nor a
/// predecessor in the current pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmappedPolicy {
    /// Assign this id.
    Seed(BatchId),
    /// Refuse to invent an id.
    Strict,
}

impl UnmappedPolicy {
    /// Cold start seeds at 1. Otherwise jump past the highest known id by
    /// `skip`, so a reader following an old id sees a discontinuity instead
    /// of a silently reused number.
    pub fn tolerant(last_mapping: &BatchMapping, skip: u64) -> Result<Self, ResolveError> {
        match max_known_id(last_mapping) {
            Some(max) => max
                .checked_add(skip)
                .map(UnmappedPolicy::Seed)
                .ok_or(ResolveError::IdOverflow { after: max }),
            None => Ok(UnmappedPolicy::Seed(1)),
        }
    }
}

/// Output of a resolver pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Mapping for exactly the files seen in this pass.
    pub mapping: BatchMapping,
    /// Descriptors in chronological order (ascending id).
    pub batches: Vec<BatchDescriptor>,
}

impl Resolution {
    pub fn last_id(&self) -> Option<BatchId> {
        self.batches.last().map(|b| b.batch_id)
    }
}

/// Highest id in a mapping, ignoring the reserved id 0.
pub fn max_known_id(mapping: &BatchMapping) -> Option<BatchId> {
    mapping.values().copied().filter(|id| *id > 0).max()
}

/// The id directly after `id`.
pub fn next_id(id: BatchId) -> Result<BatchId, ResolveError> {
    id.checked_add(1).ok_or(ResolveError::IdOverflow { after: id })
}

/// Assigns stable ids to rotated files.
///
/// Files are walked in chronological order. A file keeps the id it already
/// has in `last_mapping`; a new file directly follows its predecessor; a
/// new file with no predecessor is handed to `on_unmapped`.
pub fn resolve(
    last_mapping: &BatchMapping,
    mut files: Vec<RawFileEntry>,
    on_unmapped: UnmappedPolicy,
) -> Result<Resolution, ResolveError> {
    files.sort_by(|a, b| {
        a.clean_filename
            .cmp(&b.clean_filename)
            .then_with(|| a.file_name.cmp(&b.file_name))
    });

    let mut mapping = BatchMapping::new();
    let mut batches = Vec::with_capacity(files.len());
    let mut prev_id: Option<BatchId> = None;

    for file in files {
        let known = last_mapping.get(&file.file_name).copied().filter(|id| *id > 0);
        let batch_id = match (known, prev_id) {
            (Some(id), _) => id,
            (None, Some(prev)) => next_id(prev)?,
            (None, None) => match on_unmapped {
                UnmappedPolicy::Seed(seed) => seed.max(1),
                UnmappedPolicy::Strict => {
                    return Err(ResolveError::UnresolvedBatchId {
                        file_name: file.file_name,
                    })
                }
            },
        };

        mapping.insert(file.file_name.clone(), batch_id);
        batches.push(BatchDescriptor {
            file_name: file.file_name,
            batch_id,
            size_bytes: file.size_bytes,
        });
        prev_id = Some(batch_id);
    }

    Ok(Resolution { mapping, batches })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(names: &[&str]) -> Vec<RawFileEntry> {
        names.iter().map(|n| RawFileEntry::new(*n, 0)).collect()
    }

    fn ids(resolution: &Resolution) -> Vec<(String, BatchId)> {
        resolution
            .batches
            .iter()
            .map(|b| (b.file_name.clone(), b.batch_id))
            .collect()
    }

    #[test]
    fn test_cold_start_seeds_at_one() {
        let resolution = resolve(
            &BatchMapping::new(),
            entries(&["@b.s", "@a.s", "@c.u"]),
            UnmappedPolicy::Seed(1),
        )
        .unwrap();

        assert_eq!(
            ids(&resolution),
            vec![
                ("@a.s".to_string(), 1),
                ("@b.s".to_string(), 2),
                ("@c.u".to_string(), 3)
            ]
        );
        assert_eq!(resolution.mapping.len(), 3);
        assert_eq!(resolution.last_id(), Some(3));
    }

    #[test]
    fn test_known_files_keep_their_ids() {
        let last = BatchMapping::from([("@a.s".to_string(), 7), ("@b.s".to_string(), 8)]);
        let resolution = resolve(&last, entries(&["@a.s", "@b.s", "@c.s"]), UnmappedPolicy::Strict)
            .unwrap();

        assert_eq!(
            ids(&resolution),
            vec![
                ("@a.s".to_string(), 7),
                ("@b.s".to_string(), 8),
                ("@c.s".to_string(), 9)
            ]
        );
    }

    #[test]
    fn test_removed_files_drop_out_of_mapping() {
        let last = BatchMapping::from([("@a.s".to_string(), 1), ("@b.s".to_string(), 2)]);
        let resolution = resolve(&last, entries(&["@b.s", "@c.s"]), UnmappedPolicy::Strict).unwrap();

        assert!(!resolution.mapping.contains_key("@a.s"));
        assert_eq!(resolution.mapping.get("@b.s"), Some(&2));
        assert_eq!(resolution.mapping.get("@c.s"), Some(&3));
    }

    #[test]
    fn test_strict_policy_refuses_to_invent_ids() {
        let err = resolve(
            &BatchMapping::new(),
            entries(&["@a.s"]),
            UnmappedPolicy::Strict,
        )
        .unwrap_err();

        assert_eq!(
            err,
            ResolveError::UnresolvedBatchId {
                file_name: "@a.s".to_string()
            }
        );
    }

    #[test]
    fn test_strict_policy_with_no_files_is_ok() {
        let resolution = resolve(&BatchMapping::new(), vec![], UnmappedPolicy::Strict).unwrap();
        assert!(resolution.batches.is_empty());
        assert_eq!(resolution.last_id(), None);
    }

    #[test]
    fn test_tolerant_policy_skips_past_gap() {
        let last = BatchMapping::from([("@old1.s".to_string(), 4), ("@old2.s".to_string(), 5)]);
        let policy = UnmappedPolicy::tolerant(&last, 3).unwrap();
        assert_eq!(policy, UnmappedPolicy::Seed(8));

        // Every file the mapping knew about is gone.
        let resolution = resolve(&last, entries(&["@new1.s", "@new2.s"]), policy).unwrap();
        assert_eq!(
            ids(&resolution),
            vec![("@new1.s".to_string(), 8), ("@new2.s".to_string(), 9)]
        );
    }

    #[test]
    fn test_tolerant_policy_on_empty_mapping_is_cold_start() {
        assert_eq!(
            UnmappedPolicy::tolerant(&BatchMapping::new(), 3),
            Ok(UnmappedPolicy::Seed(1))
        );
    }

    #[test]
    fn test_ids_near_the_top_overflow_into_an_error() {
        let last = BatchMapping::from([("@a.s".to_string(), u64::MAX - 1)]);
        assert_eq!(
            UnmappedPolicy::tolerant(&last, 3),
            Err(ResolveError::IdOverflow { after: u64::MAX - 1 })
        );

        // @b.s follows the mapped @a.s, and @c.s would need MAX + 1.
        let last = BatchMapping::from([("@a.s".to_string(), u64::MAX - 1)]);
        let err = resolve(&last, entries(&["@a.s", "@b.s", "@c.s"]), UnmappedPolicy::Strict)
            .unwrap_err();
        assert_eq!(err, ResolveError::IdOverflow { after: u64::MAX });
    }

    #[test]
    fn test_zero_is_treated_as_unmapped() {
        let last = BatchMapping::from([("@a.s".to_string(), 0)]);
        assert_eq!(max_known_id(&last), None);

        let resolution = resolve(&last, entries(&["@a.s"]), UnmappedPolicy::Seed(1)).unwrap();
        assert_eq!(resolution.mapping.get("@a.s"), Some(&1));

        let err = resolve(&last, entries(&["@a.s"]), UnmappedPolicy::Strict);
        assert!(err.is_err());
    }

    #[test]
    fn test_ids_are_stable_across_repeated_rotations() {
        let mut mapping = BatchMapping::new();
        let mut names: Vec<String> = Vec::new();
        let mut seen: BatchMapping = BatchMapping::new();

        for step in 0..20u32 {
            names.push(format!("@{:08}.s", step));
            // The rotation tool keeps at most five archives.
            if names.len() > 5 {
                names.remove(0);
            }
            let files = names.iter().map(|n| RawFileEntry::new(n.clone(), 0)).collect();
            let policy = UnmappedPolicy::tolerant(&mapping, 3).unwrap();
            let resolution = resolve(&mapping, files, policy).unwrap();

            for (name, id) in &resolution.mapping {
                if let Some(previous) = seen.insert(name.clone(), *id) {
                    assert_eq!(previous, *id, "id for {} changed", name);
                }
            }
            let ordered: Vec<BatchId> = resolution.batches.iter().map(|b| b.batch_id).collect();
            assert!(ordered.windows(2).all(|w| w[0] < w[1]));
            mapping = resolution.mapping;
        }

        assert_eq!(max_known_id(&mapping), Some(20));
    }
}
