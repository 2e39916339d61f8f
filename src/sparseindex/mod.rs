//! Sparse index over a sorted run.
//!
//! One entry per page: `(last key of the page, chunk position of the page)`.
//! A lookup finds the first entry whose key is ≥ the probe; that page is
//! the only one that can hold the probe. Probes above the last key are
//! definitely absent.
//!
//! The index is persisted as a sorted run of `(K, u32)` and re-validated on
//! every load: keys and offsets strictly ascending, first offset zero.


use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::encoding::TypeDescriptor;
use crate::sortedrun::{RunConf, SortedRunError, SortedRunReader, SortedRunWriter};

#[derive(Debug, Error)]
pub enum SparseIndexError {
    #[error(transparent)]
    Run(#[from] SortedRunError),

    /// The entries violate the index invariants.
    #[error("invalid sparse index {path:?}: entry {entry}: {reason}")]
    Corruption {
        path: Option<PathBuf>,
        entry: usize,
        reason: String,
    },
}

/// In-memory sparse index.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseIndex<K> {
    entries: Vec<(K, u32)>,
}

impl<K> Default for SparseIndex<K> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<K: TypeDescriptor> SparseIndex<K> {
    /// Builds an index from writer output, validating it.
    pub fn from_entries(entries: Vec<(K, u32)>) -> Result<Self, SparseIndexError> {
        validate(&entries, None)?;
        Ok(Self { entries })
    }

    /// Loads and validates the index at `path`; a missing file is an empty index.
    pub fn load(path: impl AsRef<Path>, conf: &RunConf) -> Result<Self, SparseIndexError> {
        let path = path.as_ref();
        let reader = SortedRunReader::<K, u32>::open(path, conf)?;
        let entries = reader.iter().collect::<Result<Vec<_>, _>>()?;
        validate(&entries, Some(path))?;
        debug!(path = %path.display(), entries = entries.len(), "sparse index loaded");
        Ok(Self { entries })
    }

    /// Persists the index as a sorted run at `path`.
    pub fn write(&self, path: impl AsRef<Path>, conf: &RunConf) -> Result<(), SparseIndexError> {
        SortedRunWriter::<K, u32>::write_all(path, conf, self.entries.iter().cloned())?;
        Ok(())
    }

    /// Chunk position of the only page that may hold `key`.
    pub fn find(&self, key: &K) -> Option<u32> {
        let idx = self.entries.partition_point(|(last, _)| last < key);
        self.entries.get(idx).map(|(_, position)| *position)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Largest key of the indexed run.
    pub fn max_key(&self) -> Option<&K> {
        self.entries.last().map(|(k, _)| k)
    }

    pub fn entries(&self) -> &[(K, u32)] {
        &self.entries
    }
}

/// Checks the ordering invariants of a sparse index.
pub fn validate<K: TypeDescriptor>(
    entries: &[(K, u32)],
    path: Option<&Path>,
) -> Result<(), SparseIndexError> {
    let fail = |entry: usize, reason: String| {
        warn!(?path, entry, %reason, "sparse index validation failed");
        SparseIndexError::Corruption {
            path: path.map(Path::to_path_buf),
            entry,
            reason,
        }
    };

    if let Some((_, first)) = entries.first() {
        if *first != 0 {
            return Err(fail(0, format!("first offset is {first}, expected 0")));
        }
    }
    for (i, pair) in entries.windows(2).enumerate() {
        let ((prev_key, prev_pos), (key, pos)) = (&pair[0], &pair[1]);
        if key <= prev_key {
            return Err(fail(
                i + 1,
                format!("key {key:?} not greater than previous {prev_key:?}"),
            ));
        }
        if pos <= prev_pos {
            return Err(fail(
                i + 1,
                format!("offset {pos} not greater than previous {prev_pos}"),
            ));
        }
    }
    Ok(())
}
