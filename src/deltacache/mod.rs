//! # Delta cache
//!
//! The mutable, in-memory layer of a segment. Writes land here as
//! `key → value` (a tombstone value marks a delete) and are folded into the
//! base run by compaction.
//!
//! Durability between compactions comes from *overflow files*: sorted runs
//! holding the keys written since the previous flush. On open the segment
//! replays its registered overflow files in registration order, so the
//! last write of every key wins.
//!
//! ## Concurrency
//! - One `RwLock` around an ordered map; every mutation is a single locked
//!   map operation, so concurrent writers to one key resolve last-write-wins.
//! - A poisoned lock surfaces as [`DeltaCacheError::Internal`].

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::{debug, error, trace};

use crate::encoding::TypeDescriptor;
use crate::sortedrun::{RunConf, RunSummary, SortedRunError, SortedRunReader, SortedRunWriter};

#[derive(Debug, Error)]
pub enum DeltaCacheError {
    #[error(transparent)]
    Run(#[from] SortedRunError),

    /// Poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

struct DeltaInner<K, V> {
    entries: BTreeMap<K, V>,
    /// Keys written since the last successful flush.
    unflushed: BTreeSet<K>,
}

/// Ordered in-memory map of recent writes.
pub struct DeltaCache<K, V> {
    inner: RwLock<DeltaInner<K, V>>,
}

impl<K: TypeDescriptor, V: TypeDescriptor> Default for DeltaCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: TypeDescriptor, V: TypeDescriptor> DeltaCache<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(DeltaInner {
                entries: BTreeMap::new(),
                unflushed: BTreeSet::new(),
            }),
        }
    }

    /// Rebuilds the cache from overflow files, applied in the given order.
    ///
    /// Replayed entries are already durable, so nothing is marked unflushed.
    pub fn replay(files: &[PathBuf], conf: &RunConf) -> Result<Self, DeltaCacheError> {
        let cache = Self::new();
        {
            let mut inner = cache.write_lock()?;
            for path in files {
                let reader = SortedRunReader::<K, V>::open(path, conf)?;
                let mut count = 0usize;
                for entry in reader.iter() {
                    let (key, value) = entry?;
                    inner.entries.insert(key, value);
                    count += 1;
                }
                debug!(path = %path.display(), entries = count, "overflow file replayed");
            }
        }
        Ok(cache)
    }

    fn read_lock(&self) -> Result<RwLockReadGuard<'_, DeltaInner<K, V>>, DeltaCacheError> {
        self.inner.read().map_err(|_| {
            error!("Read-write lock poisoned in delta cache");
            DeltaCacheError::Internal("RwLock poisoned".into())
        })
    }

    fn write_lock(&self) -> Result<RwLockWriteGuard<'_, DeltaInner<K, V>>, DeltaCacheError> {
        self.inner.write().map_err(|_| {
            error!("Read-write lock poisoned in delta cache");
            DeltaCacheError::Internal("RwLock poisoned".into())
        })
    }

    // --------------------------------------------------------------------------------------------
    // Reads and writes
    // --------------------------------------------------------------------------------------------

    /// Inserts or replaces `key`. A tombstone value records a delete.
    pub fn put(&self, key: K, value: V) -> Result<(), DeltaCacheError> {
        trace!(?key, tombstone = value.is_tombstone(), "delta put");
        let mut inner = self.write_lock()?;
        inner.unflushed.insert(key.clone());
        inner.entries.insert(key, value);
        Ok(())
    }

    /// The cached value for `key`, tombstones included.
    pub fn get(&self, key: &K) -> Result<Option<V>, DeltaCacheError> {
        Ok(self.read_lock()?.entries.get(key).cloned())
    }

    pub fn size(&self) -> Result<usize, DeltaCacheError> {
        Ok(self.read_lock()?.entries.len())
    }

    pub fn size_without_tombstones(&self) -> Result<usize, DeltaCacheError> {
        Ok(self
            .read_lock()?
            .entries
            .values()
            .filter(|v| !v.is_tombstone())
            .count())
    }

    pub fn unflushed_len(&self) -> Result<usize, DeltaCacheError> {
        Ok(self.read_lock()?.unflushed.len())
    }

    /// Snapshot of all entries in key order.
    pub fn sorted_entries(&self) -> Result<Vec<(K, V)>, DeltaCacheError> {
        Ok(self
            .read_lock()?
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    // --------------------------------------------------------------------------------------------
    // Flush bookkeeping
    // --------------------------------------------------------------------------------------------

    /// Removes and returns the entries written since the last flush.
    ///
    /// If persisting them fails, hand the keys back with
    /// [`restore_unflushed`](Self::restore_unflushed).
    pub fn take_unflushed(&self) -> Result<Vec<(K, V)>, DeltaCacheError> {
        let mut inner = self.write_lock()?;
        let keys = std::mem::take(&mut inner.unflushed);
        Ok(keys
            .into_iter()
            .filter_map(|k| {
                let v = inner.entries.get(&k).cloned()?;
                Some((k, v))
            })
            .collect())
    }

    pub fn restore_unflushed<I>(&self, keys: I) -> Result<(), DeltaCacheError>
    where
        I: IntoIterator<Item = K>,
    {
        let mut inner = self.write_lock()?;
        inner.unflushed.extend(keys);
        Ok(())
    }

    /// Writes `entries` (ascending) as an overflow file at `path`.
    pub fn write_overflow(
        path: &Path,
        conf: &RunConf,
        entries: Vec<(K, V)>,
    ) -> Result<RunSummary<K>, DeltaCacheError> {
        Ok(SortedRunWriter::write_all(path, conf, entries)?)
    }

    // --------------------------------------------------------------------------------------------
    // Eviction
    // --------------------------------------------------------------------------------------------

    /// Drops everything. Only valid once the contents are safely compacted.
    pub fn evict_all(&self) -> Result<(), DeltaCacheError> {
        let mut inner = self.write_lock()?;
        inner.entries.clear();
        inner.unflushed.clear();
        Ok(())
    }

    /// Drops entries that still hold the value captured in `snapshot`.
    ///
    /// Keys rewritten after the snapshot keep their newer value. Returns the
    /// number of evicted entries.
    pub fn evict_compacted(&self, snapshot: &[(K, V)]) -> Result<usize, DeltaCacheError> {
        let mut inner = self.write_lock()?;
        let mut evicted = 0;
        for (key, value) in snapshot {
            if inner.entries.get(key) == Some(value) {
                inner.entries.remove(key);
                inner.unflushed.remove(key);
                evicted += 1;
            }
        }
        Ok(evicted)
    }
}
