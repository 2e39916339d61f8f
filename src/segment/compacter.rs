//! Compaction policy and procedure.
//!
//! Policy is two independent threshold checks on the delta cache size.
//! The procedure folds the delta cache into a brand-new base generation:
//!
//! 1. snapshot the delta cache and note the version counter;
//! 2. merge the current base run with the snapshot into `v<gen>.run`,
//!    building the sparse index and bloom filter from the same stream;
//! 3. store `segment.properties` naming the new generation (the commit
//!    point);
//! 4. under the exclusive write gate, swap the base triple and evict the
//!    compacted entries from the delta cache;
//! 5. delete the previous generation and the overflow files it absorbed.
//!
//! A failure before step 3 deletes the new files and leaves the segment
//! exactly as it was. A failure from step 3 on moves the segment to
//! [`SegmentState::Error`](super::SegmentState::Error).

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::metrics::SegmentMetrics;
use super::properties::{bloom_file, delta_file, run_file, sparse_file};
use super::{BaseRun, Segment, SegmentError};
use crate::bloom::BloomFilter;
use crate::encoding::TypeDescriptor;
use crate::fsutil;
use crate::merge::MergeIterator;
use crate::sortedrun::{SortedRunReader, SortedRunWriter};
use crate::sparseindex::SparseIndex;

impl<K: TypeDescriptor, V: TypeDescriptor> Segment<K, V> {
    /// Whether a burst of `pending_writes` would push the delta cache past
    /// `max_keys_in_delta_cache_during_writing`.
    pub fn should_be_compacted_during_writing(&self, pending_writes: usize) -> Result<bool, SegmentError> {
        let size = self.delta.size()?;
        Ok(size.saturating_add(pending_writes) > self.conf.max_keys_in_delta_cache_during_writing)
    }

    /// Whether the delta cache has outgrown `max_keys_in_delta_cache`.
    pub fn should_be_compacted(&self) -> Result<bool, SegmentError> {
        Ok(self.delta.size()? > self.conf.max_keys_in_delta_cache)
    }

    /// Folds the delta cache into a new base generation.
    pub fn compact(&self) -> Result<(), SegmentError> {
        self.ensure_writable()?;
        let _maintenance = self.lock_maintenance_writable()?;
        self.with_busy_state(|| self.compact_locked())
    }

    /// Caller holds the maintenance mutex.
    fn compact_locked(&self) -> Result<(), SegmentError> {
        let started = Instant::now();
        let version_at_snapshot = self.version.load(Ordering::Acquire);
        let snapshot = self.delta.sorted_entries()?;
        let base = self.current_base()?;

        let mut props = self.lock_properties()?;
        let generation = props.generation + 1;

        let new_base = match self.write_generation(generation, &base, snapshot.clone()) {
            Ok(new_base) => new_base,
            Err(e) => {
                warn!(segment = %self.id, generation, "compaction aborted: {e}");
                remove_generation(&self.dir, generation);
                return Err(e);
            }
        };

        let previous = props.clone();
        let mut next = props.clone();
        next.generation = generation;
        next.key_count = new_base.key_count;
        next.delta_files.clear();
        next.compactions += 1;
        if let Err(e) = next.store(&self.dir) {
            self.enter_error("storing properties of new generation failed");
            return Err(e);
        }
        *props = next;
        drop(props);

        let key_count = new_base.key_count;
        let evicted = match self.swap_base(new_base, &snapshot, version_at_snapshot) {
            Ok(evicted) => evicted,
            Err(e) => {
                self.enter_error("base swap failed");
                return Err(e);
            }
        };

        if previous.generation > 0 {
            remove_generation(&self.dir, previous.generation);
        }
        for number in &previous.delta_files {
            let path = self.dir.join(delta_file(*number));
            if let Err(e) = fsutil::remove_if_exists(&path) {
                warn!(path = %path.display(), "failed to remove absorbed overflow file: {e}");
            }
        }

        SegmentMetrics::incr(&self.metrics.compactions);
        self.metrics
            .delta_cache_evictions
            .fetch_add(evicted as u64, Ordering::Relaxed);
        info!(
            segment = %self.id,
            generation,
            keys = key_count,
            merged_delta = snapshot.len(),
            evicted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "compaction finished"
        );
        Ok(())
    }

    /// Writes run, sparse index and bloom filter of `generation`.
    fn write_generation(
        &self,
        generation: u64,
        base: &BaseRun<K, V>,
        snapshot: Vec<(K, V)>,
    ) -> Result<BaseRun<K, V>, SegmentError> {
        let run_path = self.dir.join(run_file(generation));
        let estimate = base.key_count as usize + snapshot.len();
        let sizing = self.conf.bloom.resolve(estimate)?;
        let mut bloom = BloomFilter::new(&sizing)?;

        let mut writer = SortedRunWriter::<K, V>::create(&run_path, &self.run_conf)?;
        for entry in MergeIterator::new(base.run.iter(), snapshot) {
            let (key, value) = entry?;
            bloom.insert(&key.to_bytes());
            writer.put(key, &value)?;
        }
        let summary = writer.finish()?;

        let index = SparseIndex::from_entries(summary.index)?;
        index.write(self.dir.join(sparse_file(generation)), &self.run_conf)?;
        bloom.write(self.dir.join(bloom_file(generation)))?;

        debug!(
            segment = %self.id,
            generation,
            entries = summary.entry_count,
            pages = index.len(),
            bloom_bytes = sizing.bytes,
            bloom_hashes = sizing.hash_functions,
            "new generation written"
        );

        Ok(BaseRun {
            generation,
            run: SortedRunReader::open(&run_path, &self.run_conf)?,
            index,
            bloom,
            key_count: summary.entry_count,
        })
    }

    /// Installs `new_base` and drops the compacted delta entries. Returns
    /// the number of evicted entries.
    fn swap_base(
        &self,
        new_base: BaseRun<K, V>,
        snapshot: &[(K, V)],
        version_at_snapshot: u64,
    ) -> Result<usize, SegmentError> {
        let _gate = self.exclusive_gate()?;
        let generation = new_base.generation;
        let replaced = {
            let mut base = self.base.write().map_err(|_| super::poisoned("base"))?;
            std::mem::replace(&mut *base, Arc::new(new_base))
        };
        debug!(segment = %self.id, from = replaced.generation, to = generation, "base run swapped");
        let evicted = if self.version.load(Ordering::Acquire) == version_at_snapshot {
            self.delta.evict_all()?;
            snapshot.len()
        } else {
            self.delta.evict_compacted(snapshot)?
        };
        self.version.fetch_add(1, Ordering::AcqRel);
        Ok(evicted)
    }
}

/// Best-effort removal of a generation's files and their temp siblings.
fn remove_generation(dir: &Path, generation: u64) {
    for name in [run_file(generation), sparse_file(generation), bloom_file(generation)] {
        let path = dir.join(&name);
        for candidate in [fsutil::tmp_path_for(&path), path] {
            if let Err(e) = fsutil::remove_if_exists(&candidate) {
                warn!(path = %candidate.display(), "failed to remove generation file: {e}");
            }
        }
    }
}
