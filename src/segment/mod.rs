//! # Segment
//!
//! The unit of storage: one base sorted run (with its sparse index and
//! bloom filter) overlaid by a delta cache of recent writes.
//!
//! ## Read path
//!
//! 1. Delta cache. A hit answers immediately; a tombstone hit is *absent*.
//! 2. Bloom filter. *Definitely absent* answers without touching disk.
//! 3. Sparse index narrows the probe to one page, which is decoded up to
//!    the key.
//!
//! ## Write path
//!
//! `put` and `delete` only touch the delta cache, then run a maintenance
//! check: once `max_unflushed_keys` writes have accumulated a flush writes
//! them to a new overflow file, and once the cache outgrows
//! `max_keys_in_delta_cache` a compaction folds it into a new base
//! generation (see [`compacter`]). With a [`WorkerPool`] attached,
//! maintenance runs on the segment's own [`SerialQueue`]; otherwise it runs
//! inline on the writing thread.
//!
//! ## Concurrency
//!
//! - Writers hold the *write gate* shared; the compaction swap holds it
//!   exclusively, so mutators block only for the swap itself.
//! - Readers never take the gate. The base triple lives behind an
//!   `Arc` that is replaced wholesale; a reader keeps using whichever
//!   triple it cloned.
//! - A version counter is bumped by every write and every compaction.
//!   [`SegmentIterator`] compares it on each step and ends early on change.
//! - Flush and compaction are serialized by the maintenance mutex.
//!
//! ## On-disk layout
//!
//! ```text
//! segment-00007/
//!   segment.properties      live generation, overflow files, counters
//!   v000003.run             base sorted run
//!   v000003.sparse          sparse index over the base run
//!   v000003.bloom           bloom filter over the base run
//!   delta-000012.run        overflow files, replayed in order on open
//! ```

pub mod compacter;
mod iterator;
mod metrics;
mod properties;

#[cfg(test)]
mod tests;

pub use iterator::SegmentIterator;
pub use metrics::MetricsSnapshot;
pub use properties::SegmentProperties;

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::bloom::{BloomError, BloomFilter};
use crate::config::{ConfigError, SegmentConf};
use crate::deltacache::{DeltaCache, DeltaCacheError};
use crate::encoding::{EncodingError, TypeDescriptor};
use crate::executor::{ExecutorError, SerialQueue, WorkerPool};
use crate::fsutil;
use crate::guard::{AlreadyClosed, CloseGuard};
use crate::sortedrun::{RunConf, SortedRunError, SortedRunReader};
use crate::sparseindex::{SparseIndex, SparseIndexError};
use metrics::SegmentMetrics;
use properties::{bloom_file, delta_file, run_file, sparse_file};

/// How long `close` waits for queued maintenance before flushing anyway.
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Sorted run error: {0}")]
    Run(SortedRunError),

    #[error("Sparse index error: {0}")]
    SparseIndex(#[from] SparseIndexError),

    #[error("Bloom filter error: {0}")]
    Bloom(#[from] BloomError),

    #[error("Delta cache error: {0}")]
    DeltaCache(#[from] DeltaCacheError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    /// A sorted-run writer received a key that was not strictly ascending.
    #[error("keys must be strictly ascending: {inserted} written after {previous}")]
    OutOfOrder { previous: String, inserted: String },

    #[error("corrupt segment file {path}: {reason}")]
    Corruption { path: PathBuf, reason: String },

    /// The value given to `put` is the type's tombstone sentinel.
    #[error("the tombstone value cannot be stored; use delete")]
    TombstoneValue,

    #[error(transparent)]
    Closed(#[from] AlreadyClosed),

    /// An earlier failure left the segment in [`SegmentState::Error`].
    #[error("{0} is in error state")]
    Failed(SegmentId),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<SortedRunError> for SegmentError {
    fn from(e: SortedRunError) -> Self {
        match e {
            SortedRunError::OutOfOrder { previous, inserted } => {
                SegmentError::OutOfOrder { previous, inserted }
            }
            other => SegmentError::Run(other),
        }
    }
}

/// Identifies a segment; also names its directory (`segment-00042`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(pub u32);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "segment-{:05}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Ready,
    /// A flush or compaction is running.
    Busy,
    Closed,
    /// Absorbing: writes and maintenance are refused, reads still work.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Maintenance {
    Flush,
    Compact,
}

/// One generation of immutable base files, loaded.
pub(crate) struct BaseRun<K: TypeDescriptor, V: TypeDescriptor> {
    pub generation: u64,
    pub run: SortedRunReader<K, V>,
    pub index: SparseIndex<K>,
    pub bloom: BloomFilter,
    pub key_count: u64,
}

impl<K: TypeDescriptor, V: TypeDescriptor> BaseRun<K, V> {
    fn load(dir: &Path, generation: u64, key_count: u64, conf: &RunConf) -> Result<Self, SegmentError> {
        if generation == 0 {
            return Ok(Self {
                generation,
                run: SortedRunReader::open(dir.join(run_file(0)), conf)?,
                index: SparseIndex::default(),
                bloom: BloomFilter::disabled(),
                key_count: 0,
            });
        }
        let run_path = dir.join(run_file(generation));
        if !run_path.exists() {
            return Err(SegmentError::Corruption {
                path: run_path,
                reason: format!("base run of generation {generation} is missing"),
            });
        }
        Ok(Self {
            generation,
            run: SortedRunReader::open(&run_path, conf)?,
            index: SparseIndex::load(dir.join(sparse_file(generation)), conf)?,
            bloom: BloomFilter::load(dir.join(bloom_file(generation)))?,
            key_count,
        })
    }

    fn get(&self, key: &K) -> Result<Option<V>, SegmentError> {
        if !self.bloom.maybe_contains(&key.to_bytes()) {
            return Ok(None);
        }
        let found = match self.index.find(key) {
            Some(position) => self.run.get_in_page(position, key)?,
            None => None,
        };
        if found.is_none() && self.bloom.is_enabled() {
            self.bloom.record_false_positive();
        }
        Ok(found.filter(|v| !v.is_tombstone()))
    }
}

/// A single segment. Always handled through an `Arc`.
pub struct Segment<K: TypeDescriptor, V: TypeDescriptor> {
    id: SegmentId,
    dir: PathBuf,
    conf: SegmentConf,
    run_conf: RunConf,

    base: RwLock<Arc<BaseRun<K, V>>>,
    delta: DeltaCache<K, V>,
    properties: Mutex<SegmentProperties>,

    /// Shared by writers, exclusive for the compaction swap.
    write_gate: RwLock<()>,
    /// Serializes flush and compaction.
    maintenance: Mutex<()>,
    version: Arc<AtomicU64>,
    state: Mutex<SegmentState>,
    guard: CloseGuard,

    queue: Option<SerialQueue>,
    flush_scheduled: AtomicBool,
    compact_scheduled: AtomicBool,

    metrics: SegmentMetrics,
    this: Weak<Self>,
}

impl<K: TypeDescriptor, V: TypeDescriptor> fmt::Debug for Segment<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("dir", &self.dir)
            .field("state", &self.get_state())
            .finish()
    }
}

impl<K: TypeDescriptor, V: TypeDescriptor> Segment<K, V> {
    // --------------------------------------------------------------------------------------------
    // Open
    // --------------------------------------------------------------------------------------------

    /// Opens (or creates) segment `id` under `root`.
    ///
    /// Loads the live base generation named by `segment.properties`,
    /// replays the registered overflow files into the delta cache and
    /// deletes every file the properties do not reference.
    pub fn open(
        root: impl AsRef<Path>,
        id: SegmentId,
        conf: SegmentConf,
        pool: Option<Arc<WorkerPool>>,
    ) -> Result<Arc<Self>, SegmentError> {
        conf.validate()?;
        let dir = root.as_ref().join(id.to_string());
        fs::create_dir_all(&dir)?;

        let props = match SegmentProperties::load(&dir)? {
            Some(props) => props,
            None => {
                let props = SegmentProperties::default();
                props.store(&dir)?;
                debug!(segment = %id, "created new segment");
                props
            }
        };
        remove_orphans(&dir, &props)?;

        let run_conf = RunConf::from_segment(&conf);
        let base = BaseRun::load(&dir, props.generation, props.key_count, &run_conf)?;
        let delta_paths: Vec<PathBuf> = props
            .delta_files
            .iter()
            .map(|n| dir.join(delta_file(*n)))
            .collect();
        let delta = DeltaCache::replay(&delta_paths, &run_conf)?;

        info!(
            segment = %id,
            generation = props.generation,
            base_keys = props.key_count,
            delta_keys = delta.size()?,
            overflow_files = props.delta_files.len(),
            "segment opened"
        );

        let metrics = SegmentMetrics::new(props.flushes, props.compactions);
        let queue = pool.map(|pool| SerialQueue::new(id.to_string(), pool));
        Ok(Arc::new_cyclic(|this| Self {
            id,
            dir,
            conf,
            run_conf,
            base: RwLock::new(Arc::new(base)),
            delta,
            properties: Mutex::new(props),
            write_gate: RwLock::new(()),
            maintenance: Mutex::new(()),
            version: Arc::new(AtomicU64::new(0)),
            state: Mutex::new(SegmentState::Ready),
            guard: CloseGuard::new("segment"),
            queue,
            flush_scheduled: AtomicBool::new(false),
            compact_scheduled: AtomicBool::new(false),
            metrics,
            this: this.clone(),
        }))
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn conf(&self) -> &SegmentConf {
        &self.conf
    }

    /// Current value of the structural version counter.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    // --------------------------------------------------------------------------------------------
    // Reads
    // --------------------------------------------------------------------------------------------

    /// Latest live value of `key`.
    pub fn get(&self, key: &K) -> Result<Option<V>, SegmentError> {
        self.guard.ensure_open()?;
        let started = Instant::now();
        SegmentMetrics::incr(&self.metrics.gets);
        let result = self.lookup(key);
        self.metrics.record_get_latency(started.elapsed());
        result
    }

    fn lookup(&self, key: &K) -> Result<Option<V>, SegmentError> {
        if let Some(value) = self.delta.get(key)? {
            SegmentMetrics::incr(&self.metrics.delta_cache_hits);
            trace!(segment = %self.id, ?key, "delta cache hit");
            return Ok((!value.is_tombstone()).then_some(value));
        }
        SegmentMetrics::incr(&self.metrics.delta_cache_misses);
        self.current_base()?.get(key)
    }

    /// Ordered scan of the live contents.
    ///
    /// The iterator ends early if the segment changes underneath it; check
    /// [`SegmentIterator::was_interrupted`] when a complete scan matters.
    pub fn iter(&self) -> Result<SegmentIterator<K, V>, SegmentError> {
        self.guard.ensure_open()?;
        let stamp = self.version.load(Ordering::Acquire);
        let base = self.current_base()?;
        let delta = self.delta.sorted_entries()?;
        Ok(SegmentIterator::new(
            base.run.iter(),
            delta,
            Arc::clone(&self.version),
            stamp,
        ))
    }

    // --------------------------------------------------------------------------------------------
    // Writes
    // --------------------------------------------------------------------------------------------

    pub fn put(&self, key: K, value: V) -> Result<(), SegmentError> {
        if value.is_tombstone() {
            return Err(SegmentError::TombstoneValue);
        }
        self.ensure_writable()?;
        self.apply(key, value)?;
        SegmentMetrics::incr(&self.metrics.puts);
        self.after_write()
    }

    pub fn delete(&self, key: K) -> Result<(), SegmentError> {
        self.ensure_writable()?;
        self.apply(key, V::tombstone())?;
        SegmentMetrics::incr(&self.metrics.deletes);
        self.after_write()
    }

    /// Applies a burst of writes, compacting first when the burst would
    /// push the delta cache past `max_keys_in_delta_cache_during_writing`.
    pub fn write_batch(&self, entries: Vec<(K, V)>) -> Result<(), SegmentError> {
        if entries.iter().any(|(_, v)| v.is_tombstone()) {
            return Err(SegmentError::TombstoneValue);
        }
        self.ensure_writable()?;
        if self.should_be_compacted_during_writing(entries.len())? {
            debug!(segment = %self.id, pending = entries.len(), "compacting ahead of write burst");
            self.schedule(Maintenance::Compact)?;
        }
        let count = entries.len() as u64;
        {
            let _gate = self.read_gate()?;
            for (key, value) in entries {
                self.delta.put(key, value)?;
            }
            self.version.fetch_add(1, Ordering::AcqRel);
        }
        self.metrics.puts.fetch_add(count, Ordering::Relaxed);
        self.after_write()
    }

    fn apply(&self, key: K, value: V) -> Result<(), SegmentError> {
        let _gate = self.read_gate()?;
        self.delta.put(key, value)?;
        self.version.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Triggers maintenance once the write has landed. A failed inline
    /// flush or compaction is logged, not returned: the write itself is
    /// already applied. A compaction that fails after its commit point
    /// moves the segment to [`SegmentState::Error`], which the next write
    /// reports.
    fn after_write(&self) -> Result<(), SegmentError> {
        let task = if self.should_be_compacted()? {
            Maintenance::Compact
        } else if self.delta.unflushed_len()? >= self.conf.max_unflushed_keys {
            Maintenance::Flush
        } else {
            return Ok(());
        };
        if let Err(e) = self.schedule(task) {
            error!(segment = %self.id, ?task, "maintenance after write failed, write kept: {e}");
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Maintenance
    // --------------------------------------------------------------------------------------------

    /// Writes the keys changed since the last flush to a new overflow file.
    ///
    /// The base run is not touched. On failure the keys stay pending and
    /// the partial file is removed.
    pub fn flush(&self) -> Result<(), SegmentError> {
        self.ensure_writable()?;
        let _maintenance = self.lock_maintenance_writable()?;
        self.with_busy_state(|| self.flush_locked())
    }

    /// Caller holds the maintenance mutex.
    fn flush_locked(&self) -> Result<(), SegmentError> {
        let entries = self.delta.take_unflushed()?;
        if entries.is_empty() {
            return Ok(());
        }
        let keys: Vec<K> = entries.iter().map(|(k, _)| k.clone()).collect();
        let count = entries.len();

        let mut props = self.lock_properties()?;
        let number = props.next_delta_no + 1;
        let path = self.dir.join(delta_file(number));

        let result = DeltaCache::write_overflow(&path, &self.run_conf, entries)
            .map_err(SegmentError::from)
            .and_then(|_| {
                let mut next = props.clone();
                next.next_delta_no = number;
                next.delta_files.push(number);
                next.flushes += 1;
                next.store(&self.dir)?;
                *props = next;
                Ok(())
            });

        if let Err(e) = result {
            warn!(segment = %self.id, path = %path.display(), "flush failed: {e}");
            if let Err(rm) = fsutil::remove_if_exists(&path) {
                warn!(path = %path.display(), "failed to remove partial overflow file: {rm}");
            }
            self.delta.restore_unflushed(keys)?;
            return Err(e);
        }

        SegmentMetrics::incr(&self.metrics.flushes);
        debug!(segment = %self.id, file = number, entries = count, "delta cache flushed");
        Ok(())
    }

    /// Runs `f` with the state set to `Busy`, restoring `Ready` afterwards
    /// unless `f` (or a concurrent close) moved the segment elsewhere.
    fn with_busy_state<T>(&self, f: impl FnOnce() -> Result<T, SegmentError>) -> Result<T, SegmentError> {
        self.transition(SegmentState::Ready, SegmentState::Busy)?;
        let result = f();
        self.transition(SegmentState::Busy, SegmentState::Ready)?;
        result
    }

    fn schedule(&self, task: Maintenance) -> Result<(), SegmentError> {
        let Some(queue) = &self.queue else {
            trace!(segment = %self.id, ?task, "running maintenance inline");
            return self.run_maintenance(task);
        };
        let flag = self.scheduled_flag(task);
        if flag.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let Some(this) = self.this.upgrade() else {
            flag.store(false, Ordering::Release);
            return Ok(());
        };

        debug!(segment = %self.id, ?task, "maintenance scheduled");
        let submitted = queue.submit(move || {
            this.scheduled_flag(task).store(false, Ordering::Release);
            match this.run_maintenance(task) {
                Ok(()) => {}
                Err(SegmentError::Closed(_)) => {
                    debug!(segment = %this.id, ?task, "maintenance skipped, segment closed");
                }
                Err(e) => error!(segment = %this.id, ?task, "background maintenance failed: {e}"),
            }
        });
        if let Err(e) = submitted {
            flag.store(false, Ordering::Release);
            return Err(e.into());
        }
        Ok(())
    }

    fn scheduled_flag(&self, task: Maintenance) -> &AtomicBool {
        match task {
            Maintenance::Flush => &self.flush_scheduled,
            Maintenance::Compact => &self.compact_scheduled,
        }
    }

    fn run_maintenance(&self, task: Maintenance) -> Result<(), SegmentError> {
        match task {
            Maintenance::Flush => self.flush(),
            Maintenance::Compact => self.compact(),
        }
    }

    /// Flushes behind any queued maintenance and waits for the result.
    pub fn flush_and_wait(&self) -> Result<(), SegmentError> {
        self.run_and_wait(Maintenance::Flush)
    }

    /// Compacts behind any queued maintenance and waits for the result.
    pub fn compact_and_wait(&self) -> Result<(), SegmentError> {
        self.run_and_wait(Maintenance::Compact)
    }

    fn run_and_wait(&self, task: Maintenance) -> Result<(), SegmentError> {
        self.ensure_writable()?;
        let (Some(queue), Some(this)) = (&self.queue, self.this.upgrade()) else {
            return self.run_maintenance(task);
        };
        queue.submit(move || this.run_maintenance(task))?.wait()?
    }

    // --------------------------------------------------------------------------------------------
    // Collaborator surface
    // --------------------------------------------------------------------------------------------

    pub fn get_state(&self) -> SegmentState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(SegmentState::Error)
    }

    pub fn metrics_snapshot(&self) -> Result<MetricsSnapshot, SegmentError> {
        let bloom = self.current_base()?.bloom.stats();
        Ok(self.metrics.snapshot(bloom, self.delta.size()? as u64))
    }

    /// Approximate live key count: base keys plus live delta entries.
    pub fn key_count(&self) -> Result<u64, SegmentError> {
        let base = self.current_base()?.key_count;
        Ok(base + self.delta.size_without_tombstones()? as u64)
    }

    /// Whether the segment has outgrown `max_keys_in_segment`.
    ///
    /// Only a trigger; splitting is up to the caller.
    pub fn should_be_split(&self) -> Result<bool, SegmentError> {
        Ok(self.key_count()? > self.conf.max_keys_in_segment as u64)
    }

    /// Waits for queued maintenance, flushes pending writes and closes.
    ///
    /// Every later call, including a second `close`, fails with
    /// [`SegmentError::Closed`].
    pub fn close(&self) -> Result<(), SegmentError> {
        self.close_inner(true)
    }

    fn close_inner(&self, drain_queue: bool) -> Result<(), SegmentError> {
        self.guard.close()?;
        if drain_queue {
            if let Some(queue) = &self.queue {
                if !queue.wait_idle(CLOSE_DRAIN_TIMEOUT)? {
                    warn!(segment = %self.id, "maintenance still running at close");
                }
            }
        }

        let result = if self.get_state() == SegmentState::Error {
            Ok(())
        } else {
            let _maintenance = self.lock_maintenance()?;
            self.flush_locked()
        };
        // Error is absorbing and stays the reported state.
        if self.get_state() != SegmentState::Error {
            self.force_state(SegmentState::Closed);
        }
        info!(segment = %self.id, state = ?self.get_state(), "segment closed");
        result
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    fn ensure_writable(&self) -> Result<(), SegmentError> {
        self.guard.ensure_open()?;
        if self.get_state() == SegmentState::Error {
            return Err(SegmentError::Failed(self.id));
        }
        Ok(())
    }

    pub(crate) fn current_base(&self) -> Result<Arc<BaseRun<K, V>>, SegmentError> {
        self.base
            .read()
            .map(|base| Arc::clone(&base))
            .map_err(|_| poisoned("base"))
    }

    fn read_gate(&self) -> Result<RwLockReadGuard<'_, ()>, SegmentError> {
        self.write_gate.read().map_err(|_| poisoned("write gate"))
    }

    fn exclusive_gate(&self) -> Result<RwLockWriteGuard<'_, ()>, SegmentError> {
        self.write_gate.write().map_err(|_| poisoned("write gate"))
    }

    fn lock_maintenance(&self) -> Result<MutexGuard<'_, ()>, SegmentError> {
        self.maintenance.lock().map_err(|_| poisoned("maintenance"))
    }

    /// Takes the maintenance mutex, then re-checks that the segment is
    /// still writable. A close or failure may have happened while waiting.
    fn lock_maintenance_writable(&self) -> Result<MutexGuard<'_, ()>, SegmentError> {
        let maintenance = self.lock_maintenance()?;
        self.ensure_writable()?;
        Ok(maintenance)
    }

    fn lock_properties(&self) -> Result<MutexGuard<'_, SegmentProperties>, SegmentError> {
        self.properties.lock().map_err(|_| poisoned("properties"))
    }

    /// Moves `from` to `to`; any other current state is left alone.
    fn transition(&self, from: SegmentState, to: SegmentState) -> Result<(), SegmentError> {
        let mut state = self.state.lock().map_err(|_| poisoned("state"))?;
        if *state == from {
            *state = to;
        }
        Ok(())
    }

    fn force_state(&self, to: SegmentState) {
        match self.state.lock() {
            Ok(mut state) => *state = to,
            Err(poison) => *poison.into_inner() = to,
        }
    }

    fn enter_error(&self, reason: &str) {
        error!(segment = %self.id, reason, "segment moved to error state");
        self.force_state(SegmentState::Error);
    }
}

impl<K: TypeDescriptor, V: TypeDescriptor> Drop for Segment<K, V> {
    fn drop(&mut self) {
        if self.guard.is_closed() {
            return;
        }
        // The last handle may be dropped by a job of our own queue, so do
        // not wait on it here.
        if let Err(e) = self.close_inner(false) {
            error!(segment = %self.id, "close on drop failed: {e}");
        }
    }
}

fn poisoned(what: &str) -> SegmentError {
    error!(lock = what, "segment lock poisoned");
    SegmentError::Internal(format!("{what} lock poisoned"))
}

/// Deletes everything in `dir` the properties do not reference.
fn remove_orphans(dir: &Path, props: &SegmentProperties) -> Result<(), SegmentError> {
    let keep = props.referenced_files();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if keep.contains(name) {
            continue;
        }
        warn!(dir = %dir.display(), file = name, "removing orphan file");
        fsutil::remove_if_exists(&entry.path())?;
    }
    Ok(())
}
