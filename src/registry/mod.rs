//! # Segment registry
//!
//! A bounded cache of open segments keyed by [`SegmentId`].
//!
//! Every id maps to a *slot* that moves `Loading → Ready | Failed` exactly
//! once. The first caller for an absent id installs a `Loading` slot and
//! runs the loader outside the registry lock; concurrent callers for the
//! same id block on the slot's condition variable and share the outcome,
//! so the loader runs once per id (single flight). A `Failed` slot is
//! replaced by a fresh load on the next access.
//!
//! When more than `capacity` slots are `Ready`, the least recently used
//! ones are removed and handed to the release callback (which normally
//! closes the segment). `Loading` slots are never evicted.
//!
//! [`SegmentRegistry::close`] stops new loads, then polls with the
//! configured [`RetryPolicy`] until no load is in flight. It either
//! releases every entry and ends `Closed`, or gives up with
//! [`RegistryError::CloseTimeout`] and ends in `Error`.

mod retry;

#[cfg(test)]
mod tests;

pub use retry::{RetryPolicy, RetryTimeout};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, SegmentConf};
use crate::encoding::TypeDescriptor;
use crate::executor::{ExecutorError, TaskHandle, WorkerPool};
use crate::segment::{Segment, SegmentError, SegmentId};

#[derive(Debug, Error)]
pub enum RegistryError {
    /// The loader failed; the next access retries.
    #[error("loading {id} failed: {source}")]
    LoadFailed {
        id: SegmentId,
        #[source]
        source: Arc<SegmentError>,
    },

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Loads were still in flight when the close budget ran out.
    #[error("registry close timed out after {waited:?} with {pending} load(s) in flight")]
    CloseTimeout { waited: Duration, pending: usize },

    #[error("segment registry is {0:?}")]
    NotOpen(RegistryState),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    Open,
    /// `close` is waiting for in-flight loads.
    Closing,
    Closed,
    /// `close` timed out.
    Error,
}

/// Public view of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Loading,
    Ready,
    Failed,
}

#[derive(Debug, Clone)]
pub struct RegistryConf {
    /// Maximum number of `Ready` entries.
    ///
    /// Default: 64.
    pub capacity: usize,
    pub close_policy: RetryPolicy,
}

impl Default for RegistryConf {
    fn default() -> Self {
        Self {
            capacity: 64,
            close_policy: RetryPolicy::default(),
        }
    }
}

impl RegistryConf {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError("registry capacity must be >= 1".into()));
        }
        self.close_policy.validate()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Accesses answered by a `Ready` slot or by joining an in-flight load.
    pub hits: u64,
    /// Accesses that had to start a load.
    pub misses: u64,
    pub loads: u64,
    pub load_failures: u64,
    pub evictions: u64,
}

// ------------------------------------------------------------------------------------------------
// Slots
// ------------------------------------------------------------------------------------------------

enum SlotState<T> {
    Loading,
    Ready(T),
    Failed(Arc<SegmentError>),
}

struct Slot<T> {
    state: Mutex<SlotState<T>>,
    resolved: Condvar,
}

impl<T: Clone> Slot<T> {
    fn loading() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SlotState::Loading),
            resolved: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry_state(&self) -> EntryState {
        match &*self.lock() {
            SlotState::Loading => EntryState::Loading,
            SlotState::Ready(_) => EntryState::Ready,
            SlotState::Failed(_) => EntryState::Failed,
        }
    }

    fn ready_value(&self) -> Option<T> {
        match &*self.lock() {
            SlotState::Ready(value) => Some(value.clone()),
            _ => None,
        }
    }

    fn resolve(&self, outcome: Result<T, Arc<SegmentError>>) {
        *self.lock() = match outcome {
            Ok(value) => SlotState::Ready(value),
            Err(e) => SlotState::Failed(e),
        };
        self.resolved.notify_all();
    }

    /// Blocks until the slot leaves `Loading`.
    fn wait(&self) -> Result<T, Arc<SegmentError>> {
        let guard = self
            .resolved
            .wait_while(self.lock(), |s| matches!(s, SlotState::Loading))
            .unwrap_or_else(PoisonError::into_inner);
        match &*guard {
            SlotState::Ready(value) => Ok(value.clone()),
            SlotState::Failed(e) => Err(Arc::clone(e)),
            // wait_while only returns once the predicate is false.
            SlotState::Loading => Err(Arc::new(SegmentError::Internal(
                "slot still loading after wait".into(),
            ))),
        }
    }
}

struct Entry<T> {
    slot: Arc<Slot<T>>,
    last_used: u64,
}

struct Inner<T> {
    state: RegistryState,
    entries: HashMap<SegmentId, Entry<T>>,
    tick: u64,
}

// ------------------------------------------------------------------------------------------------
// Registry
// ------------------------------------------------------------------------------------------------

type Loader<T> = Box<dyn Fn(SegmentId) -> Result<T, SegmentError> + Send + Sync>;
type Release<T> = Box<dyn Fn(SegmentId, T) -> Result<(), SegmentError> + Send + Sync>;

/// Bounded, single-flight cache of loaded values (normally `Arc<Segment>`).
pub struct SegmentRegistry<T: Clone + Send + Sync + 'static> {
    conf: RegistryConf,
    inner: Mutex<Inner<T>>,
    loader: Loader<T>,
    release: Release<T>,

    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    evictions: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for SegmentRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentRegistry")
            .field("capacity", &self.conf.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<K: TypeDescriptor, V: TypeDescriptor> SegmentRegistry<Arc<Segment<K, V>>> {
    /// A registry that opens segments under `root` and closes them on release.
    pub fn for_segments(
        root: impl Into<PathBuf>,
        segment_conf: SegmentConf,
        conf: RegistryConf,
        pool: Option<Arc<WorkerPool>>,
    ) -> Result<Self, RegistryError> {
        segment_conf.validate()?;
        let root = root.into();
        Self::new(
            conf,
            move |id| Segment::open(&root, id, segment_conf.clone(), pool.clone()),
            |_, segment: Arc<Segment<K, V>>| segment.close(),
        )
    }
}

impl<T: Clone + Send + Sync + 'static> SegmentRegistry<T> {
    pub fn new<L, R>(conf: RegistryConf, loader: L, release: R) -> Result<Self, RegistryError>
    where
        L: Fn(SegmentId) -> Result<T, SegmentError> + Send + Sync + 'static,
        R: Fn(SegmentId, T) -> Result<(), SegmentError> + Send + Sync + 'static,
    {
        conf.validate()?;
        Ok(Self {
            conf,
            inner: Mutex::new(Inner {
                state: RegistryState::Open,
                entries: HashMap::new(),
                tick: 0,
            }),
            loader: Box::new(loader),
            release: Box::new(release),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            load_failures: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner<T>>, RegistryError> {
        self.inner.lock().map_err(|_| {
            error!("registry lock poisoned");
            RegistryError::Internal("registry lock poisoned".into())
        })
    }

    // --------------------------------------------------------------------------------------------
    // Lookup and loading
    // --------------------------------------------------------------------------------------------

    /// Returns the value for `id`, loading it if needed.
    ///
    /// Concurrent calls for the same absent id share one loader call.
    pub fn get_or_load(&self, id: SegmentId) -> Result<T, RegistryError> {
        let (slot, is_loader) = {
            let mut inner = self.lock()?;
            if inner.state != RegistryState::Open {
                return Err(RegistryError::NotOpen(inner.state));
            }
            inner.tick += 1;
            let tick = inner.tick;
            match inner.entries.get_mut(&id) {
                Some(entry) if entry.slot.entry_state() == EntryState::Failed => {
                    debug!(%id, "retrying failed load");
                    entry.slot = Slot::loading();
                    entry.last_used = tick;
                    (Arc::clone(&entry.slot), true)
                }
                Some(entry) => {
                    entry.last_used = tick;
                    (Arc::clone(&entry.slot), false)
                }
                None => {
                    let slot = Slot::loading();
                    inner.entries.insert(
                        id,
                        Entry {
                            slot: Arc::clone(&slot),
                            last_used: tick,
                        },
                    );
                    (slot, true)
                }
            }
        };

        if !is_loader {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return slot
                .wait()
                .map_err(|source| RegistryError::LoadFailed { id, source });
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        self.loads.fetch_add(1, Ordering::Relaxed);
        debug!(%id, "loading segment");
        match (self.loader)(id) {
            Ok(value) => {
                slot.resolve(Ok(value.clone()));
                self.after_load(id)?;
                Ok(value)
            }
            Err(e) => {
                self.load_failures.fetch_add(1, Ordering::Relaxed);
                warn!(%id, "segment load failed: {e}");
                let source = Arc::new(e);
                slot.resolve(Err(Arc::clone(&source)));
                Err(RegistryError::LoadFailed { id, source })
            }
        }
    }

    /// Runs [`get_or_load`](Self::get_or_load) on `pool`.
    pub fn get_or_load_async(
        self: &Arc<Self>,
        pool: &WorkerPool,
        id: SegmentId,
    ) -> Result<TaskHandle<Result<T, RegistryError>>, RegistryError> {
        let registry = Arc::clone(self);
        Ok(pool.submit(move || registry.get_or_load(id))?)
    }

    /// The value for `id` if it is loaded; never starts a load.
    pub fn get(&self, id: SegmentId) -> Result<Option<T>, RegistryError> {
        let mut inner = self.lock()?;
        inner.tick += 1;
        let tick = inner.tick;
        let Some(entry) = inner.entries.get_mut(&id) else {
            return Ok(None);
        };
        let value = entry.slot.ready_value();
        if value.is_some() {
            entry.last_used = tick;
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        Ok(value)
    }

    pub fn entry_state(&self, id: SegmentId) -> Result<Option<EntryState>, RegistryError> {
        Ok(self
            .lock()?
            .entries
            .get(&id)
            .map(|entry| entry.slot.entry_state()))
    }

    /// Removes `id`, releasing its value if it was loaded.
    ///
    /// Returns `false` when the id is absent or still loading.
    pub fn invalidate(&self, id: SegmentId) -> Result<bool, RegistryError> {
        let removed = {
            let mut inner = self.lock()?;
            match inner.entries.get(&id).map(|e| e.slot.entry_state()) {
                None | Some(EntryState::Loading) => return Ok(false),
                Some(_) => inner.entries.remove(&id),
            }
        };
        if let Some(value) = removed.and_then(|entry| entry.slot.ready_value()) {
            self.release_value(id, value);
        }
        Ok(true)
    }

    // --------------------------------------------------------------------------------------------
    // Eviction
    // --------------------------------------------------------------------------------------------

    fn after_load(&self, id: SegmentId) -> Result<(), RegistryError> {
        // A load that outlived a timed-out close has nobody left to release it.
        let orphaned = {
            let mut inner = self.lock()?;
            if inner.state == RegistryState::Error {
                inner.entries.remove(&id)
            } else {
                inner.tick += 1;
                let tick = inner.tick;
                if let Some(entry) = inner.entries.get_mut(&id) {
                    entry.last_used = tick;
                }
                None
            }
        };
        if let Some(value) = orphaned.and_then(|entry| entry.slot.ready_value()) {
            warn!(%id, "load finished after registry failed, releasing");
            self.release_value(id, value);
            return Ok(());
        }
        self.evict_over_capacity()
    }

    fn evict_over_capacity(&self) -> Result<(), RegistryError> {
        let victims = {
            let mut inner = self.lock()?;
            let mut ready: Vec<(u64, SegmentId)> = inner
                .entries
                .iter()
                .filter(|(_, e)| e.slot.entry_state() == EntryState::Ready)
                .map(|(id, e)| (e.last_used, *id))
                .collect();
            if ready.len() <= self.conf.capacity {
                return Ok(());
            }
            ready.sort_unstable();
            let excess = ready.len() - self.conf.capacity;
            ready
                .into_iter()
                .take(excess)
                .filter_map(|(_, id)| {
                    let entry = inner.entries.remove(&id)?;
                    Some((id, entry.slot.ready_value()?))
                })
                .collect::<Vec<_>>()
        };

        for (id, value) in victims {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(%id, "evicting least recently used segment");
            self.release_value(id, value);
        }
        Ok(())
    }

    fn release_value(&self, id: SegmentId, value: T) {
        if let Err(e) = (self.release)(id, value) {
            warn!(%id, "releasing segment failed: {e}");
        }
    }

    // --------------------------------------------------------------------------------------------
    // Introspection and shutdown
    // --------------------------------------------------------------------------------------------

    pub fn state(&self) -> RegistryState {
        self.inner
            .lock()
            .map(|inner| inner.state)
            .unwrap_or(RegistryState::Error)
    }

    /// Number of entries in any state.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn pending_loads(&self) -> Result<usize, RegistryError> {
        Ok(self
            .lock()?
            .entries
            .values()
            .filter(|e| e.slot.entry_state() == EntryState::Loading)
            .count())
    }

    /// Waits for in-flight loads, then releases every entry.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::NotOpen`] if close already ran.
    /// - [`RegistryError::CloseTimeout`] if loads were still running after
    ///   the close policy's timeout; the registry is then left in
    ///   [`RegistryState::Error`].
    pub fn close(&self) -> Result<(), RegistryError> {
        {
            let mut inner = self.lock()?;
            if inner.state != RegistryState::Open {
                return Err(RegistryError::NotOpen(inner.state));
            }
            inner.state = RegistryState::Closing;
        }
        info!(entries = self.len(), "closing segment registry");

        let drained = self
            .conf
            .close_policy
            .retry_until("registry drain", || match self.pending_loads() {
                Ok(0) => Some(Ok(())),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            });

        match drained {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(timeout) => {
                let pending = self.pending_loads()?;
                self.lock()?.state = RegistryState::Error;
                error!(
                    pending,
                    waited_ms = timeout.waited.as_millis() as u64,
                    "registry close timed out"
                );
                return Err(RegistryError::CloseTimeout {
                    waited: timeout.waited,
                    pending,
                });
            }
        }

        let entries: Vec<(SegmentId, Entry<T>)> = {
            let mut inner = self.lock()?;
            inner.state = RegistryState::Closed;
            inner.entries.drain().collect()
        };
        let released = entries.len();
        for (id, entry) in entries {
            if let Some(value) = entry.slot.ready_value() {
                self.release_value(id, value);
            }
        }
        info!(released, "segment registry closed");
        Ok(())
    }
}
