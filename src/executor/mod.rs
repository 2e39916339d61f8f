//! Background execution: a shared worker pool and per-segment serial queues.
//!
//! [`WorkerPool`] is a fixed set of named threads consuming boxed jobs from
//! a bounded crossbeam channel. The bound caps the amount of queued I/O:
//! once it is reached, [`WorkerPool::submit`] blocks the caller until a
//! worker frees a slot.
//!
//! [`SerialQueue`] layers ordering on top of the pool. Jobs submitted to one
//! queue run one at a time in submission order, while jobs of different
//! queues (different segments) run in parallel on the shared workers.
//!
//! Every submission returns a [`TaskHandle`] the caller can block on, poll,
//! or drop to detach.


use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::ConfigError;

/// A unit of work run on a pool thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("worker pool `{0}` is shut down")]
    PoolClosed(String),

    /// The task panicked or was dropped before producing a result.
    #[error("task finished without a result")]
    TaskLost,

    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Task handle
// ------------------------------------------------------------------------------------------------

/// Receiving end of a submitted task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: Receiver<T>,
}

impl<T> TaskHandle<T> {
    fn pair() -> (Sender<T>, Self) {
        let (tx, rx) = channel::bounded(1);
        (tx, Self { rx })
    }

    /// A handle whose result is already available.
    pub fn ready(value: T) -> Self {
        let (tx, handle) = Self::pair();
        // The channel has room for exactly this value.
        let _ = tx.send(value);
        handle
    }

    /// Blocks until the task finishes.
    pub fn wait(self) -> Result<T, ExecutorError> {
        self.rx.recv().map_err(|_| ExecutorError::TaskLost)
    }

    /// Blocks for at most `timeout`; `Ok(None)` if the task is still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Option<T>, ExecutorError> {
        match self.rx.recv_timeout(timeout) {
            Ok(value) => Ok(Some(value)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ExecutorError::TaskLost),
        }
    }

    /// Takes the result if it is ready, without blocking.
    pub fn try_take(&self) -> Result<Option<T>, ExecutorError> {
        match self.rx.try_recv() {
            Ok(value) => Ok(Some(value)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(ExecutorError::TaskLost),
        }
    }
}

fn run_guarded(job: Job, context: &str) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!(context, "background task panicked");
    }
}

// ------------------------------------------------------------------------------------------------
// Worker pool
// ------------------------------------------------------------------------------------------------

/// Fixed-size pool of named worker threads.
///
/// Dropping the pool (or calling [`shutdown`](Self::shutdown)) closes the
/// queue; workers finish what is already queued and exit.
pub struct WorkerPool {
    name: String,
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    threads: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("threads", &self.threads)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Spawns `threads` workers named `<name>-<n>` sharing a queue of
    /// `queue_capacity` jobs.
    pub fn new(
        name: impl Into<String>,
        threads: usize,
        queue_capacity: usize,
    ) -> Result<Arc<Self>, ExecutorError> {
        let name = name.into();
        if threads == 0 {
            return Err(ConfigError("worker pool needs at least one thread".into()).into());
        }
        if queue_capacity == 0 {
            return Err(ConfigError("worker pool queue_capacity must be >= 1".into()).into());
        }

        let (sender, receiver) = channel::bounded::<Job>(queue_capacity);
        let mut workers = Vec::with_capacity(threads);
        for id in 0..threads {
            let rx = receiver.clone();
            let thread_name = format!("{name}-{id}");
            let context = thread_name.clone();
            let handle = thread::Builder::new().name(thread_name).spawn(move || {
                while let Ok(job) = rx.recv() {
                    run_guarded(job, &context);
                }
            })?;
            workers.push(handle);
        }
        drop(receiver);

        info!(pool = %name, threads, queue_capacity, "worker pool started");

        Ok(Arc::new(Self {
            name,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            threads,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Queues a fire-and-forget job, blocking while the queue is full.
    pub fn execute(&self, job: Job) -> Result<(), ExecutorError> {
        // Clone the sender so a full queue never blocks other submitters on the mutex.
        let sender = self
            .sender
            .lock()
            .map_err(|_| ExecutorError::Internal("worker pool lock poisoned".into()))?
            .clone()
            .ok_or_else(|| ExecutorError::PoolClosed(self.name.clone()))?;
        sender
            .send(job)
            .map_err(|_| ExecutorError::PoolClosed(self.name.clone()))
    }

    /// Queues `task` and returns a handle to its result.
    pub fn submit<T, F>(&self, task: F) -> Result<TaskHandle<T>, ExecutorError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, handle) = TaskHandle::pair();
        self.execute(Box::new(move || {
            let _ = tx.send(task());
        }))?;
        Ok(handle)
    }

    /// Closes the queue and joins every worker.
    ///
    /// Idempotent. When called from one of the pool's own threads that
    /// thread is detached instead of joined.
    pub fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let workers =
            std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            let _ = worker.join();
        }
        debug!(pool = %self.name, "worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ------------------------------------------------------------------------------------------------
// Serial queue
// ------------------------------------------------------------------------------------------------

struct SerialState {
    jobs: VecDeque<Job>,
    running: bool,
}

struct SerialShared {
    name: String,
    state: Mutex<SerialState>,
    idle: Condvar,
}

/// Runs jobs one at a time, in order, on a shared [`WorkerPool`].
///
/// At most one drain loop per queue is active on the pool at any time, so
/// two jobs of the same queue never overlap.
pub struct SerialQueue {
    pool: Arc<WorkerPool>,
    shared: Arc<SerialShared>,
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("name", &self.shared.name)
            .field("pool", &self.pool.name())
            .finish()
    }
}

impl SerialQueue {
    pub fn new(name: impl Into<String>, pool: Arc<WorkerPool>) -> Self {
        Self {
            pool,
            shared: Arc::new(SerialShared {
                name: name.into(),
                state: Mutex::new(SerialState {
                    jobs: VecDeque::new(),
                    running: false,
                }),
                idle: Condvar::new(),
            }),
        }
    }

    pub fn submit<T, F>(&self, task: F) -> Result<TaskHandle<T>, ExecutorError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, handle) = TaskHandle::pair();
        let job: Job = Box::new(move || {
            let _ = tx.send(task());
        });

        let start_drain = {
            let mut state = self
                .shared
                .state
                .lock()
                .map_err(|_| ExecutorError::Internal("serial queue lock poisoned".into()))?;
            state.jobs.push_back(job);
            !std::mem::replace(&mut state.running, true)
        };

        if start_drain {
            let shared = Arc::clone(&self.shared);
            if let Err(e) = self.pool.execute(Box::new(move || drain(&shared))) {
                // Nothing will ever run the queued jobs; drop them so their handles fail.
                let mut state = self.shared.state.lock().unwrap_or_else(PoisonError::into_inner);
                state.jobs.clear();
                state.running = false;
                self.shared.idle.notify_all();
                return Err(e);
            }
        }
        Ok(handle)
    }

    /// Jobs queued but not yet started.
    pub fn pending(&self) -> usize {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .jobs
            .len()
    }

    /// Blocks until the queue is empty and no job is running.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_idle(&self, timeout: Duration) -> Result<bool, ExecutorError> {
        let state = self
            .shared
            .state
            .lock()
            .map_err(|_| ExecutorError::Internal("serial queue lock poisoned".into()))?;
        let (_state, result) = self
            .shared
            .idle
            .wait_timeout_while(state, timeout, |s| s.running || !s.jobs.is_empty())
            .map_err(|_| ExecutorError::Internal("serial queue lock poisoned".into()))?;
        Ok(!result.timed_out())
    }
}

fn drain(shared: &SerialShared) {
    loop {
        let job = {
            let mut state = shared.state.lock().unwrap_or_else(PoisonError::into_inner);
            match state.jobs.pop_front() {
                Some(job) => job,
                None => {
                    state.running = false;
                    shared.idle.notify_all();
                    return;
                }
            }
        };
        run_guarded(job, &shared.name);
    }
}
