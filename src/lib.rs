//! # StrataDB
//!
//! An embeddable, ordered key-value storage engine organised in
//! **segments**. Each segment keeps an immutable, prefix-compressed sorted
//! run on disk and an in-memory delta cache of recent writes; compaction
//! periodically folds the delta cache into a new sorted run. Reads check
//! the delta cache, then a bloom filter, then a sparse index that narrows
//! the disk lookup to a single page.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stratadb::{Segment, SegmentConf, SegmentId};
//!
//! let segment = Segment::<u64, String>::open("/tmp/strata", SegmentId(1), SegmentConf::default(), None).unwrap();
//!
//! segment.put(1, "one".to_string()).unwrap();
//! segment.put(2, "two".to_string()).unwrap();
//! segment.delete(1).unwrap();
//! assert_eq!(segment.get(&1).unwrap(), None);
//!
//! // Fold the delta cache into a new base run.
//! segment.compact().unwrap();
//!
//! for entry in segment.iter().unwrap() {
//!     let (key, value) = entry.unwrap();
//!     println!("{key} = {value}");
//! }
//!
//! segment.close().unwrap();
//! ```
//!
//! Many segments are usually managed through a [`SegmentRegistry`], which
//! bounds how many are open at once:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stratadb::{RegistryConf, Segment, SegmentConf, SegmentId, SegmentRegistry, WorkerPool};
//!
//! let pool = WorkerPool::new("strata", 4, 256).unwrap();
//! let registry = SegmentRegistry::<Arc<Segment<u64, Vec<u8>>>>::for_segments(
//!     "/tmp/strata",
//!     SegmentConf::default(),
//!     RegistryConf::default(),
//!     Some(pool),
//! )
//! .unwrap();
//!
//! let segment = registry.get_or_load(SegmentId(7)).unwrap();
//! segment.put(10, b"payload".to_vec()).unwrap();
//! registry.close().unwrap();
//! ```
//!
//! ## Layers
//!
//! | Module            | Role                                                       |
//! |-------------------|------------------------------------------------------------|
//! | [`blockstore`]    | fixed-size, checksummed blocks                             |
//! | [`chunkstore`]    | variable-size chunks over blocks, filter pipeline          |
//! | [`sortedrun`]     | pages of diff-encoded keys, one chunk per page             |
//! | [`sparseindex`]   | last key and position of every page                        |
//! | [`bloom`]         | probabilistic "definitely absent" check                    |
//! | [`deltacache`]    | last-write-wins map of pending writes                      |
//! | [`merge`]         | base run overlaid by the delta cache                       |
//! | [`segment`]       | get / put / delete / flush / compact / iter                |
//! | [`registry`]      | bounded, single-flight cache of open segments              |
//! | [`executor`]      | worker pool and per-segment serial queues                  |
//!
//! ## Logging
//!
//! The crate emits [`tracing`] events and never installs a subscriber.

pub mod blockstore;
pub mod bloom;
pub mod chunkstore;
pub mod config;
pub mod deltacache;
pub mod encoding;
pub mod executor;
pub mod merge;
pub mod registry;
pub mod segment;
pub mod sortedrun;
pub mod sparseindex;

mod fsutil;
mod guard;

pub use bloom::BloomStats;
pub use chunkstore::ChunkFilter;
pub use config::{BloomFilterConf, ConfigError, SegmentConf};
pub use encoding::{EncodingError, TypeDescriptor};
pub use executor::{ExecutorError, SerialQueue, TaskHandle, WorkerPool};
pub use guard::AlreadyClosed;
pub use registry::{
    EntryState, RegistryConf, RegistryError, RegistryState, RegistryStats, RetryPolicy,
    SegmentRegistry,
};
pub use segment::{
    MetricsSnapshot, Segment, SegmentError, SegmentId, SegmentIterator, SegmentState,
};
