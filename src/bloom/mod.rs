//! Bloom filter over the keys of a segment's base run.
//!
//! Wraps [`bloomfilter::Bloom`] with query statistics and a small file
//! format:
//!
//! ```text
//! [len u32 LE][filter bytes][crc32 u32 LE]
//! ```
//!
//! A missing or zero-length file means "no filter": every probe answers
//! *maybe*, which is always safe.


use std::f64::consts::LN_2;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bloomfilter::Bloom;
use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{BloomSizing, ConfigError};
use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::fsutil;

#[derive(Debug, Error)]
pub enum BloomError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("corrupt bloom filter {path}: {reason}")]
    Corruption { path: PathBuf, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Counters describing how useful the filter has been.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BloomStats {
    /// Probes answered.
    pub queries: u64,
    /// Probes answered "definitely absent".
    pub definitely_absent: u64,
    /// "Maybe" answers later proven wrong by a disk lookup.
    pub false_positives: u64,
}

impl BloomStats {
    /// Share of "maybe" answers that turned out to be wrong.
    pub fn false_positive_ratio(&self) -> f64 {
        let positives = self.queries.saturating_sub(self.definitely_absent);
        if positives == 0 {
            return 0.0;
        }
        self.false_positives as f64 / positives as f64
    }
}

pub struct BloomFilter {
    inner: Option<Bloom<[u8]>>,
    queries: AtomicU64,
    definitely_absent: AtomicU64,
    false_positives: AtomicU64,
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("enabled", &self.inner.is_some())
            .field("stats", &self.stats())
            .finish()
    }
}

impl BloomFilter {
    /// An empty filter with the given dimensions.
    pub fn new(sizing: &BloomSizing) -> Result<Self, BloomError> {
        if sizing.bytes == 0 || sizing.hash_functions == 0 {
            return Err(ConfigError("bloom filter needs bytes and hash functions".into()).into());
        }
        // The crate derives k from (bits, items) as round(bits / items * ln 2);
        // pick the item count that lands on the requested k.
        let bits = (sizing.bytes * 8) as f64;
        let items = (bits * LN_2 / f64::from(sizing.hash_functions)).ceil().max(1.0) as usize;
        let inner = Bloom::new(sizing.bytes, items).map_err(|e| BloomError::Internal(e.to_string()))?;
        Ok(Self::with_inner(Some(inner)))
    }

    /// A filter that answers *maybe* to everything.
    pub fn disabled() -> Self {
        Self::with_inner(None)
    }

    fn with_inner(inner: Option<Bloom<[u8]>>) -> Self {
        Self {
            inner,
            queries: AtomicU64::new(0),
            definitely_absent: AtomicU64::new(0),
            false_positives: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn insert(&mut self, key: &[u8]) {
        if let Some(bloom) = self.inner.as_mut() {
            bloom.set(key);
        }
    }

    /// `false` means the key is definitely not in the run.
    pub fn maybe_contains(&self, key: &[u8]) -> bool {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let maybe = self.inner.as_ref().is_none_or(|bloom| bloom.check(key));
        if !maybe {
            self.definitely_absent.fetch_add(1, Ordering::Relaxed);
        }
        maybe
    }

    /// Records that a *maybe* answer was wrong.
    pub fn record_false_positive(&self) {
        self.false_positives.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> BloomStats {
        BloomStats {
            queries: self.queries.load(Ordering::Relaxed),
            definitely_absent: self.definitely_absent.load(Ordering::Relaxed),
            false_positives: self.false_positives.load(Ordering::Relaxed),
        }
    }

    pub fn hash_functions(&self) -> Option<u32> {
        self.inner.as_ref().map(|b| b.number_of_hash_functions())
    }

    // --------------------------------------------------------------------------------------------
    // Persistence
    // --------------------------------------------------------------------------------------------

    /// Writes the filter to `path` atomically.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), BloomError> {
        let path = path.as_ref();
        let Some(bloom) = &self.inner else {
            fsutil::write_atomic(path, &[])?;
            return Ok(());
        };
        let mut buf = encoding::encode_to_vec(&bloom.as_slice().to_vec())?;
        let mut hasher = Crc32::new();
        hasher.update(&buf);
        hasher.finalize().encode_to(&mut buf)?;
        fsutil::write_atomic(path, &buf)?;
        debug!(path = %path.display(), bytes = buf.len(), "bloom filter written");
        Ok(())
    }

    /// Loads the filter at `path`; missing or empty files give a disabled filter.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BloomError> {
        let path = path.as_ref();
        let buf = match fs::read(path) {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::disabled()),
            Err(e) => return Err(e.into()),
        };
        if buf.is_empty() {
            return Ok(Self::disabled());
        }

        let corruption = |reason: String| {
            warn!(path = %path.display(), %reason, "bloom filter corruption detected");
            BloomError::Corruption {
                path: path.to_path_buf(),
                reason,
            }
        };

        let (bytes, used) = Vec::<u8>::decode_from(&buf).map_err(|e| corruption(e.to_string()))?;
        let (stored, _) = u32::decode_from(&buf[used..]).map_err(|e| corruption(e.to_string()))?;
        let mut hasher = Crc32::new();
        hasher.update(&buf[..used]);
        let computed = hasher.finalize();
        if stored != computed {
            return Err(corruption(format!(
                "checksum mismatch (stored 0x{stored:08X}, computed 0x{computed:08X})"
            )));
        }

        let inner = Bloom::from_slice(&bytes).map_err(|e| corruption(e.to_string()))?;
        Ok(Self::with_inner(Some(inner)))
    }
}
