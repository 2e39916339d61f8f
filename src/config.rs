//! Segment configuration.
//!
//! Thresholds are plain public fields with defaults from
//! [`SegmentConf::default()`]. Every structure that consumes a
//! configuration calls [`SegmentConf::validate`] before touching disk.


use std::f64::consts::LN_2;

use thiserror::Error;

use crate::blockstore::BLOCK_HEADER_SIZE;
use crate::chunkstore::ChunkFilter;

/// A configuration parameter is out of range or inconsistent.
#[derive(Debug, Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError(msg.into())
}

// ------------------------------------------------------------------------------------------------
// Bloom filter sizing
// ------------------------------------------------------------------------------------------------

/// Bloom filter parameters.
///
/// A filter is fully determined by its bit-array size, its hash function
/// count and the number of keys it holds. The key count comes from the
/// segment at compaction time unless [`expected_keys`](Self::expected_keys)
/// pins it. Of the remaining three knobs supply the ones you care about;
/// the rest are derived:
///
/// | supplied                          | derived                          |
/// |-----------------------------------|----------------------------------|
/// | `hash_functions` + `bytes`        | false positive rate              |
/// | `bytes` + `false_positive_rate`   | hash functions                   |
/// | `hash_functions` + `false_positive_rate` | bytes                     |
/// | `false_positive_rate` only        | optimal bytes and hash functions |
/// | `bytes` only                      | optimal hash functions           |
#[derive(Debug, Clone, PartialEq)]
pub struct BloomFilterConf {
    /// Overrides the key count estimated from segment contents.
    pub expected_keys: Option<usize>,
    pub hash_functions: Option<u32>,
    /// Size of the bit array in bytes.
    pub bytes: Option<usize>,
    /// Target probability that `maybe_contains` answers yes for an absent key.
    ///
    /// Default: 0.01.
    pub false_positive_rate: Option<f64>,
}

impl Default for BloomFilterConf {
    fn default() -> Self {
        Self {
            expected_keys: None,
            hash_functions: None,
            bytes: None,
            false_positive_rate: Some(0.01),
        }
    }
}

/// Concrete filter dimensions after resolving a [`BloomFilterConf`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BloomSizing {
    pub bytes: usize,
    pub hash_functions: u32,
    pub expected_keys: usize,
}

/// Upper bound on hash functions; beyond this lookups get slower without any accuracy gain.
pub const MAX_BLOOM_HASH_FUNCTIONS: u32 = 32;

impl BloomFilterConf {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self
            .hash_functions
            .is_some_and(|k| !(1..=MAX_BLOOM_HASH_FUNCTIONS).contains(&k))
        {
            return Err(invalid(format!(
                "bloom hash_functions must be in 1..={MAX_BLOOM_HASH_FUNCTIONS}"
            )));
        }
        if self.bytes == Some(0) {
            return Err(invalid("bloom bytes must be > 0"));
        }
        if self
            .false_positive_rate
            .is_some_and(|p| !(p > 0.0 && p < 1.0))
        {
            return Err(invalid("bloom false_positive_rate must be in (0.0, 1.0)"));
        }
        if self.expected_keys == Some(0) {
            return Err(invalid("bloom expected_keys must be > 0"));
        }
        if self.bytes.is_none() && self.false_positive_rate.is_none() {
            return Err(invalid(
                "bloom filter needs at least one of bytes or false_positive_rate",
            ));
        }
        Ok(())
    }

    /// Resolve the filter dimensions for `estimated_keys` keys.
    pub fn resolve(&self, estimated_keys: usize) -> Result<BloomSizing, ConfigError> {
        self.validate()?;
        let n = self.expected_keys.unwrap_or(estimated_keys).max(1);
        let nf = n as f64;

        let (bytes, hash_functions) = match (self.hash_functions, self.bytes, self.false_positive_rate)
        {
            (Some(k), Some(bytes), _) => (bytes, k),
            (None, Some(bytes), Some(p)) => (bytes, hashes_for_rate(p)),
            (None, Some(bytes), None) => (bytes, optimal_hashes(bytes, n)),
            (Some(k), None, Some(p)) => {
                // p = (1 - e^(-kn/m))^k  =>  m = -kn / ln(1 - p^(1/k))
                let kf = f64::from(k);
                let bits = -kf * nf / (1.0 - p.powf(1.0 / kf)).ln();
                (bits_to_bytes(bits), k)
            }
            (None, None, Some(p)) => {
                let bits = -nf * p.ln() / (LN_2 * LN_2);
                let bytes = bits_to_bytes(bits);
                (bytes, optimal_hashes(bytes, n))
            }
            (_, None, None) => {
                return Err(invalid(
                    "bloom filter needs at least one of bytes or false_positive_rate",
                ));
            }
        };

        Ok(BloomSizing {
            bytes,
            hash_functions,
            expected_keys: n,
        })
    }
}

impl BloomSizing {
    /// Predicted false positive rate once `expected_keys` keys are inserted.
    pub fn estimated_false_positive_rate(&self) -> f64 {
        let m = (self.bytes * 8) as f64;
        let k = f64::from(self.hash_functions);
        let n = self.expected_keys as f64;
        (1.0 - (-k * n / m).exp()).powf(k)
    }
}

fn bits_to_bytes(bits: f64) -> usize {
    ((bits / 8.0).ceil() as usize).max(1)
}

fn hashes_for_rate(p: f64) -> u32 {
    ((-p.log2()).round() as u32).clamp(1, MAX_BLOOM_HASH_FUNCTIONS)
}

fn optimal_hashes(bytes: usize, keys: usize) -> u32 {
    let k = ((bytes * 8) as f64 / keys as f64 * LN_2).round() as u32;
    k.clamp(1, MAX_BLOOM_HASH_FUNCTIONS)
}

// ------------------------------------------------------------------------------------------------
// Segment configuration
// ------------------------------------------------------------------------------------------------

/// Thresholds and on-disk format settings for a [`Segment`](crate::Segment).
///
/// # Example
///
/// ```rust
/// use stratadb::{ChunkFilter, SegmentConf};
///
/// let conf = SegmentConf {
///     max_keys_in_page: 32,
///     encoding_filters: vec![ChunkFilter::Crc32],
///     decoding_filters: vec![ChunkFilter::Crc32],
///     ..SegmentConf::default()
/// };
/// conf.validate().unwrap();
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentConf {
    /// Delta cache size at which background compaction is scheduled.
    ///
    /// Default: 50 000.
    pub max_keys_in_delta_cache: usize,

    /// Delta cache size a write burst may grow to before a compaction is
    /// forced ahead of the burst.
    ///
    /// Default: 100 000. Must be ≥ `max_keys_in_delta_cache`.
    pub max_keys_in_delta_cache_during_writing: usize,

    /// Number of writes since the last flush that triggers writing a new
    /// overflow file.
    ///
    /// Default: 5 000. Must be ≥ 1.
    pub max_unflushed_keys: usize,

    /// Key count past which [`Segment::should_be_split`](crate::Segment::should_be_split)
    /// answers yes.
    ///
    /// Default: 10 000 000.
    pub max_keys_in_segment: usize,

    /// Entries per sorted-run page (one chunk and one sparse index entry each).
    ///
    /// Default: 64. Must be ≥ 1.
    pub max_keys_in_page: usize,

    pub bloom: BloomFilterConf,

    /// Block size in bytes, header included.
    ///
    /// Default: 4096. Must be a multiple of 16 and larger than the block header.
    pub block_size: usize,

    /// Capacity of the buffered writer in front of block files.
    ///
    /// Default: 64 KiB.
    pub io_buffer_size: usize,

    /// Filters applied to every chunk on write, in order.
    pub encoding_filters: Vec<ChunkFilter>,

    /// Filters applied to every chunk on read, in order. Must undo
    /// `encoding_filters`, so it is normally the same list reversed.
    pub decoding_filters: Vec<ChunkFilter>,
}

impl Default for SegmentConf {
    fn default() -> Self {
        Self {
            max_keys_in_delta_cache: 50_000,
            max_keys_in_delta_cache_during_writing: 100_000,
            max_unflushed_keys: 5_000,
            max_keys_in_segment: 10_000_000,
            max_keys_in_page: 64,
            bloom: BloomFilterConf::default(),
            block_size: 4096,
            io_buffer_size: 64 * 1024,
            encoding_filters: vec![ChunkFilter::MagicNumber, ChunkFilter::Crc32, ChunkFilter::Lz4],
            decoding_filters: vec![ChunkFilter::Lz4, ChunkFilter::Crc32, ChunkFilter::MagicNumber],
        }
    }
}

impl SegmentConf {
    /// Validates all parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_keys_in_delta_cache == 0 {
            return Err(invalid("max_keys_in_delta_cache must be >= 1"));
        }
        if self.max_keys_in_delta_cache_during_writing < self.max_keys_in_delta_cache {
            return Err(invalid(
                "max_keys_in_delta_cache_during_writing must be >= max_keys_in_delta_cache",
            ));
        }
        if self.max_unflushed_keys == 0 {
            return Err(invalid("max_unflushed_keys must be >= 1"));
        }
        if self.max_keys_in_segment == 0 {
            return Err(invalid("max_keys_in_segment must be >= 1"));
        }
        if self.max_keys_in_page == 0 {
            return Err(invalid("max_keys_in_page must be >= 1"));
        }
        validate_block_size(self.block_size)?;
        if self.io_buffer_size == 0 {
            return Err(invalid("io_buffer_size must be > 0"));
        }
        self.bloom.validate()?;
        validate_filter_pair(&self.encoding_filters, &self.decoding_filters)
    }
}

/// Block sizes must hold a header plus a payload and stay 16-byte aligned.
pub fn validate_block_size(block_size: usize) -> Result<(), ConfigError> {
    if block_size <= BLOCK_HEADER_SIZE || block_size % 16 != 0 {
        return Err(invalid(format!(
            "block_size must be a multiple of 16 larger than {BLOCK_HEADER_SIZE}, got {block_size}"
        )));
    }
    if u32::try_from(block_size).is_err() {
        return Err(invalid("block_size must fit in u32"));
    }
    Ok(())
}

/// The decode pipeline must be the encode pipeline in reverse.
///
/// The order is kept explicit in configuration so that a stored chunk is
/// always read back through the exact inverse of what wrote it.
pub fn validate_filter_pair(
    encoding: &[ChunkFilter],
    decoding: &[ChunkFilter],
) -> Result<(), ConfigError> {
    let reversed: Vec<&ChunkFilter> = encoding.iter().rev().collect();
    let decoding: Vec<&ChunkFilter> = decoding.iter().collect();
    if reversed != decoding {
        return Err(invalid(format!(
            "decoding_filters {decoding:?} do not reverse encoding_filters {encoding:?}"
        )));
    }
    Ok(())
}
