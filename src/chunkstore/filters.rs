//! Chunk filter pipeline.
//!
//! Every chunk payload passes through an ordered list of filters before it
//! is written and through the inverse list after it is read. Each filter
//! owns one bit in the chunk header's `flags` word; a decode filter whose
//! bit is missing means the chunk was not written by the matching encoder.

use crc32fast::Hasher as Crc32;
use thiserror::Error;

use crate::encoding::MAX_BYTE_LEN;

pub const FLAG_MAGIC_NUMBER: u64 = 1 << 0;
pub const FLAG_CRC32: u64 = 1 << 1;
pub const FLAG_LZ4: u64 = 1 << 2;
pub const FLAG_XOR: u64 = 1 << 3;

/// Stamp prepended to payloads by [`ChunkFilter::MagicNumber`] (`"STRATAPL"`).
pub const PAYLOAD_MAGIC: u64 = u64::from_le_bytes(*b"STRATAPL");

/// One stage of the chunk encode/decode pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkFilter {
    /// Passes data through untouched.
    Identity,
    /// Stamps the payload with [`PAYLOAD_MAGIC`] and checks it on read.
    MagicNumber,
    /// Stores the CRC32 of the payload in the header and verifies it on read.
    Crc32,
    /// LZ4 block compression with a prepended uncompressed size.
    Lz4,
    /// XOR with a repeating 8-byte key. Obfuscation only; provides no secrecy.
    Xor(u64),
}

/// A chunk in flight through the filter pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkData {
    pub flags: u64,
    pub crc: u64,
    pub payload: Vec<u8>,
}

impl ChunkData {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            flags: 0,
            crc: 0,
            payload,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("{filter} flag not set on chunk")]
    MissingFlag { filter: &'static str },

    #[error("payload checksum mismatch (stored 0x{stored:08X}, computed 0x{computed:08X})")]
    ChecksumMismatch { stored: u64, computed: u64 },

    #[error("payload stamp mismatch (found 0x{0:016X})")]
    BadStamp(u64),

    #[error("lz4: {0}")]
    Decompress(String),
}

impl ChunkFilter {
    pub fn name(&self) -> &'static str {
        match self {
            ChunkFilter::Identity => "identity",
            ChunkFilter::MagicNumber => "magic-number",
            ChunkFilter::Crc32 => "crc32",
            ChunkFilter::Lz4 => "lz4",
            ChunkFilter::Xor(_) => "xor",
        }
    }

    /// Header bit owned by this filter; `0` for [`ChunkFilter::Identity`].
    pub fn flag(&self) -> u64 {
        match self {
            ChunkFilter::Identity => 0,
            ChunkFilter::MagicNumber => FLAG_MAGIC_NUMBER,
            ChunkFilter::Crc32 => FLAG_CRC32,
            ChunkFilter::Lz4 => FLAG_LZ4,
            ChunkFilter::Xor(_) => FLAG_XOR,
        }
    }

    pub fn encode(&self, mut data: ChunkData) -> ChunkData {
        match self {
            ChunkFilter::Identity => {}
            ChunkFilter::MagicNumber => {
                let mut stamped = Vec::with_capacity(data.payload.len() + 8);
                stamped.extend_from_slice(&PAYLOAD_MAGIC.to_le_bytes());
                stamped.extend_from_slice(&data.payload);
                data.payload = stamped;
            }
            ChunkFilter::Crc32 => data.crc = crc32(&data.payload),
            ChunkFilter::Lz4 => data.payload = lz4_flex::compress_prepend_size(&data.payload),
            ChunkFilter::Xor(key) => xor_in_place(&mut data.payload, *key),
        }
        data.flags |= self.flag();
        data
    }

    pub fn decode(&self, mut data: ChunkData) -> Result<ChunkData, FilterError> {
        if data.flags & self.flag() != self.flag() {
            return Err(FilterError::MissingFlag {
                filter: self.name(),
            });
        }
        match self {
            ChunkFilter::Identity => {}
            ChunkFilter::MagicNumber => {
                let stamp = data
                    .payload
                    .get(..8)
                    .and_then(|b| <[u8; 8]>::try_from(b).ok())
                    .map(u64::from_le_bytes)
                    .unwrap_or(0);
                if stamp != PAYLOAD_MAGIC {
                    return Err(FilterError::BadStamp(stamp));
                }
                data.payload.drain(..8);
            }
            ChunkFilter::Crc32 => {
                let computed = crc32(&data.payload);
                if computed != data.crc {
                    return Err(FilterError::ChecksumMismatch {
                        stored: data.crc,
                        computed,
                    });
                }
            }
            ChunkFilter::Lz4 => {
                let declared = data
                    .payload
                    .get(..4)
                    .and_then(|b| <[u8; 4]>::try_from(b).ok())
                    .map(u32::from_le_bytes)
                    .ok_or_else(|| FilterError::Decompress("missing size prefix".into()))?;
                if declared > MAX_BYTE_LEN {
                    return Err(FilterError::Decompress(format!(
                        "declared size {declared} exceeds {MAX_BYTE_LEN}"
                    )));
                }
                data.payload = lz4_flex::decompress_size_prepended(&data.payload)
                    .map_err(|e| FilterError::Decompress(e.to_string()))?;
            }
            ChunkFilter::Xor(key) => xor_in_place(&mut data.payload, *key),
        }
        Ok(data)
    }
}

/// Runs `data` through `filters` in order.
pub fn encode_pipeline(filters: &[ChunkFilter], data: ChunkData) -> ChunkData {
    filters.iter().fold(data, |data, filter| filter.encode(data))
}

/// Runs `data` through `filters` in order, stopping at the first failure.
pub fn decode_pipeline(filters: &[ChunkFilter], data: ChunkData) -> Result<ChunkData, FilterError> {
    filters
        .iter()
        .try_fold(data, |data, filter| filter.decode(data))
}

fn crc32(bytes: &[u8]) -> u64 {
    let mut hasher = Crc32::new();
    hasher.update(bytes);
    u64::from(hasher.finalize())
}

fn xor_in_place(bytes: &mut [u8], key: u64) {
    let key = key.to_le_bytes();
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte ^= key[i % key.len()];
    }
}
