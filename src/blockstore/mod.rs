//! Fixed-size block files.
//!
//! The block store is the lowest storage layer. A file is a sequence of
//! equally sized blocks, each starting with a 16-byte header:
//!
//! ```text
//! [magic u64 LE][crc u64 LE][payload: block_size - 16 bytes]
//! ```
//!
//! `crc` is the CRC32 of the payload widened to 64 bits. Blocks are
//! addressed by number; block `n` starts at byte `n * block_size`.
//!
//! The writer buffers a partial last block and pads it with zero bytes when
//! closed, so every file length is a whole number of blocks. The reader
//! memory-maps the file; any block that fails its magic or CRC check, or
//! that extends past end of file, is reported as
//! [`BlockStoreError::Corruption`] naming the file and byte offset.

#[cfg(test)]
mod tests;

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use thiserror::Error;
use tracing::{trace, warn};

use crate::config::{ConfigError, validate_block_size};
use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::guard::{AlreadyClosed, CloseGuard};

/// Size of the per-block header in bytes.
pub const BLOCK_HEADER_SIZE: usize = 16;

/// Magic value at the start of every block (`"STRATABK"`).
pub const BLOCK_MAGIC: u64 = u64::from_le_bytes(*b"STRATABK");

// ------------------------------------------------------------------------------------------------
// Error types
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum BlockStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A block failed validation.
    #[error("corrupt block in {path} at offset {offset}: {reason}")]
    Corruption {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    /// A payload did not fit the block geometry.
    #[error("payload of {len} bytes does not fit a {capacity}-byte block payload")]
    PayloadTooLarge { len: usize, capacity: usize },

    /// A block was written after a partial (final) block.
    #[error("block written after a partial final block in {0}")]
    WriteAfterPartial(PathBuf),

    #[error(transparent)]
    Closed(#[from] AlreadyClosed),
}

// ------------------------------------------------------------------------------------------------
// On-disk format structures
// ------------------------------------------------------------------------------------------------

/// Header stored at the start of each block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub magic: u64,
    pub crc: u64,
}

impl Encode for BlockHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.magic.encode_to(buf)?;
        self.crc.encode_to(buf)
    }
}

impl Decode for BlockHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (magic, a) = u64::decode_from(buf)?;
        let (crc, b) = u64::decode_from(&buf[a..])?;
        Ok((Self { magic, crc }, a + b))
    }
}

/// One block's payload, always exactly `block_size - 16` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
    payload: Vec<u8>,
}

impl DataBlock {
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

fn payload_crc(payload: &[u8]) -> u64 {
    let mut hasher = Crc32::new();
    hasher.update(payload);
    u64::from(hasher.finalize())
}

fn payload_capacity(block_size: usize) -> usize {
    block_size - BLOCK_HEADER_SIZE
}

// ------------------------------------------------------------------------------------------------
// Writer
// ------------------------------------------------------------------------------------------------

/// Appends blocks to a file.
///
/// Full payloads are written straight through a [`BufWriter`]. A shorter
/// payload is the file's final block: it is held until
/// [`close`](Self::close), zero-padded and written then.
pub struct BlockStoreWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    block_size: usize,
    partial: Option<Vec<u8>>,
    blocks_written: u64,
    guard: CloseGuard,
}

impl BlockStoreWriter {
    /// Creates the file at `path`, which must not exist yet.
    pub fn create(
        path: impl AsRef<Path>,
        block_size: usize,
        io_buffer_size: usize,
    ) -> Result<Self, BlockStoreError> {
        validate_block_size(block_size)?;
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::with_capacity(io_buffer_size.max(block_size), file),
            block_size,
            partial: None,
            blocks_written: 0,
            guard: CloseGuard::new("block store writer"),
        })
    }

    pub fn payload_size(&self) -> usize {
        payload_capacity(self.block_size)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of blocks written so far, including a buffered partial block.
    pub fn block_count(&self) -> u64 {
        self.blocks_written + u64::from(self.partial.is_some())
    }

    /// Appends one block.
    ///
    /// A payload shorter than [`payload_size`](Self::payload_size) becomes
    /// the final block; writing anything after it is an error.
    pub fn write(&mut self, payload: &[u8]) -> Result<(), BlockStoreError> {
        self.guard.ensure_open()?;
        let capacity = self.payload_size();
        if payload.len() > capacity {
            return Err(BlockStoreError::PayloadTooLarge {
                len: payload.len(),
                capacity,
            });
        }
        if self.partial.is_some() {
            return Err(BlockStoreError::WriteAfterPartial(self.path.clone()));
        }
        if payload.len() < capacity {
            self.partial = Some(payload.to_vec());
            return Ok(());
        }
        self.write_full(payload)
    }

    fn write_full(&mut self, payload: &[u8]) -> Result<(), BlockStoreError> {
        let header = BlockHeader {
            magic: BLOCK_MAGIC,
            crc: payload_crc(payload),
        };
        self.writer.write_all(&encoding::encode_to_vec(&header)?)?;
        self.writer.write_all(payload)?;
        self.blocks_written += 1;
        trace!(path = %self.path.display(), block = self.blocks_written - 1, "block written");
        Ok(())
    }

    /// Pads and writes the partial block, flushes and fsyncs the file.
    ///
    /// # Errors
    ///
    /// Returns [`BlockStoreError::Closed`] when called twice.
    pub fn close(&mut self) -> Result<(), BlockStoreError> {
        self.guard.close()?;
        if let Some(mut tail) = self.partial.take() {
            tail.resize(self.payload_size(), 0);
            self.write_full(&tail)?;
        }
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

impl Drop for BlockStoreWriter {
    fn drop(&mut self) {
        if self.guard.is_closed() {
            return;
        }
        if let Err(e) = self.close() {
            warn!(path = %self.path.display(), "closing block writer on drop failed: {e}");
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// Random-access reader over a memory-mapped block file.
///
/// The file is immutable once its writer has closed, which keeps the
/// mapping valid for the reader's lifetime.
pub struct BlockStoreReader {
    path: PathBuf,
    mmap: Option<Mmap>,
    block_size: usize,
}

impl std::fmt::Debug for BlockStoreReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStoreReader")
            .field("path", &self.path)
            .field("block_size", &self.block_size)
            .field("blocks", &self.block_count())
            .finish()
    }
}

impl BlockStoreReader {
    /// Maps the file at `path`.
    ///
    /// # Errors
    ///
    /// [`BlockStoreError::Corruption`] when the length is not a whole number
    /// of blocks (a truncated file).
    pub fn open(path: impl AsRef<Path>, block_size: usize) -> Result<Self, BlockStoreError> {
        validate_block_size(block_size)?;
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len();

        if len % block_size as u64 != 0 {
            return Err(BlockStoreError::Corruption {
                path,
                offset: len - len % block_size as u64,
                reason: format!("file length {len} is not a multiple of block size {block_size}"),
            });
        }

        // Zero-length files cannot be mapped on every platform.
        let mmap = if len == 0 {
            None
        } else {
            // SAFETY: block files are written once and never modified after
            // their writer closes; the mapping is read-only.
            Some(unsafe { Mmap::map(&file)? })
        };

        Ok(Self {
            path,
            mmap,
            block_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn payload_size(&self) -> usize {
        payload_capacity(self.block_size)
    }

    pub fn block_count(&self) -> u64 {
        self.mmap
            .as_ref()
            .map_or(0, |m| (m.len() / self.block_size) as u64)
    }

    /// Reads and verifies block `block_no`.
    ///
    /// Returns `Ok(None)` when `block_no` is exactly one past the last block.
    pub fn read(&self, block_no: u64) -> Result<Option<DataBlock>, BlockStoreError> {
        let count = self.block_count();
        if block_no == count {
            return Ok(None);
        }
        let offset = block_no.saturating_mul(self.block_size as u64);
        let Some(mmap) = self.mmap.as_ref().filter(|_| block_no < count) else {
            return Err(self.corruption(offset, "block lies beyond end of file"));
        };

        let start = offset as usize;
        let raw = &mmap[start..start + self.block_size];
        let (header, used) = BlockHeader::decode_from(raw)?;
        if header.magic != BLOCK_MAGIC {
            return Err(self.corruption(
                offset,
                format!("bad block magic 0x{:016X}", header.magic),
            ));
        }
        let payload = &raw[used..];
        let actual = payload_crc(payload);
        if actual != header.crc {
            return Err(self.corruption(
                offset,
                format!(
                    "block checksum mismatch (stored 0x{:08X}, computed 0x{actual:08X})",
                    header.crc
                ),
            ));
        }

        Ok(Some(DataBlock {
            payload: payload.to_vec(),
        }))
    }

    fn corruption(&self, offset: u64, reason: impl Into<String>) -> BlockStoreError {
        let reason = reason.into();
        warn!(path = %self.path.display(), offset, %reason, "block corruption detected");
        BlockStoreError::Corruption {
            path: self.path.clone(),
            offset,
            reason,
        }
    }
}
