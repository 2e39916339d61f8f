//! Variable-length chunks on top of the block store.
//!
//! A chunk is a 32-byte header followed by its (filtered) payload. Chunks
//! are packed back to back into the payload area of consecutive blocks and
//! may straddle block boundaries. A chunk's *position* is its logical byte
//! offset in the concatenation of all block payloads, so block
//! `position / payload_size` holds its first byte.
//!
//! ## Chunk header (little-endian)
//!
//! ```text
//! [magic u64][version u32][payload_length u32][crc u64][flags u64]
//! ```
//!
//! `crc` and `flags` are owned by the filter pipeline (see [`filters`]).
//! The zero padding of a file's last block reads as an all-zero header,
//! which ends sequential iteration just like physical end of file.

#[cfg(test)]
mod tests;

pub mod filters;

pub use filters::{ChunkData, ChunkFilter, FilterError};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{trace, warn};

use crate::blockstore::{BlockStoreError, BlockStoreReader, BlockStoreWriter};
use crate::encoding::{self, Decode, Encode, EncodingError, MAX_BYTE_LEN};
use crate::executor::{ExecutorError, TaskHandle, WorkerPool};

/// Size of a serialized [`ChunkHeader`].
pub const CHUNK_HEADER_SIZE: usize = 32;

/// Magic value opening every chunk header (`"STRATACK"`).
pub const CHUNK_MAGIC: u64 = u64::from_le_bytes(*b"STRATACK");

/// Current chunk format version.
pub const CHUNK_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ChunkStoreError {
    #[error(transparent)]
    Block(#[from] BlockStoreError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// A chunk header or payload failed validation.
    #[error("corrupt chunk in {path} at position {position}: {reason}")]
    Corruption {
        path: PathBuf,
        position: u64,
        reason: String,
    },

    #[error("chunk payload must not be empty")]
    EmptyChunk,

    #[error("chunk payload of {0} bytes exceeds the format limit")]
    ChunkTooLarge(usize),

    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

// ------------------------------------------------------------------------------------------------
// Header
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub magic: u64,
    pub version: u32,
    pub payload_length: u32,
    pub crc: u64,
    pub flags: u64,
}

impl Encode for ChunkHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.magic.encode_to(buf)?;
        self.version.encode_to(buf)?;
        self.payload_length.encode_to(buf)?;
        self.crc.encode_to(buf)?;
        self.flags.encode_to(buf)
    }
}

impl Decode for ChunkHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (magic, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (version, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (payload_length, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (crc, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (flags, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                magic,
                version,
                payload_length,
                crc,
                flags,
            },
            offset,
        ))
    }
}

/// A decoded chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub position: u64,
    /// Position right after this chunk, where the next one would start.
    pub next_position: u64,
    pub payload: Vec<u8>,
}

// ------------------------------------------------------------------------------------------------
// Writer
// ------------------------------------------------------------------------------------------------

/// Appends chunks through a rolling block cursor.
///
/// Bytes accumulate in `current` until a block payload is full, at which
/// point the block is written and the cursor rolls over.
pub struct ChunkStoreWriter {
    blocks: BlockStoreWriter,
    filters: Vec<ChunkFilter>,
    current: Vec<u8>,
    position: u64,
}

impl ChunkStoreWriter {
    pub fn create(
        path: impl AsRef<Path>,
        block_size: usize,
        io_buffer_size: usize,
        filters: Vec<ChunkFilter>,
    ) -> Result<Self, ChunkStoreError> {
        let blocks = BlockStoreWriter::create(path, block_size, io_buffer_size)?;
        let capacity = blocks.payload_size();
        Ok(Self {
            blocks,
            filters,
            current: Vec::with_capacity(capacity),
            position: 0,
        })
    }

    /// Position the next chunk will be written at.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn path(&self) -> &Path {
        self.blocks.path()
    }

    /// Filters `payload`, appends it as one chunk and returns its position.
    pub fn write_chunk(&mut self, payload: &[u8]) -> Result<u64, ChunkStoreError> {
        if payload.is_empty() {
            return Err(ChunkStoreError::EmptyChunk);
        }
        let data = filters::encode_pipeline(&self.filters, ChunkData::new(payload.to_vec()));
        let payload_length = u32::try_from(data.payload.len())
            .ok()
            .filter(|len| *len <= MAX_BYTE_LEN)
            .ok_or(ChunkStoreError::ChunkTooLarge(data.payload.len()))?;

        let header = ChunkHeader {
            magic: CHUNK_MAGIC,
            version: CHUNK_VERSION,
            payload_length,
            crc: data.crc,
            flags: data.flags,
        };

        let position = self.position;
        self.append(&encoding::encode_to_vec(&header)?)?;
        self.append(&data.payload)?;
        trace!(path = %self.path().display(), position, len = payload_length, "chunk written");
        Ok(position)
    }

    fn append(&mut self, mut bytes: &[u8]) -> Result<(), ChunkStoreError> {
        let capacity = self.blocks.payload_size();
        while !bytes.is_empty() {
            let take = (capacity - self.current.len()).min(bytes.len());
            self.current.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
            self.position += take as u64;
            if self.current.len() == capacity {
                self.blocks.write(&self.current)?;
                self.current.clear();
            }
        }
        Ok(())
    }

    /// Writes the partially filled block and closes the file.
    pub fn close(&mut self) -> Result<(), ChunkStoreError> {
        if !self.current.is_empty() {
            self.blocks.write(&self.current)?;
            self.current.clear();
        }
        self.blocks.close()?;
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// Single-block cache so consecutive reads from one block verify it once.
#[derive(Default)]
struct BlockCursor {
    cached: Option<(u64, Vec<u8>)>,
}

impl BlockCursor {
    fn payload(
        &mut self,
        blocks: &BlockStoreReader,
        block_no: u64,
    ) -> Result<Option<&[u8]>, BlockStoreError> {
        let hit = matches!(&self.cached, Some((cached_no, _)) if *cached_no == block_no);
        if !hit {
            match blocks.read(block_no)? {
                Some(block) => self.cached = Some((block_no, block.into_payload())),
                None => return Ok(None),
            }
        }
        Ok(self.cached.as_ref().map(|(_, payload)| payload.as_slice()))
    }

    /// Reads up to `len` bytes at `position`; fewer only at end of file.
    fn read_span(
        &mut self,
        blocks: &BlockStoreReader,
        position: u64,
        len: usize,
    ) -> Result<Vec<u8>, BlockStoreError> {
        let payload_size = blocks.payload_size() as u64;
        let mut out = Vec::with_capacity(len);
        let mut pos = position;
        while out.len() < len {
            let offset = (pos % payload_size) as usize;
            let Some(payload) = self.payload(blocks, pos / payload_size)? else {
                break;
            };
            let take = (len - out.len()).min(payload.len() - offset);
            out.extend_from_slice(&payload[offset..offset + take]);
            pos += take as u64;
        }
        Ok(out)
    }
}

/// Reads chunks by position or sequentially.
pub struct ChunkStoreReader {
    blocks: BlockStoreReader,
    filters: Vec<ChunkFilter>,
}

impl std::fmt::Debug for ChunkStoreReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStoreReader")
            .field("blocks", &self.blocks)
            .field("filters", &self.filters)
            .finish()
    }
}

impl ChunkStoreReader {
    pub fn open(
        path: impl AsRef<Path>,
        block_size: usize,
        filters: Vec<ChunkFilter>,
    ) -> Result<Self, ChunkStoreError> {
        Ok(Self {
            blocks: BlockStoreReader::open(path, block_size)?,
            filters,
        })
    }

    pub fn path(&self) -> &Path {
        self.blocks.path()
    }

    /// Reads the chunk at `position`.
    ///
    /// Returns `Ok(None)` at end of file or at the zero padding after the
    /// last chunk.
    pub fn read_chunk_at(&self, position: u64) -> Result<Option<Chunk>, ChunkStoreError> {
        self.read_with(&mut BlockCursor::default(), position)
    }

    /// Sequential iterator from the first chunk.
    pub fn chunks(self: &Arc<Self>) -> ChunkIter {
        self.chunks_from(0)
    }

    /// Sequential iterator starting at `position`.
    pub fn chunks_from(self: &Arc<Self>, position: u64) -> ChunkIter {
        ChunkIter {
            reader: Arc::clone(self),
            cursor: BlockCursor::default(),
            position,
            done: false,
        }
    }

    /// Reads the chunk at `position` on `pool`.
    pub fn read_chunk_async(
        self: &Arc<Self>,
        pool: &WorkerPool,
        position: u64,
    ) -> Result<TaskHandle<Result<Option<Chunk>, ChunkStoreError>>, ChunkStoreError> {
        let reader = Arc::clone(self);
        Ok(pool.submit(move || reader.read_chunk_at(position))?)
    }

    fn read_with(
        &self,
        cursor: &mut BlockCursor,
        position: u64,
    ) -> Result<Option<Chunk>, ChunkStoreError> {
        let raw = cursor.read_span(&self.blocks, position, CHUNK_HEADER_SIZE)?;
        if raw.iter().all(|&b| b == 0) {
            return Ok(None);
        }
        if raw.len() < CHUNK_HEADER_SIZE {
            return Err(self.corruption(position, "truncated chunk header"));
        }

        let (header, _) = ChunkHeader::decode_from(&raw)?;
        if header.magic != CHUNK_MAGIC {
            return Err(self.corruption(
                position,
                format!("bad chunk magic 0x{:016X}", header.magic),
            ));
        }
        if header.version != CHUNK_VERSION {
            return Err(self.corruption(
                position,
                format!("unsupported chunk version {}", header.version),
            ));
        }
        if header.payload_length == 0 || header.payload_length > MAX_BYTE_LEN {
            return Err(self.corruption(
                position,
                format!("invalid payload length {}", header.payload_length),
            ));
        }

        let len = header.payload_length as usize;
        let body_position = position + CHUNK_HEADER_SIZE as u64;
        let payload = cursor.read_span(&self.blocks, body_position, len)?;
        if payload.len() < len {
            return Err(self.corruption(
                position,
                format!("truncated payload ({} of {len} bytes)", payload.len()),
            ));
        }

        let data = filters::decode_pipeline(
            &self.filters,
            ChunkData {
                flags: header.flags,
                crc: header.crc,
                payload,
            },
        )
        .map_err(|e| self.corruption(position, e.to_string()))?;

        Ok(Some(Chunk {
            position,
            next_position: body_position + len as u64,
            payload: data.payload,
        }))
    }

    fn corruption(&self, position: u64, reason: impl Into<String>) -> ChunkStoreError {
        let reason = reason.into();
        warn!(path = %self.path().display(), position, %reason, "chunk corruption detected");
        ChunkStoreError::Corruption {
            path: self.path().to_path_buf(),
            position,
            reason,
        }
    }
}

/// Forward-only iterator over the chunks of one file.
///
/// Yields each error once and then stops.
pub struct ChunkIter {
    reader: Arc<ChunkStoreReader>,
    cursor: BlockCursor,
    position: u64,
    done: bool,
}

impl Iterator for ChunkIter {
    type Item = Result<Chunk, ChunkStoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read_with(&mut self.cursor, self.position) {
            Ok(Some(chunk)) => {
                self.position = chunk.next_position;
                Some(Ok(chunk))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
