//! Immutable sorted runs.
//!
//! A sorted run is a file of `(K, V)` entries in strictly ascending key
//! order, stored as a sequence of chunks. Each chunk holds one *page* of up
//! to `page_size` entries:
//!
//! ```text
//! page  := entry*
//! entry := [shared varint][suffix_len varint][suffix bytes][value]
//! value := [bytes]                      (fixed-width types)
//!        | [len varint][bytes]          (variable-width types)
//! ```
//!
//! `shared` is the length of the prefix the key's byte form shares with the
//! previous key *of the same page*; the first entry of every page stores its
//! whole key, so any page decodes on its own. The writer reports the last
//! key and chunk position of every page, which is exactly what the sparse
//! index needs.
//!
//! Files are written to `<name>.tmp` and renamed into place by
//! [`SortedRunWriter::finish`]. A missing file reads as an empty run.

#[cfg(test)]
mod tests;

mod page;
mod reader;
mod writer;

pub use page::PageDecoder;
pub use reader::{SortedRunIter, SortedRunReader};
pub use writer::{RunSummary, SortedRunWriter};

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::chunkstore::{ChunkFilter, ChunkStoreError};
use crate::config::SegmentConf;
use crate::encoding::EncodingError;

#[derive(Debug, Error)]
pub enum SortedRunError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Chunk(#[from] ChunkStoreError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// A key was not strictly greater than its predecessor.
    #[error("keys must be strictly ascending: {inserted} written after {previous}")]
    OutOfOrder { previous: String, inserted: String },

    /// A page could not be decoded.
    #[error("corrupt page in {path} at position {position}: {reason}")]
    Corruption {
        path: PathBuf,
        position: u64,
        reason: String,
    },

    /// Another writer already owns the target's temp file.
    #[error("sorted run {0} is already being written")]
    WriterBusy(PathBuf),

    /// A chunk position no longer fits the 32-bit sparse index offset.
    #[error("chunk position {0} exceeds u32 range")]
    PositionOverflow(u64),
}

/// Format settings shared by sorted-run writers and readers.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConf {
    pub page_size: usize,
    pub block_size: usize,
    pub io_buffer_size: usize,
    pub encoding_filters: Vec<ChunkFilter>,
    pub decoding_filters: Vec<ChunkFilter>,
}

impl RunConf {
    pub fn from_segment(conf: &SegmentConf) -> Self {
        Self {
            page_size: conf.max_keys_in_page,
            block_size: conf.block_size,
            io_buffer_size: conf.io_buffer_size,
            encoding_filters: conf.encoding_filters.clone(),
            decoding_filters: conf.decoding_filters.clone(),
        }
    }
}

impl Default for RunConf {
    fn default() -> Self {
        Self::from_segment(&SegmentConf::default())
    }
}
