use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::page::PageEncoder;
use super::{RunConf, SortedRunError};
use crate::chunkstore::{ChunkStoreError, ChunkStoreWriter};
use crate::blockstore::BlockStoreError;
use crate::encoding::TypeDescriptor;
use crate::fsutil;

/// Result of a finished run: one sparse index entry per page.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary<K> {
    /// `(last key of page, chunk position of page)`, ascending.
    pub index: Vec<(K, u32)>,
    pub entry_count: u64,
}

impl<K> RunSummary<K> {
    pub fn max_key(&self) -> Option<&K> {
        self.index.last().map(|(k, _)| k)
    }
}

/// Streams strictly ascending entries into a new sorted run.
///
/// Nothing is visible at the target path until [`finish`](Self::finish)
/// renames the temp file into place. Dropping an unfinished writer deletes
/// the temp file.
pub struct SortedRunWriter<K: TypeDescriptor, V: TypeDescriptor> {
    chunks: Option<ChunkStoreWriter>,
    target: PathBuf,
    tmp: PathBuf,
    page_size: usize,
    page: PageEncoder,
    key_buf: Vec<u8>,
    last_key: Option<K>,
    index: Vec<(K, u32)>,
    entry_count: u64,
    finished: bool,
    _value: PhantomData<fn(V)>,
}

impl<K: TypeDescriptor, V: TypeDescriptor> SortedRunWriter<K, V> {
    /// Starts a run that will be published at `target`.
    ///
    /// # Errors
    ///
    /// [`SortedRunError::WriterBusy`] if another writer holds the temp file.
    pub fn create(target: impl AsRef<Path>, conf: &RunConf) -> Result<Self, SortedRunError> {
        let target = target.as_ref().to_path_buf();
        let tmp = fsutil::tmp_path_for(&target);
        let chunks = ChunkStoreWriter::create(
            &tmp,
            conf.block_size,
            conf.io_buffer_size,
            conf.encoding_filters.clone(),
        )
        .map_err(|e| match e {
            ChunkStoreError::Block(BlockStoreError::Io(io))
                if io.kind() == io::ErrorKind::AlreadyExists =>
            {
                SortedRunError::WriterBusy(target.clone())
            }
            other => other.into(),
        })?;

        Ok(Self {
            chunks: Some(chunks),
            target,
            tmp,
            page_size: conf.page_size.max(1),
            page: PageEncoder::default(),
            key_buf: Vec::new(),
            last_key: None,
            index: Vec::new(),
            entry_count: 0,
            finished: false,
            _value: PhantomData,
        })
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Appends one entry.
    ///
    /// # Errors
    ///
    /// [`SortedRunError::OutOfOrder`] naming both keys when `key` is not
    /// strictly greater than the previous key.
    pub fn put(&mut self, key: K, value: &V) -> Result<(), SortedRunError> {
        if let Some(previous) = &self.last_key {
            if key <= *previous {
                return Err(SortedRunError::OutOfOrder {
                    previous: format!("{previous:?}"),
                    inserted: format!("{key:?}"),
                });
            }
        }

        self.key_buf.clear();
        key.write_bytes(&mut self.key_buf);
        self.page.push(&self.key_buf, value)?;
        self.last_key = Some(key);
        self.entry_count += 1;

        if self.page.len() >= self.page_size {
            self.flush_page()?;
        }
        Ok(())
    }

    fn flush_page(&mut self) -> Result<(), SortedRunError> {
        if self.page.is_empty() {
            return Ok(());
        }
        let (Some(chunks), Some(last)) = (self.chunks.as_mut(), self.last_key.as_ref()) else {
            return Ok(());
        };
        let payload = self.page.take();
        let position = chunks.write_chunk(&payload)?;
        let offset = u32::try_from(position).map_err(|_| SortedRunError::PositionOverflow(position))?;
        self.index.push((last.clone(), offset));
        Ok(())
    }

    /// Writes the last page, closes the file and renames it into place.
    pub fn finish(mut self) -> Result<RunSummary<K>, SortedRunError> {
        self.flush_page()?;
        if let Some(mut chunks) = self.chunks.take() {
            chunks.close()?;
        }
        fsutil::publish(&self.tmp, &self.target)?;
        self.finished = true;

        debug!(
            path = %self.target.display(),
            entries = self.entry_count,
            pages = self.index.len(),
            "sorted run written"
        );

        Ok(RunSummary {
            index: std::mem::take(&mut self.index),
            entry_count: self.entry_count,
        })
    }

    /// Like [`finish`](Self::finish) for a run fed from an iterator.
    pub fn write_all<I>(
        target: impl AsRef<Path>,
        conf: &RunConf,
        entries: I,
    ) -> Result<RunSummary<K>, SortedRunError>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut writer = Self::create(target, conf)?;
        for (key, value) in entries {
            writer.put(key, &value)?;
        }
        writer.finish()
    }
}

impl<K: TypeDescriptor, V: TypeDescriptor> Drop for SortedRunWriter<K, V> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Close the block file before unlinking it.
        drop(self.chunks.take());
        if let Err(e) = fsutil::remove_if_exists(&self.tmp) {
            warn!(path = %self.tmp.display(), "failed to remove abandoned run: {e}");
        }
    }
}
