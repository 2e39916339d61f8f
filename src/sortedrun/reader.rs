use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::trace;

use super::page::PageDecoder;
use super::{RunConf, SortedRunError};
use crate::chunkstore::{ChunkIter, ChunkStoreReader};
use crate::encoding::{EncodingError, TypeDescriptor};

/// Read access to a published sorted run.
pub struct SortedRunReader<K, V> {
    path: PathBuf,
    chunks: Option<Arc<ChunkStoreReader>>,
    _types: PhantomData<fn() -> (K, V)>,
}

impl<K, V> std::fmt::Debug for SortedRunReader<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortedRunReader")
            .field("path", &self.path)
            .field("present", &self.chunks.is_some())
            .finish()
    }
}

impl<K: TypeDescriptor, V: TypeDescriptor> SortedRunReader<K, V> {
    /// Opens the run at `path`. A missing file is an empty run.
    pub fn open(path: impl AsRef<Path>, conf: &RunConf) -> Result<Self, SortedRunError> {
        let path = path.as_ref().to_path_buf();
        let chunks = if path.exists() {
            Some(Arc::new(ChunkStoreReader::open(
                &path,
                conf.block_size,
                conf.decoding_filters.clone(),
            )?))
        } else {
            trace!(path = %path.display(), "sorted run missing, treating as empty");
            None
        };
        Ok(Self {
            path,
            chunks,
            _types: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries in file order.
    pub fn iter(&self) -> SortedRunIter<K, V> {
        SortedRunIter {
            path: self.path.clone(),
            chunks: self.chunks.as_ref().map(|c| c.chunks()),
            page: Vec::new().into_iter(),
        }
    }

    /// Decodes the whole page stored at `position`.
    pub fn read_page(&self, position: u32) -> Result<Vec<(K, V)>, SortedRunError> {
        let Some(payload) = self.page_payload(position)? else {
            return Ok(Vec::new());
        };
        PageDecoder::<K, V>::new(&payload)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| self.corruption(u64::from(position), e))
    }

    /// Looks `key` up in the page at `position`, decoding only up to it.
    pub fn get_in_page(&self, position: u32, key: &K) -> Result<Option<V>, SortedRunError> {
        let Some(payload) = self.page_payload(position)? else {
            return Ok(None);
        };
        for entry in PageDecoder::<K, V>::new(&payload) {
            let (k, v) = entry.map_err(|e| self.corruption(u64::from(position), e))?;
            match k.cmp(key) {
                std::cmp::Ordering::Less => continue,
                std::cmp::Ordering::Equal => return Ok(Some(v)),
                std::cmp::Ordering::Greater => return Ok(None),
            }
        }
        Ok(None)
    }

    fn page_payload(&self, position: u32) -> Result<Option<Vec<u8>>, SortedRunError> {
        let Some(chunks) = &self.chunks else {
            return Ok(None);
        };
        Ok(chunks
            .read_chunk_at(u64::from(position))?
            .map(|chunk| chunk.payload))
    }

    fn corruption(&self, position: u64, err: EncodingError) -> SortedRunError {
        SortedRunError::Corruption {
            path: self.path.clone(),
            position,
            reason: err.to_string(),
        }
    }
}

/// Forward-only iterator over a run, decoding one page at a time.
pub struct SortedRunIter<K, V> {
    path: PathBuf,
    chunks: Option<ChunkIter>,
    page: std::vec::IntoIter<(K, V)>,
}

impl<K: TypeDescriptor, V: TypeDescriptor> Iterator for SortedRunIter<K, V> {
    type Item = Result<(K, V), SortedRunError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.page.next() {
                return Some(Ok(entry));
            }
            let chunk = match self.chunks.as_mut()?.next()? {
                Ok(chunk) => chunk,
                Err(e) => {
                    self.chunks = None;
                    return Some(Err(e.into()));
                }
            };
            match PageDecoder::<K, V>::new(&chunk.payload).collect::<Result<Vec<_>, _>>() {
                Ok(entries) => self.page = entries.into_iter(),
                Err(e) => {
                    self.chunks = None;
                    return Some(Err(SortedRunError::Corruption {
                        path: self.path.clone(),
                        position: chunk.position,
                        reason: e.to_string(),
                    }));
                }
            }
        }
    }
}
