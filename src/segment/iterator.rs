use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use super::SegmentError;
use crate::encoding::TypeDescriptor;
use crate::merge::MergeIterator;
use crate::sortedrun::{SortedRunError, SortedRunIter};

/// Ordered scan over a segment, guarded by a version stamp.
///
/// The stamp is taken when the iterator is created. Any later write or
/// compaction bumps the segment version, and the next call to `next` ends
/// the iteration instead of returning a mix of old and new data.
pub struct SegmentIterator<K: TypeDescriptor, V: TypeDescriptor> {
    inner: MergeIterator<K, V, SortedRunError, SortedRunIter<K, V>>,
    version: Arc<AtomicU64>,
    stamp: u64,
    interrupted: bool,
}

impl<K: TypeDescriptor, V: TypeDescriptor> SegmentIterator<K, V> {
    pub(super) fn new(
        base: SortedRunIter<K, V>,
        delta: Vec<(K, V)>,
        version: Arc<AtomicU64>,
        stamp: u64,
    ) -> Self {
        Self {
            inner: MergeIterator::new(base, delta),
            version,
            stamp,
            interrupted: false,
        }
    }

    /// `true` if iteration stopped because the segment changed.
    pub fn was_interrupted(&self) -> bool {
        self.interrupted
    }
}

impl<K: TypeDescriptor, V: TypeDescriptor> Iterator for SegmentIterator<K, V> {
    type Item = Result<(K, V), SegmentError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.interrupted {
            return None;
        }
        let current = self.version.load(Ordering::Acquire);
        if current != self.stamp {
            debug!(stamp = self.stamp, current, "segment changed, ending scan early");
            self.interrupted = true;
            return None;
        }
        self.inner.next().map(|entry| entry.map_err(SegmentError::from))
    }
}
