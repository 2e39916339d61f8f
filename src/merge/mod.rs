//! Two-way merge of a base run with a delta cache snapshot.
//!
//! Both inputs are ascending by key. On equal keys the delta entry wins and
//! the base entry is discarded; a winning tombstone suppresses the key
//! entirely. The iterator is lazy, forward-only and single-pass.
//!
//! The base side yields `Result`s. The first base error is passed through
//! and fuses the iterator.


use std::cmp::Ordering;
use std::iter::Peekable;

use tracing::trace;

use crate::encoding::TypeDescriptor;

enum Take {
    Base,
    Delta,
    /// Equal keys: the delta entry shadows the base entry.
    DeltaOverBase,
}

pub struct MergeIterator<K, V, E, I>
where
    I: Iterator<Item = Result<(K, V), E>>,
{
    base: I,
    base_head: Option<(K, V)>,
    base_exhausted: bool,
    delta: Peekable<std::vec::IntoIter<(K, V)>>,
    fused: bool,
}

impl<K, V, E, I> MergeIterator<K, V, E, I>
where
    K: TypeDescriptor,
    V: TypeDescriptor,
    I: Iterator<Item = Result<(K, V), E>>,
{
    /// `delta` must be sorted by key with no duplicates, as produced by
    /// [`DeltaCache::sorted_entries`](crate::deltacache::DeltaCache::sorted_entries).
    pub fn new(base: I, delta: Vec<(K, V)>) -> Self {
        Self {
            base,
            base_head: None,
            base_exhausted: false,
            delta: delta.into_iter().peekable(),
            fused: false,
        }
    }

    /// Pulls the next base entry into `base_head` if the slot is empty.
    fn fill_base(&mut self) -> Result<(), E> {
        if self.base_head.is_some() || self.base_exhausted {
            return Ok(());
        }
        match self.base.next() {
            Some(Ok(entry)) => self.base_head = Some(entry),
            Some(Err(e)) => return Err(e),
            None => self.base_exhausted = true,
        }
        Ok(())
    }
}

impl<K, V, E, I> Iterator for MergeIterator<K, V, E, I>
where
    K: TypeDescriptor,
    V: TypeDescriptor,
    I: Iterator<Item = Result<(K, V), E>>,
{
    type Item = Result<(K, V), E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.fused {
            return None;
        }
        loop {
            if let Err(e) = self.fill_base() {
                self.fused = true;
                return Some(Err(e));
            }

            let take = match (self.base_head.as_ref(), self.delta.peek()) {
                (None, None) => return None,
                (Some(_), None) => Take::Base,
                (None, Some(_)) => Take::Delta,
                (Some((base_key, _)), Some((delta_key, _))) => match delta_key.cmp(base_key) {
                    Ordering::Less => Take::Delta,
                    Ordering::Equal => Take::DeltaOverBase,
                    Ordering::Greater => Take::Base,
                },
            };

            let winner = match take {
                Take::Base => self.base_head.take(),
                Take::Delta => self.delta.next(),
                Take::DeltaOverBase => {
                    self.base_head = None;
                    self.delta.next()
                }
            };
            let Some((key, value)) = winner else {
                return None;
            };

            if value.is_tombstone() {
                trace!(?key, "merge skipped tombstone");
                continue;
            }
            return Some(Ok((key, value)));
        }
    }
}
