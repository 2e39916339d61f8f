//! Close-once guard shared by every resource with an explicit `close`.

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

/// The guarded resource was closed before the call.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("{0} is already closed")]
pub struct AlreadyClosed(pub &'static str);

/// Owned flag that lets a resource be released at most once.
///
/// `close` flips the flag and reports whether this call won; every other
/// operation calls `ensure_open` first.
#[derive(Debug)]
pub struct CloseGuard {
    resource: &'static str,
    closed: AtomicBool,
}

impl CloseGuard {
    pub fn new(resource: &'static str) -> Self {
        Self {
            resource,
            closed: AtomicBool::new(false),
        }
    }

    pub fn ensure_open(&self) -> Result<(), AlreadyClosed> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AlreadyClosed(self.resource));
        }
        Ok(())
    }

    /// Marks the resource closed. A second call fails.
    pub fn close(&self) -> Result<(), AlreadyClosed> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(AlreadyClosed(self.resource));
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
