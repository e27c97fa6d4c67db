//! Scoped ownership of native resources.
//!
//! Every container, decoder, and frame buffer a pipeline run touches is held
//! in a [`ResourceHandle`]. The handle releases the resource exactly once:
//! either explicitly through [`close`](ResourceHandle::close), or when it is
//! dropped on an error, panic, or cancellation path. Each acquire and
//! release is recorded in a shared [`ResourceLedger`] so callers can verify
//! that nothing is left open.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use stillframe::{ResourceHandle, ResourceKind, ResourceLedger};
//!
//! let ledger = Arc::new(ResourceLedger::new());
//! let buffer = ResourceHandle::new(ResourceKind::OutputFrame, vec![0u8; 16], &ledger);
//! assert_eq!(ledger.outstanding(), 1);
//! buffer.close();
//! assert_eq!(ledger.outstanding(), 0);
//! ```

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    ops::{Deref, DerefMut},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

/// The kind of native resource a handle owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// An opened demux context.
    Container,
    /// An opened decoder bound to one stream.
    Decoder,
    /// A decoded frame in its native pixel format.
    RawFrame,
    /// A scaled frame in the display pixel format.
    OutputFrame,
}

impl ResourceKind {
    const ALL: [ResourceKind; 4] = [
        ResourceKind::Container,
        ResourceKind::Decoder,
        ResourceKind::RawFrame,
        ResourceKind::OutputFrame,
    ];

    fn slot(self) -> usize {
        match self {
            ResourceKind::Container => 0,
            ResourceKind::Decoder => 1,
            ResourceKind::RawFrame => 2,
            ResourceKind::OutputFrame => 3,
        }
    }
}

/// Acquire/release totals for one [`ResourceKind`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceCounts {
    /// Handles created.
    pub acquired: u64,
    /// Handles released.
    pub released: u64,
}

impl ResourceCounts {
    /// Handles currently alive.
    pub fn outstanding(&self) -> u64 {
        self.acquired.saturating_sub(self.released)
    }
}

/// Thread-safe acquire/release counters, one pair per [`ResourceKind`].
#[derive(Debug, Default)]
pub struct ResourceLedger {
    acquired: [AtomicU64; 4],
    released: [AtomicU64; 4],
}

impl ResourceLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Totals for one resource kind.
    pub fn counts(&self, kind: ResourceKind) -> ResourceCounts {
        ResourceCounts {
            acquired: self.acquired[kind.slot()].load(Ordering::Acquire),
            released: self.released[kind.slot()].load(Ordering::Acquire),
        }
    }

    /// Number of handles of every kind that have not been released yet.
    pub fn outstanding(&self) -> u64 {
        ResourceKind::ALL
            .iter()
            .map(|kind| self.counts(*kind).outstanding())
            .sum()
    }

    fn record_acquire(&self, kind: ResourceKind) {
        self.acquired[kind.slot()].fetch_add(1, Ordering::AcqRel);
    }

    fn record_release(&self, kind: ResourceKind) {
        self.released[kind.slot()].fetch_add(1, Ordering::AcqRel);
    }
}

/// Exclusive owner of one native resource.
///
/// Dereferences to the wrapped value. The value is dropped (and the release
/// recorded) exactly once, when the handle is closed, consumed with
/// [`into_inner`](ResourceHandle::into_inner), or dropped.
pub struct ResourceHandle<T> {
    kind: ResourceKind,
    resource: Option<T>,
    ledger: Arc<ResourceLedger>,
}

impl<T> ResourceHandle<T> {
    /// Take ownership of `resource` and record the acquisition.
    pub fn new(kind: ResourceKind, resource: T, ledger: &Arc<ResourceLedger>) -> Self {
        ledger.record_acquire(kind);
        log::trace!("acquired {kind:?}");
        Self {
            kind,
            resource: Some(resource),
            ledger: Arc::clone(ledger),
        }
    }

    /// The kind of resource held.
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Release the resource now.
    pub fn close(self) {
        drop(self);
    }

    /// Give up ownership tracking and return the resource.
    ///
    /// The release is recorded immediately; the caller becomes responsible
    /// for the value.
    pub fn into_inner(mut self) -> T {
        match self.resource.take() {
            Some(resource) => {
                self.record_release();
                resource
            }
            // `resource` is only taken here and in `Drop`, both of which consume the handle.
            None => unreachable!("resource handle already released"),
        }
    }

    fn record_release(&self) {
        self.ledger.record_release(self.kind);
        log::trace!("released {:?}", self.kind);
    }
}

impl<T> Deref for ResourceHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.resource {
            Some(resource) => resource,
            None => unreachable!("resource handle already released"),
        }
    }
}

impl<T> DerefMut for ResourceHandle<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.resource {
            Some(resource) => resource,
            None => unreachable!("resource handle already released"),
        }
    }
}

impl<T> Drop for ResourceHandle<T> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            drop(resource);
            self.record_release();
        }
    }
}

impl<T> Debug for ResourceHandle<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ResourceHandle")
            .field("kind", &self.kind)
            .field("open", &self.resource.is_some())
            .finish()
    }
}
