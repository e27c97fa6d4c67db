//! Admission control for concurrent extractions.
//!
//! The [`AdmissionGate`] is the only state shared between concurrent
//! requests. It owns a counting semaphore of `max_concurrent_slots` slots
//! and a bounded wait queue:
//!
//! - a request whose cost fits in the free slots is admitted at once;
//! - otherwise it joins the queue if fewer than `max_queue_depth` requests
//!   are already waiting, and is rejected immediately if not;
//! - a queued request that is not admitted within `queue_timeout` is
//!   rejected.
//!
//! Rejections surface as [`ThumbnailError::BudgetExceeded`] and never open a
//! native resource. A granted [`AdmissionSlot`] returns its slots when it is
//! released or dropped, so every exit path of the owning pipeline run gives
//! the budget back.
//!
//! # Example
//!
//! ```
//! use stillframe::{AdmissionGate, GateOptions};
//!
//! # async fn example() -> Result<(), stillframe::ThumbnailError> {
//! let gate = AdmissionGate::new(GateOptions::new().with_max_concurrent_slots(1));
//! let slot = gate.acquire(1).await?;
//! assert_eq!(gate.stats().active_slots, 1);
//! AdmissionGate::release(slot);
//! assert_eq!(gate.stats().active_slots, 0);
//! # Ok(())
//! # }
//! ```

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::{
    configuration::GateOptions,
    error::{RejectionReason, ThumbnailError},
};

/// Identifies the holder of a slot in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotToken(u64);

impl SlotToken {
    /// Numeric value of the token.
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// A point-in-time view of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateStats {
    /// Slots held by granted requests. Slots a queued request has
    /// partially reserved are not counted.
    pub active_slots: u32,
    /// Requests waiting for admission.
    pub queued: usize,
    /// Grants since creation.
    pub granted: u64,
    /// Rejections since creation.
    pub rejected: u64,
}

#[derive(Debug, Default)]
struct Counters {
    active: AtomicUsize,
    queued: AtomicUsize,
    granted: AtomicU64,
    rejected: AtomicU64,
    next_token: AtomicU64,
}

/// Bounds the number of concurrently running pipelines.
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    options: GateOptions,
    counters: Arc<Counters>,
}

impl Debug for AdmissionGate {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("AdmissionGate")
            .field("options", &self.options)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Permission to run one pipeline.
///
/// Holds `cost` slots until released. Release happens exactly once: through
/// [`AdmissionGate::release`] or when the slot is dropped.
#[must_use = "dropping a slot releases it immediately"]
pub struct AdmissionSlot {
    permit: OwnedSemaphorePermit,
    token: SlotToken,
    counters: Arc<Counters>,
}

impl AdmissionSlot {
    /// Token identifying this grant.
    pub fn token(&self) -> SlotToken {
        self.token
    }

    /// Number of slots held.
    pub fn cost(&self) -> u32 {
        self.permit.num_permits() as u32
    }
}

impl Debug for AdmissionSlot {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("AdmissionSlot")
            .field("token", &self.token)
            .field("cost", &self.cost())
            .finish()
    }
}

impl Drop for AdmissionSlot {
    fn drop(&mut self) {
        self.counters
            .active
            .fetch_sub(self.permit.num_permits(), Ordering::AcqRel);
        log::trace!(
            "Releasing slot {} ({} slot(s))",
            self.token.0,
            self.permit.num_permits()
        );
    }
}

/// Leaves the wait queue when dropped, including when the waiting future is
/// cancelled.
struct QueueTicket {
    counters: Arc<Counters>,
}

impl Drop for QueueTicket {
    fn drop(&mut self) {
        self.counters.queued.fetch_sub(1, Ordering::AcqRel);
    }
}

impl AdmissionGate {
    /// Create a gate with the given settings.
    pub fn new(options: GateOptions) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(options.max_concurrent_slots() as usize)),
            options,
            counters: Arc::new(Counters::default()),
        }
    }

    /// The gate's settings.
    pub fn options(&self) -> &GateOptions {
        &self.options
    }

    /// Current counters.
    pub fn stats(&self) -> GateStats {
        GateStats {
            active_slots: self.counters.active.load(Ordering::Acquire) as u32,
            queued: self.counters.queued.load(Ordering::Acquire),
            granted: self.counters.granted.load(Ordering::Acquire),
            rejected: self.counters.rejected.load(Ordering::Acquire),
        }
    }

    /// Admit a request costing `cost` slots, waiting in the queue if needed.
    ///
    /// Costs are clamped to `1..=max_concurrent_slots`, so an oversized
    /// request runs alone rather than never.
    ///
    /// Dropping the returned future while it waits removes the request from
    /// the queue.
    ///
    /// # Errors
    ///
    /// Returns [`ThumbnailError::BudgetExceeded`] when the queue is full
    /// (immediately), when `queue_timeout` elapses, or when the gate is
    /// closed.
    pub async fn acquire(&self, cost: u32) -> Result<AdmissionSlot, ThumbnailError> {
        let permits = self.clamp_cost(cost);
        match Arc::clone(&self.semaphore).try_acquire_many_owned(permits) {
            Ok(permit) => return Ok(self.grant(permit)),
            Err(TryAcquireError::Closed) => return Err(self.reject(RejectionReason::GateClosed)),
            Err(TryAcquireError::NoPermits) => {}
        }

        let _ticket = self.enter_queue()?;
        let timeout = self.options.queue_timeout();
        let waiting = Arc::clone(&self.semaphore).acquire_many_owned(permits);
        match tokio::time::timeout(timeout, waiting).await {
            Ok(Ok(permit)) => Ok(self.grant(permit)),
            Ok(Err(_closed)) => Err(self.reject(RejectionReason::GateClosed)),
            Err(_elapsed) => {
                log::warn!("Admission timed out after {timeout:?} ({permits} slot(s))");
                Err(self.reject(RejectionReason::QueueTimeout(timeout)))
            }
        }
    }

    /// Admit a request only if slots are free right now.
    ///
    /// # Errors
    ///
    /// Returns [`ThumbnailError::BudgetExceeded`] if not enough slots are
    /// free or the gate is closed.
    pub fn try_acquire(&self, cost: u32) -> Result<AdmissionSlot, ThumbnailError> {
        let permits = self.clamp_cost(cost);
        match Arc::clone(&self.semaphore).try_acquire_many_owned(permits) {
            Ok(permit) => Ok(self.grant(permit)),
            Err(TryAcquireError::Closed) => Err(self.reject(RejectionReason::GateClosed)),
            Err(TryAcquireError::NoPermits) => Err(self.reject(RejectionReason::QueueFull)),
        }
    }

    /// Return a slot to the gate.
    pub fn release(slot: AdmissionSlot) {
        drop(slot);
    }

    /// Reject every queued and future request. Slots already granted stay
    /// valid until released.
    pub fn close(&self) {
        log::debug!("Closing admission gate");
        self.semaphore.close();
    }

    /// Whether [`close`](AdmissionGate::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    fn clamp_cost(&self, cost: u32) -> u32 {
        let max = self.options.max_concurrent_slots();
        if cost > max {
            log::warn!("Request cost {cost} exceeds the whole budget; clamping to {max}");
        }
        cost.clamp(1, max)
    }

    fn enter_queue(&self) -> Result<QueueTicket, ThumbnailError> {
        let limit = self.options.max_queue_depth();
        let entered = self
            .counters
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                (queued < limit).then_some(queued + 1)
            });
        match entered {
            Ok(_) => Ok(QueueTicket {
                counters: Arc::clone(&self.counters),
            }),
            Err(_) => Err(self.reject(RejectionReason::QueueFull)),
        }
    }

    fn grant(&self, permit: OwnedSemaphorePermit) -> AdmissionSlot {
        let token = SlotToken(self.counters.next_token.fetch_add(1, Ordering::AcqRel));
        self.counters.granted.fetch_add(1, Ordering::AcqRel);
        self.counters
            .active
            .fetch_add(permit.num_permits(), Ordering::AcqRel);
        log::trace!(
            "Granted slot {} ({} slot(s))",
            token.0,
            permit.num_permits()
        );
        AdmissionSlot {
            permit,
            token,
            counters: Arc::clone(&self.counters),
        }
    }

    fn reject(&self, reason: RejectionReason) -> ThumbnailError {
        self.counters.rejected.fetch_add(1, Ordering::AcqRel);
        log::debug!("Admission rejected: {reason}");
        ThumbnailError::BudgetExceeded(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_is_clamped_to_budget() {
        let gate = AdmissionGate::new(GateOptions::new().with_max_concurrent_slots(3));
        assert_eq!(gate.clamp_cost(0), 1);
        assert_eq!(gate.clamp_cost(2), 2);
        assert_eq!(gate.clamp_cost(99), 3);
    }

    #[test]
    fn try_acquire_respects_free_slots() {
        let gate = AdmissionGate::new(GateOptions::new().with_max_concurrent_slots(2));
        let first = gate.try_acquire(2).unwrap();
        assert_eq!(first.cost(), 2);
        assert!(gate.try_acquire(1).is_err());
        AdmissionGate::release(first);
        assert!(gate.try_acquire(1).is_ok());
    }

    #[test]
    fn tokens_are_unique() {
        let gate = AdmissionGate::new(GateOptions::new().with_max_concurrent_slots(2));
        let a = gate.try_acquire(1).unwrap();
        let b = gate.try_acquire(1).unwrap();
        assert_ne!(a.token(), b.token());
    }
}
