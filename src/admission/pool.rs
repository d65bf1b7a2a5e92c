//! # Slot Pool
//!
//! The unit of concurrency control: a bounded counter of free slots for one
//! request type, plus the reservation handle that gives a slot back.
//!
//! ## Acquire Paths
//!
//! ```text
//!     acquire(reserve, timeout):
//!
//!     closed? ──Yes──► Err(Interrupted)
//!        │
//!        No
//!        ▼
//!     CAS free > reserve ──Ok──► SlotReservation ✅
//!        │
//!        Exhausted
//!        ▼
//!     timeout? ──None──► Ok(None) ❌
//!        │
//!        Some(d)
//!        ▼
//!     park on condvar until release / close / deadline
//! ```
//!
//! The free-slot counter is a cache-aligned atomic updated with CAS, so the
//! common case never takes a lock. The mutex/condvar pair only parks callers
//! that asked to wait.
//!
//! ## Reservation Lifetime
//!
//! A [`SlotReservation`] holds an `Arc` to the exact pool it came from.
//! Releasing it always returns the slot there, even if the registry has since
//! swapped in a different limiter for the same request type. The old pool is
//! freed once its last reservation is gone.

use super::config::RequestType;
use super::error::{Error, Result};
use super::utils::{cpu_relax, CacheAligned};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// CAS attempts before backing off with spin hints.
const CAS_BACKOFF_THRESHOLD: usize = 4;

/// Upper bound on spin iterations per backoff step.
const MAX_BACKOFF_SHIFT: usize = 4;

/// Bounded pool of concurrency slots for one request type.
///
/// ```rust
/// use slotgate::{RequestType, SlotPool};
/// use std::sync::Arc;
///
/// let pool = Arc::new(SlotPool::new(RequestType::Query, 2));
///
/// let first = pool.try_acquire().unwrap();
/// let second = pool.try_acquire().unwrap();
/// assert!(first.is_some() && second.is_some());
/// assert!(pool.try_acquire().unwrap().is_none());
///
/// drop(first);
/// assert_eq!(pool.available(), 1);
/// ```
pub struct SlotPool {
    /// Free slots. Hot path; kept on its own cache line.
    free: CacheAligned<AtomicU32>,

    /// Number of callers parked on `cond`.
    waiters: AtomicUsize,

    /// Set once by `close`; wakes and fails every waiter.
    closed: AtomicBool,

    lock: Mutex<()>,
    cond: Condvar,

    request_type: RequestType,
    capacity: u32,

    total_acquired: AtomicU64,
    total_rejected: AtomicU64,
    total_lent: AtomicU64,
    max_wait_time_ns: AtomicU64,
}

impl SlotPool {
    /// Creates a pool with `capacity` free slots.
    pub fn new(request_type: RequestType, capacity: u32) -> Self {
        Self {
            free: CacheAligned::new(AtomicU32::new(capacity)),
            waiters: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            lock: Mutex::new(()),
            cond: Condvar::new(),
            request_type,
            capacity,
            total_acquired: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
            total_lent: AtomicU64::new(0),
            max_wait_time_ns: AtomicU64::new(0),
        }
    }

    /// Takes one slot without waiting.
    ///
    /// # Errors
    ///
    /// [`Error::Interrupted`] if the pool has been closed.
    pub fn try_acquire(self: &Arc<Self>) -> Result<Option<SlotReservation>> {
        self.acquire(None)
    }

    /// Takes one slot, waiting up to `timeout` when the pool is exhausted.
    ///
    /// `None` never waits. `Ok(None)` means no slot freed up in time.
    ///
    /// # Errors
    ///
    /// [`Error::Interrupted`] if the pool is closed before or during the wait.
    pub fn acquire(self: &Arc<Self>, timeout: Option<Duration>) -> Result<Option<SlotReservation>> {
        self.acquire_above(0, timeout, Grant::Owned)
    }

    /// Takes one slot for a different request type.
    ///
    /// Succeeds only while more than `keep_free` slots are free, so the
    /// owner's guaranteed share stays available to it.
    ///
    /// # Errors
    ///
    /// [`Error::Interrupted`] if the pool is closed before or during the wait.
    pub fn lend(
        self: &Arc<Self>,
        keep_free: u32,
        timeout: Option<Duration>,
    ) -> Result<Option<SlotReservation>> {
        let result = self.acquire_above(keep_free, timeout, Grant::Borrowed)?;
        if result.is_some() {
            self.total_lent.fetch_add(1, Ordering::Relaxed);
        }
        Ok(result)
    }

    fn acquire_above(
        self: &Arc<Self>,
        keep_free: u32,
        timeout: Option<Duration>,
        grant: Grant,
    ) -> Result<Option<SlotReservation>> {
        if self.is_closed() {
            return Err(Error::Interrupted);
        }

        if self.try_take(keep_free) {
            return Ok(Some(self.grant(grant)));
        }

        let Some(timeout) = timeout.filter(|t| !t.is_zero()) else {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        let start = Instant::now();
        let outcome = self.wait_for_slot(keep_free, start + timeout);
        self.record_wait(start.elapsed());

        match outcome {
            Ok(true) => Ok(Some(self.grant(grant))),
            Ok(false) => {
                self.total_rejected.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "No {} slot freed within {}ms",
                    self.request_type,
                    timeout.as_millis()
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Parks until a slot above `keep_free` can be taken, the pool closes, or
    /// `deadline` passes.
    fn wait_for_slot(&self, keep_free: u32, deadline: Instant) -> Result<bool> {
        let mut guard = self.lock.lock();
        // Registered under the lock so a releaser that misses our CAS below
        // is guaranteed to see us and notify.
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let _registered = WaiterGuard {
            waiters: &self.waiters,
        };

        loop {
            if self.is_closed() {
                return Err(Error::Interrupted);
            }
            if self.try_take(keep_free) {
                return Ok(true);
            }
            if self.cond.wait_until(&mut guard, deadline).timed_out() {
                // One last look; a release may have raced the timeout.
                if self.is_closed() {
                    return Err(Error::Interrupted);
                }
                return Ok(self.try_take(keep_free));
            }
        }
    }

    /// CAS loop that decrements the free count while it stays above `keep_free`.
    #[inline]
    fn try_take(&self, keep_free: u32) -> bool {
        let free = self.free.get();
        let mut current = free.load(Ordering::SeqCst);
        let mut retries = 0;

        loop {
            if current <= keep_free {
                return false;
            }

            match free.compare_exchange_weak(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => {
                    current = actual;
                    retries += 1;
                    if retries > CAS_BACKOFF_THRESHOLD {
                        let shift = (retries - CAS_BACKOFF_THRESHOLD).min(MAX_BACKOFF_SHIFT);
                        for _ in 0..(1 << shift) {
                            cpu_relax();
                        }
                    } else {
                        cpu_relax();
                    }
                }
            }
        }
    }

    fn grant(self: &Arc<Self>, grant: Grant) -> SlotReservation {
        self.total_acquired.fetch_add(1, Ordering::Relaxed);
        SlotReservation {
            pool: Some(Arc::clone(self)),
            grant,
        }
    }

    fn record_wait(&self, waited: Duration) {
        let ns = u64::try_from(waited.as_nanos()).unwrap_or(u64::MAX);
        self.max_wait_time_ns.fetch_max(ns, Ordering::Relaxed);
    }

    /// Returns one slot. Only reachable through [`SlotReservation`].
    fn release(&self) {
        let previous = self.free.get().fetch_add(1, Ordering::SeqCst);
        debug_assert!(
            previous < self.capacity,
            "slot released into a full {} pool",
            self.request_type
        );

        if self.waiters.load(Ordering::SeqCst) > 0 {
            let _guard = self.lock.lock();
            // Borrowers and owners wait on different thresholds; wake all so
            // whoever can use the slot gets it.
            self.cond.notify_all();
        }
    }

    /// Fails every current and future acquire with [`Error::Interrupted`].
    ///
    /// Outstanding reservations can still be released.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _guard = self.lock.lock();
            self.cond.notify_all();
            debug!("Closed {} slot pool", self.request_type);
        }
    }

    /// `true` once [`close`](Self::close) has been called.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Request type this pool was built for.
    #[inline]
    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    /// Total slots.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Slots not currently reserved.
    #[inline]
    pub fn available(&self) -> u32 {
        self.free.get().load(Ordering::Acquire)
    }

    /// Slots currently reserved.
    #[inline]
    pub fn in_use(&self) -> u32 {
        self.capacity.saturating_sub(self.available())
    }

    /// Callers currently parked waiting for a slot.
    #[inline]
    pub fn waiting(&self) -> usize {
        self.waiters.load(Ordering::Acquire)
    }

    pub(crate) fn total_acquired(&self) -> u64 {
        self.total_acquired.load(Ordering::Relaxed)
    }

    pub(crate) fn total_rejected(&self) -> u64 {
        self.total_rejected.load(Ordering::Relaxed)
    }

    pub(crate) fn total_lent(&self) -> u64 {
        self.total_lent.load(Ordering::Relaxed)
    }

    pub(crate) fn max_wait_time_ns(&self) -> u64 {
        self.max_wait_time_ns.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for SlotPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotPool")
            .field("request_type", &self.request_type)
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .field("waiting", &self.waiting())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Decrements the waiter count on every exit path of a wait.
struct WaiterGuard<'a> {
    waiters: &'a AtomicUsize,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.waiters.fetch_sub(1, Ordering::SeqCst);
    }
}

/// How a reservation was granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Grant {
    /// Admission control did not apply; nothing to give back.
    Unlimited,
    /// Slot from the request type's own pool.
    Owned,
    /// Slot lent by another request type's pool.
    Borrowed,
}

/// Sentinel reservation for requests that bypass admission control.
pub const UNLIMITED: SlotReservation = SlotReservation {
    pool: None,
    grant: Grant::Unlimited,
};

/// Handle to one admitted request.
///
/// Give it back with [`release`](Self::release) when the request completes,
/// or let it drop. Releasing twice is a no-op, as is releasing
/// [`UNLIMITED`].
#[must_use = "dropping a reservation releases its slot immediately"]
pub struct SlotReservation {
    pool: Option<Arc<SlotPool>>,
    grant: Grant,
}

impl SlotReservation {
    /// Same as [`UNLIMITED`].
    #[inline]
    pub const fn unlimited() -> Self {
        UNLIMITED
    }

    /// Returns the slot to its originating pool. Later calls do nothing.
    #[inline]
    pub fn release(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.release();
        }
    }

    /// How this reservation was granted.
    #[inline]
    pub fn grant(&self) -> Grant {
        self.grant
    }

    /// `true` for the [`UNLIMITED`] sentinel.
    #[inline]
    pub fn is_unlimited(&self) -> bool {
        self.grant == Grant::Unlimited
    }

    /// `true` when the slot was lent by another request type.
    #[inline]
    pub fn is_borrowed(&self) -> bool {
        self.grant == Grant::Borrowed
    }

    /// `true` while a slot is still held.
    #[inline]
    pub fn is_held(&self) -> bool {
        self.pool.is_some()
    }

    /// Request type of the pool the slot was drawn from, while held.
    pub fn pool_request_type(&self) -> Option<RequestType> {
        self.pool.as_ref().map(|p| p.request_type())
    }

    /// `true` while this reservation holds a slot of exactly `pool`.
    pub fn is_from(&self, pool: &SlotPool) -> bool {
        self.pool
            .as_ref()
            .map_or(false, |p| std::ptr::eq(Arc::as_ptr(p), pool))
    }
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for SlotReservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotReservation")
            .field("grant", &self.grant)
            .field("pool", &self.pool_request_type())
            .field("held", &self.is_held())
            .finish()
    }
}
