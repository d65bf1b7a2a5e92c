//! # Request Rate Limiter
//!
//! One limiter per request type: an immutable config and the slot pool built
//! from it. The pair is never changed in place; reconfiguration builds a new
//! limiter and swaps it into the registry whole.
//!
//! ```text
//!     RequestRateLimiter
//!     ┌───────────────────────────────┐
//!     │ config ──► capacity, timeout, │
//!     │            borrowing          │
//!     │ pool   ──► Arc<SlotPool>      │──► handed to reservations
//!     └───────────────────────────────┘
//! ```

use super::config::{RateLimiterConfig, RequestType};
use super::error::Result;
use super::metrics::LimiterMetrics;
use super::pool::{SlotPool, SlotReservation, UNLIMITED};
use std::sync::Arc;
use std::time::Duration;

/// Admission for a single request type.
#[derive(Debug)]
pub struct RequestRateLimiter {
    config: RateLimiterConfig,
    pool: Arc<SlotPool>,
}

impl RequestRateLimiter {
    /// Builds a limiter with a fresh pool sized from `config`.
    ///
    /// # Errors
    ///
    /// Any error from [`RateLimiterConfig::validate`].
    pub fn new(config: RateLimiterConfig) -> Result<Self> {
        config.validate()?;
        let pool = Arc::new(SlotPool::new(
            config.request_type,
            config.max_concurrent_requests,
        ));
        Ok(Self { config, pool })
    }

    /// Admits one request of this limiter's own type.
    ///
    /// Disabled limiters return [`UNLIMITED`]. Otherwise one slot is taken
    /// from the local pool, waiting up to the configured timeout when it is
    /// non-negative. `Ok(None)` means the pool stayed exhausted; the caller
    /// may then try borrowing elsewhere.
    ///
    /// # Errors
    ///
    /// [`Error::Interrupted`](super::error::Error::Interrupted) when the pool
    /// was closed, including while waiting.
    pub fn handle_request(&self) -> Result<Option<SlotReservation>> {
        if !self.config.enabled {
            return Ok(Some(UNLIMITED));
        }
        self.pool.acquire(self.local_wait())
    }

    /// Lends one spare slot to a request of another type.
    ///
    /// Returns `Ok(None)` straight away when borrowing is disabled. The
    /// attempt never waits longer than this limiter's own timeout and leaves
    /// `guaranteed_slots` free for the owner.
    ///
    /// # Errors
    ///
    /// [`Error::Interrupted`](super::error::Error::Interrupted) when the pool
    /// was closed.
    pub fn allow_slot_borrowing(&self) -> Result<Option<SlotReservation>> {
        if !self.config.enabled || !self.config.slot_borrowing_enabled {
            return Ok(None);
        }
        self.pool.lend(self.config.guaranteed_slots, self.local_wait())
    }

    fn local_wait(&self) -> Option<Duration> {
        u64::try_from(self.config.slot_acquisition_timeout_ms)
            .ok()
            .map(Duration::from_millis)
    }

    /// The config this limiter was built from.
    #[inline]
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Registry key.
    #[inline]
    pub fn request_type(&self) -> RequestType {
        self.config.request_type
    }

    /// `true` when this limiter may lend slots.
    #[inline]
    pub fn is_slot_borrowing_enabled(&self) -> bool {
        self.config.enabled && self.config.slot_borrowing_enabled
    }

    /// The pool new reservations are drawn from.
    #[inline]
    pub fn pool(&self) -> &Arc<SlotPool> {
        &self.pool
    }

    /// Point-in-time counters for this limiter.
    pub fn metrics(&self) -> LimiterMetrics {
        LimiterMetrics {
            request_type: self.config.request_type,
            enabled: self.config.enabled,
            capacity: self.pool.capacity(),
            in_use: self.pool.in_use(),
            guaranteed_slots: self.config.guaranteed_slots,
            lendable_slots: self.config.lendable_slots(),
            waiting: self.pool.waiting(),
            total_acquired: self.pool.total_acquired(),
            total_rejected: self.pool.total_rejected(),
            total_lent: self.pool.total_lent(),
            max_wait_time_ns: self.pool.max_wait_time_ns(),
        }
    }
}
