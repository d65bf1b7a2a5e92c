//! # Metrics
//!
//! Point-in-time snapshots of limiter and manager counters. Nothing here is
//! exported anywhere; the snapshots are plain values for the caller to log or
//! hand to its own metrics registry.
//!
//! ```text
//!     QUERY limiter:
//!     ┌─────────────────────────────────────┐
//!     │  Slots In Use: 18/24               │
//!     │  ▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓░░░░░  (75%)       │
//!     │  Lent To Others: 3                  │
//!     │  Health: ⚠️ Degraded                │
//!     └─────────────────────────────────────┘
//! ```

use super::config::RequestType;
use std::fmt;

/// Rejection ratio above which a limiter counts as under sustained pressure.
const SUSTAINED_PRESSURE_RATIO: f64 = 0.3;

/// Counters for one [`RequestRateLimiter`](super::limiter::RequestRateLimiter).
#[derive(Debug, Clone, PartialEq)]
pub struct LimiterMetrics {
    /// Limiter the numbers belong to.
    pub request_type: RequestType,
    /// Whether the limiter enforces anything.
    pub enabled: bool,
    /// Pool capacity.
    pub capacity: u32,
    /// Slots currently reserved, own and lent.
    pub in_use: u32,
    /// Slots never lent out.
    pub guaranteed_slots: u32,
    /// Slots other types may borrow while the pool is idle.
    pub lendable_slots: u32,
    /// Callers parked waiting for a slot.
    pub waiting: usize,
    /// Slots granted since the pool was built, own and lent.
    pub total_acquired: u64,
    /// Attempts that ended without a slot.
    pub total_rejected: u64,
    /// Slots lent to other request types.
    pub total_lent: u64,
    /// Longest wait observed, in nanoseconds.
    pub max_wait_time_ns: u64,
}

impl LimiterMetrics {
    /// Fraction of capacity reserved, 0.0 to 1.0.
    #[inline]
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            f64::from(self.in_use) / f64::from(self.capacity)
        }
    }

    /// Fraction of attempts rejected, 0.0 to 1.0.
    #[inline]
    pub fn rejection_rate(&self) -> f64 {
        let total = self.total_acquired + self.total_rejected;
        if total == 0 {
            0.0
        } else {
            self.total_rejected as f64 / total as f64
        }
    }

    /// Longest wait in milliseconds.
    #[inline]
    pub fn max_wait_time_ms(&self) -> f64 {
        self.max_wait_time_ns as f64 / 1_000_000.0
    }

    /// Three-level assessment of the limiter.
    ///
    /// - **Critical**: more than 30% of attempts rejected
    /// - **Degraded**: pool full or callers waiting
    /// - **Healthy**: otherwise
    pub fn health_status(&self) -> HealthStatus {
        if !self.enabled {
            HealthStatus::Healthy
        } else if self.rejection_rate() > SUSTAINED_PRESSURE_RATIO {
            HealthStatus::Critical
        } else if self.in_use >= self.capacity || self.waiting > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Human-readable report.
    ///
    /// ```text
    /// QUERY Limiter Metrics:
    /// ├─ Capacity:
    /// │  ├─ Slots In Use: 18/24
    /// │  ├─ Guaranteed Slots: 8
    /// │  ├─ Lendable Slots: 16
    /// │  └─ Utilization: 75.00%
    /// ├─ Counters:
    /// │  ├─ Total Acquired: 1200
    /// │  ├─ Total Rejected: 40
    /// │  └─ Total Lent: 3
    /// └─ Health:
    ///    ├─ Status: Degraded
    ///    └─ Max Wait Time: 1.250ms
    /// ```
    pub fn summary(&self) -> String {
        format!(
            "{} Limiter Metrics:\n\
             ├─ Capacity:\n\
             │  ├─ Slots In Use: {}/{}\n\
             │  ├─ Guaranteed Slots: {}\n\
             │  ├─ Lendable Slots: {}\n\
             │  └─ Utilization: {:.2}%\n\
             ├─ Counters:\n\
             │  ├─ Total Acquired: {}\n\
             │  ├─ Total Rejected: {}\n\
             │  └─ Total Lent: {}\n\
             └─ Health:\n\
                ├─ Status: {:?}\n\
                └─ Max Wait Time: {:.3}ms",
            self.request_type,
            self.in_use,
            self.capacity,
            self.guaranteed_slots,
            self.lendable_slots,
            self.utilization() * 100.0,
            self.total_acquired,
            self.total_rejected,
            self.total_lent,
            self.health_status(),
            self.max_wait_time_ms(),
        )
    }
}

impl fmt::Display for LimiterMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Health status indicator for a limiter.
///
/// ```text
///     Healthy ──────► Spare slots, nobody waiting
///        │
///     Degraded ─────► Pool full or callers queued
///        │
///     Critical ─────► Sustained rejections
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Operating normally.
    Healthy,
    /// Saturated but keeping up.
    Degraded,
    /// Shedding a significant share of traffic.
    Critical,
}

impl HealthStatus {
    /// `true` for anything but [`HealthStatus::Healthy`].
    pub fn is_unhealthy(&self) -> bool {
        !matches!(self, Self::Healthy)
    }

    /// Suggested operator action.
    pub fn suggested_action(&self) -> &'static str {
        match self {
            Self::Healthy => "No action needed",
            Self::Degraded => "Monitor closely; consider enabling slot borrowing",
            Self::Critical => "Raise allowedRequests or add capacity",
        }
    }
}

/// Manager-wide admission counters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ManagerStats {
    /// Registered limiters.
    pub registered_limiters: usize,
    /// Requests admitted without touching any pool.
    pub unlimited_grants: u64,
    /// Requests admitted from their own pool.
    pub local_grants: u64,
    /// Requests admitted with a borrowed slot.
    pub borrowed_grants: u64,
    /// Requests rejected.
    pub rejections: u64,
    /// Donor attempts cut short by a closed pool.
    pub interrupted_borrows: u64,
    /// Limiters replaced by configuration changes.
    pub config_swaps: u64,
}

impl ManagerStats {
    /// Requests that went through the manager.
    pub fn total_requests(&self) -> u64 {
        self.unlimited_grants + self.local_grants + self.borrowed_grants + self.rejections
    }

    /// Fraction of limited requests served by borrowing.
    pub fn borrow_ratio(&self) -> f64 {
        let limited = self.local_grants + self.borrowed_grants;
        if limited == 0 {
            0.0
        } else {
            self.borrowed_grants as f64 / limited as f64
        }
    }

    /// Human-readable report.
    pub fn summary(&self) -> String {
        format!(
            "Rate Limit Manager Stats:\n\
             ├─ Registry:\n\
             │  ├─ Limiters: {}\n\
             │  └─ Config Swaps: {}\n\
             └─ Decisions:\n\
                ├─ Unlimited: {}\n\
                ├─ Local: {}\n\
                ├─ Borrowed: {} ({:.2}%)\n\
                ├─ Rejected: {}\n\
                └─ Interrupted Borrows: {}",
            self.registered_limiters,
            self.config_swaps,
            self.unlimited_grants,
            self.local_grants,
            self.borrowed_grants,
            self.borrow_ratio() * 100.0,
            self.rejections,
            self.interrupted_borrows,
        )
    }
}

impl fmt::Display for ManagerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}
