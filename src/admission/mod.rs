//! # Admission Module
//!
//! Internal implementation of admission control, split by concern.
//!
//! ## Module Structure
//!
//! ```text
//!     admission/
//!     ├── mod.rs          (Module organization)
//!     ├── error.rs        (Error type)
//!     ├── config.rs       (Request types, limiter settings, property keys)
//!     ├── pool.rs         (Slot pool and reservations)
//!     ├── limiter.rs      (Per-type request rate limiter)
//!     ├── query.rs        (Query limiter reconfiguration)
//!     ├── manager.rs      (Registry, dispatch and slot borrowing)
//!     ├── breaker.rs      (Load-based circuit breakers)
//!     ├── metrics.rs      (Counters and health)
//!     └── utils.rs        (CPU hints and defaults)
//! ```
//!
//! ## Architecture Flow
//!
//! ```text
//!     Request
//!        │
//!        ▼
//!     ┌─────────┐
//!     │ Breaker │ ◄── Load pressure, optional
//!     └────┬────┘
//!          │
//!          ▼
//!     ┌─────────┐
//!     │ Manager │ ◄── Classify, dispatch, borrow
//!     └────┬────┘
//!          │
//!          ▼
//!     ┌─────────┐
//!     │ Limiter │ ◄── Config + pool for one type
//!     └────┬────┘
//!          │
//!          ▼
//!     ┌─────────┐
//!     │  Pool   │ ◄── Atomic slot counter
//!     └─────────┘
//! ```

mod breaker;
mod config;
mod error;
mod limiter;
mod manager;
mod metrics;
mod pool;
mod query;
mod utils;

/// Load-based circuit breakers
pub use breaker::{
    CircuitBreaker, CircuitBreakerRegistry, CpuCircuitBreaker, LoadGauge, LoadObservation,
    SharedLoadGauge, TripDecision, CPU_BREAKER_ENABLED_KEY, CPU_BREAKER_THRESHOLD_KEY,
};

/// Request classification, limiter settings and property keys
pub use config::{
    keys, ConfigListener, PropertyMap, RateLimiterConfig, RateLimiterConfigBuilder,
    RequestContext, RequestType, NO_WAIT_TIMEOUT_MS, RATE_LIMITERS_PREFIX,
};

/// Error type
pub use error::{Error, Result};

/// Per-type limiter
pub use limiter::RequestRateLimiter;

/// Registry and dispatch
pub use manager::{
    DonorOrder, RateLimitManager, RateLimitManagerBuilder, DEFAULT_SLOT_ACQUISITION_TIMEOUT_MS,
    ERROR_MESSAGE,
};

/// Counters and health
pub use metrics::{HealthStatus, LimiterMetrics, ManagerStats};

/// Slot accounting
pub use pool::{Grant, SlotPool, SlotReservation, UNLIMITED};

/// Query limiter reconfiguration
pub use query::{process_config_change, query_rate_limiter};

/// CPU hints and defaults
pub use utils::{cpu_relax, default_max_concurrent_requests, CACHE_LINE_SIZE, DEFAULT_SLOTS_PER_CPU};
