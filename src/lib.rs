//! # Slotgate - Admission Control for Search Servers
//!
//! Slotgate decides, for every incoming request, whether the server has room
//! for it right now. Each request type (queries, updates, admin calls, ...)
//! gets its own bounded pool of concurrency slots. When a pool runs dry the
//! request may borrow a spare slot from another type, and an independent CPU
//! circuit breaker can refuse work outright when the machine is overloaded.
//!
//! ## Slots, Not Tokens
//!
//! A slot is held for the whole lifetime of a request and given back when the
//! request finishes. Capacity is therefore a bound on *concurrency*, not on
//! rate:
//!
//! ```text
//!     QUERY pool, capacity 3:
//!
//!     start A:   [■□□]  ✅
//!     start B:   [■■□]  ✅
//!     start C:   [■■■]  ✅
//!     start D:   [■■■]  ❌ (or borrow from UPDATE)
//!     finish A:  [■■□]
//!     start D:   [■■■]  ✅
//! ```
//!
//! ## Features
//!
//! - 🎯 **Per-Type Pools** - Independent capacity for each request type
//! - 🤝 **Slot Borrowing** - Idle capacity is lent to exhausted types
//! - 🛡️ **Guaranteed Slots** - Owners keep a share that is never lent
//! - 🔄 **Hot Reload** - Query limits change live without dropping in-flight work
//! - 🌡️ **CPU Circuit Breaker** - Fast reject under load, fail-open when blind
//! - 📊 **Metrics** - Per-limiter and manager-wide counters with health levels
//!
//! ## Quick Start
//!
//! ```rust
//! use slotgate::{RateLimitManager, RateLimiterConfig, RequestType, ERROR_MESSAGE};
//!
//! let manager = RateLimitManager::builder()
//!     .limiter(
//!         RateLimiterConfig::builder(RequestType::Query)
//!             .enabled(true)
//!             .max_concurrent_requests(2)
//!             .build(),
//!     )
//!     .build()
//!     .unwrap();
//!
//! match manager.handle_request(Some("QUERY"), None).unwrap() {
//!     Some(reservation) => {
//!         // Handle the request; the slot is returned when `reservation` drops.
//!         drop(reservation);
//!     }
//!     None => {
//!         // Respond 429 with ERROR_MESSAGE.
//!         let _ = ERROR_MESSAGE;
//!     }
//! }
//! ```
//!
//! ### Live Reconfiguration
//!
//! ```rust
//! use slotgate::{ConfigListener, PropertyMap, RateLimitManager, RequestType};
//!
//! let manager = RateLimitManager::from_properties(&PropertyMap::new()).unwrap();
//!
//! let mut props = PropertyMap::new();
//! props.insert("rate-limiters.query.enabled".into(), "true".into());
//! props.insert("rate-limiters.query.allowedRequests".into(), "16".into());
//! assert!(manager.on_change(&props).unwrap());
//!
//! let metrics = manager.metrics(RequestType::Query).unwrap();
//! assert_eq!(metrics.capacity, 16);
//! ```
//!
//! ### CPU Circuit Breaker
//!
//! ```rust
//! use slotgate::{CircuitBreaker, CpuCircuitBreaker, SharedLoadGauge};
//!
//! let gauge = SharedLoadGauge::new();
//! let breaker = CpuCircuitBreaker::new(gauge.clone(), 90.0).unwrap();
//!
//! gauge.record(95.0);
//! let decision = breaker.check();
//! if decision.tripped {
//!     println!("{}", decision.error_message());
//! }
//! ```
//!
//! ## Architecture Overview
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │   Request Dispatcher    │
//!                    └──────────┬──────────────┘
//!                               │
//!                ┌──────────────┴───────────────┐
//!                │                               │
//!     ┌──────────▼──────────┐       ┌───────────▼──────────┐
//!     │  Circuit Breakers   │       │  Rate Limit Manager  │
//!     ├─────────────────────┤       ├──────────────────────┤
//!     │ • CPU threshold     │       │ • Classify request   │
//!     │ • Fresh sample      │       │ • Local pool         │
//!     │ • Fail open         │       │ • Borrow sweep       │
//!     └─────────────────────┘       └───────────┬──────────┘
//!                                               │
//!                                   ┌───────────▼──────────┐
//!                                   │ Request Rate Limiter │
//!                                   ├──────────────────────┤
//!                                   │ • Immutable config   │
//!                                   │ • Arc<SlotPool>      │
//!                                   └──────────────────────┘
//! ```
//!
//! ## Admission Outcomes
//!
//! | Situation | Result |
//! |-----------|--------|
//! | internal request, unknown type, no limiter, limiter disabled | [`UNLIMITED`] |
//! | slot free in own pool | owned reservation |
//! | own pool exhausted, a donor has spare slots | borrowed reservation |
//! | nothing available | `Ok(None)`, reply with [`ERROR_MESSAGE`] |
//! | pool closed during the local wait | `Err(Error::Interrupted)` |
//!
//! ## Thread Safety
//!
//! All types are thread-safe and can be shared across threads:
//! - `RateLimitManager` - Safe to share via `Arc<RateLimitManager>`
//! - `CpuCircuitBreaker` - Safe to share via `Arc<CpuCircuitBreaker>`
//!
//! ## Logging
//!
//! Diagnostics go through [`tracing`]. The crate never installs a
//! subscriber.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    missing_debug_implementations
)]
#![forbid(unsafe_code)]

// Internal module
mod admission;

// Public re-exports
pub use admission::{
    cpu_relax, default_max_concurrent_requests, keys, process_config_change, query_rate_limiter,
    CircuitBreaker, CircuitBreakerRegistry, ConfigListener, CpuCircuitBreaker, DonorOrder, Error,
    Grant, HealthStatus, LimiterMetrics, LoadGauge, LoadObservation, ManagerStats, PropertyMap,
    RateLimitManager, RateLimitManagerBuilder, RateLimiterConfig, RateLimiterConfigBuilder,
    RequestContext, RequestRateLimiter, RequestType, Result, SharedLoadGauge, SlotPool,
    SlotReservation, TripDecision, CACHE_LINE_SIZE, CPU_BREAKER_ENABLED_KEY,
    CPU_BREAKER_THRESHOLD_KEY, DEFAULT_SLOTS_PER_CPU, DEFAULT_SLOT_ACQUISITION_TIMEOUT_MS,
    ERROR_MESSAGE, NO_WAIT_TIMEOUT_MS, RATE_LIMITERS_PREFIX, UNLIMITED,
};

/// A manager wrapped in `Arc` for sharing between request threads.
///
/// # Example
/// ```rust
/// use slotgate::{RateLimitManager, SharedRateLimitManager};
/// use std::sync::Arc;
///
/// let shared: SharedRateLimitManager = Arc::new(RateLimitManager::new());
///
/// let worker = shared.clone();
/// std::thread::spawn(move || {
///     let _ = worker.handle_request(Some("QUERY"), None);
/// });
/// ```
pub type SharedRateLimitManager = std::sync::Arc<RateLimitManager>;

/// A circuit breaker behind `Arc<dyn _>`, as stored by [`CircuitBreakerRegistry`].
pub type SharedCircuitBreaker = std::sync::Arc<dyn CircuitBreaker>;

/// Version information for the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum supported Rust version.
pub const MSRV: &str = "1.70.0";

/// Prelude module for convenient imports.
///
/// ```rust
/// use slotgate::prelude::*;
/// ```
pub mod prelude {
    //! Common imports for wiring admission control into a server.
    //!
    //! # Example
    //! ```rust
    //! use slotgate::prelude::*;
    //!
    //! let manager = RateLimitManager::new();
    //! let config = RateLimiterConfig::new(RequestType::Update);
    //! let status = HealthStatus::Healthy;
    //! ```

    pub use crate::{
        CircuitBreaker, ConfigListener, CpuCircuitBreaker, Error, HealthStatus, PropertyMap,
        RateLimitManager, RateLimiterConfig, RequestContext, RequestRateLimiter, RequestType,
        SharedCircuitBreaker, SharedLoadGauge, SharedRateLimitManager, SlotReservation,
        ERROR_MESSAGE,
    };
}
