//! # Rate Limit Manager
//!
//! The single entry point for admission: classifies a request, dispatches it
//! to the limiter registered for its type and, when that pool is exhausted,
//! sweeps the other limiters for a slot they are willing to lend.
//!
//! ## Architecture
//!
//! ```text
//!     Incoming request (type label, context label)
//!              │
//!              ▼
//!     internal / unknown? ──Yes──► UNLIMITED
//!              │
//!              ▼
//!     ┌──────────────────┐
//!     │     DashMap      │
//!     │  QUERY  → RRL    │──► handle_request() ──► reservation ✅
//!     │  UPDATE → RRL    │          │
//!     │  ADMIN  → RRL    │          ▼ exhausted
//!     └──────────────────┘   try_slot_borrowing()
//!                                   │
//!                                   ▼
//!                     each other limiter, registration order:
//!                     allow_slot_borrowing() ──► first slot wins
//!                                   │
//!                                   ▼
//!                               None ❌ reject
//! ```
//!
//! ## Hot Reload
//!
//! [`RateLimitManager::on_change`] replaces the query limiter through the
//! map's entry API, so the swap is a single atomic per-key write. The old
//! limiter is only dropped from the registry; reservations that came out of
//! its pool still hold that pool and release into it.

use super::config::{
    ConfigListener, PropertyMap, RateLimiterConfig, RequestContext, RequestType,
};
use super::error::{Error, Result};
use super::limiter::RequestRateLimiter;
use super::metrics::{LimiterMetrics, ManagerStats};
use super::pool::{Grant, SlotReservation, UNLIMITED};
use super::query::{process_config_change, query_rate_limiter};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Message returned to clients whose request was rejected.
pub const ERROR_MESSAGE: &str = "Too many requests for this request type. Please try after some time or increase the quota for this request type";

/// Default local wait: none.
pub const DEFAULT_SLOT_ACQUISITION_TIMEOUT_MS: i64 = super::config::NO_WAIT_TIMEOUT_MS;

/// Order in which donors are tried when a pool is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DonorOrder {
    /// Registration order, every time.
    ///
    /// Predictable, but under sustained contention the first donor is
    /// drained before later ones are ever asked.
    #[default]
    Registration,

    /// Registration order rotated by one position per sweep.
    Rotating,
}

/// Registry slot: the current limiter plus the position it was first
/// registered at, which survives replacement.
#[derive(Debug)]
struct RegistryEntry {
    seq: u64,
    limiter: Arc<RequestRateLimiter>,
}

/// Registry of per-type limiters and orchestrator of the admission decision.
///
/// ## Example
///
/// ```rust
/// use slotgate::{RateLimitManager, RateLimiterConfig, RequestRateLimiter, RequestType};
///
/// let manager = RateLimitManager::new();
/// manager.register_request_rate_limiter(
///     RequestRateLimiter::new(
///         RateLimiterConfig::builder(RequestType::Query)
///             .enabled(true)
///             .max_concurrent_requests(1)
///             .build(),
///     )
///     .unwrap(),
///     RequestType::Query,
/// );
///
/// let first = manager.handle_request(Some("QUERY"), None).unwrap();
/// assert!(first.is_some());
///
/// // Pool exhausted and nobody lends: reject.
/// assert!(manager.handle_request(Some("QUERY"), None).unwrap().is_none());
///
/// // Internal traffic is never limited.
/// let internal = manager.handle_request(Some("QUERY"), Some("SERVER")).unwrap();
/// assert!(internal.unwrap().is_unlimited());
/// ```
pub struct RateLimitManager {
    limiters: DashMap<RequestType, RegistryEntry, ahash::RandomState>,
    next_seq: AtomicU64,
    donor_order: DonorOrder,
    rotation: AtomicUsize,

    /// Set by `shutdown`; pools built afterwards start closed.
    closed: AtomicBool,

    unlimited_grants: AtomicU64,
    local_grants: AtomicU64,
    borrowed_grants: AtomicU64,
    rejections: AtomicU64,
    interrupted_borrows: AtomicU64,
    config_swaps: AtomicU64,
}

impl RateLimitManager {
    /// Empty manager; every request is unlimited until limiters are registered.
    pub fn new() -> Self {
        Self::with_donor_order(DonorOrder::default())
    }

    /// Empty manager that sweeps donors in `donor_order`.
    pub fn with_donor_order(donor_order: DonorOrder) -> Self {
        Self {
            limiters: DashMap::with_hasher(ahash::RandomState::new()),
            next_seq: AtomicU64::new(0),
            donor_order,
            rotation: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            unlimited_grants: AtomicU64::new(0),
            local_grants: AtomicU64::new(0),
            borrowed_grants: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            interrupted_borrows: AtomicU64::new(0),
            config_swaps: AtomicU64::new(0),
        }
    }

    /// Startup path: a manager with the query limiter seeded from the
    /// cluster properties available at boot.
    ///
    /// # Errors
    ///
    /// Invalid `rate-limiters.query.*` values.
    pub fn from_properties(properties: &PropertyMap) -> Result<Self> {
        Self::builder().initial_properties(properties.clone()).build()
    }

    /// Starts a [`RateLimitManagerBuilder`].
    pub fn builder() -> RateLimitManagerBuilder {
        RateLimitManagerBuilder::default()
    }

    /// Admits a request described by its raw labels.
    ///
    /// `request_type` is the classification label (`QUERY`, `UPDATE`, ...);
    /// `request_context` is `SERVER` for internal traffic. Missing or
    /// unknown types and internal traffic get [`UNLIMITED`].
    ///
    /// Returns `Ok(None)` when the request should be rejected with
    /// [`ERROR_MESSAGE`].
    ///
    /// # Errors
    ///
    /// [`Error::Interrupted`] when the local wait was cut short; the request
    /// should be abandoned.
    pub fn handle_request(
        &self,
        request_type: Option<&str>,
        request_context: Option<&str>,
    ) -> Result<Option<SlotReservation>> {
        let Some(request_type) = request_type.and_then(RequestType::from_label) else {
            self.unlimited_grants.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(UNLIMITED));
        };
        self.admit(request_type, RequestContext::from_label(request_context))
    }

    /// Admits an already classified request.
    ///
    /// # Errors
    ///
    /// [`Error::Interrupted`] when the local wait was cut short.
    pub fn admit(
        &self,
        request_type: RequestType,
        context: RequestContext,
    ) -> Result<Option<SlotReservation>> {
        if context.is_internal() || !request_type.is_classified() {
            self.unlimited_grants.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(UNLIMITED));
        }

        // Clone out of the map so no shard lock is held while waiting.
        let Some(limiter) = self.get_request_rate_limiter(request_type) else {
            self.unlimited_grants.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(UNLIMITED));
        };

        // The local wait, if configured, happens here; borrowing is only
        // the fallback once the own pool has had its chance.
        if let Some(reservation) = limiter.handle_request()? {
            self.record_grant(&reservation);
            return Ok(Some(reservation));
        }

        debug!("{} pool exhausted, trying to borrow a slot", request_type);
        match self.try_slot_borrowing(request_type) {
            Some(reservation) => {
                self.record_grant(&reservation);
                Ok(Some(reservation))
            }
            None => {
                self.rejections.fetch_add(1, Ordering::Relaxed);
                debug!("Rejecting {} request: no slot available", request_type);
                Ok(None)
            }
        }
    }

    fn record_grant(&self, reservation: &SlotReservation) {
        let counter = match reservation.grant() {
            Grant::Unlimited => &self.unlimited_grants,
            Grant::Owned => &self.local_grants,
            Grant::Borrowed => &self.borrowed_grants,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Asks every other borrowing-enabled limiter for a slot.
    ///
    /// Donors are tried in [`DonorOrder`]; the first slot wins. A donor whose
    /// pool was closed mid-attempt is skipped and the sweep goes on.
    pub fn try_slot_borrowing(&self, request_type: RequestType) -> Option<SlotReservation> {
        let mut donors: Vec<(u64, RequestType, Arc<RequestRateLimiter>)> = self
            .limiters
            .iter()
            .filter(|e| *e.key() != request_type && e.value().limiter.is_slot_borrowing_enabled())
            .map(|e| (e.value().seq, *e.key(), Arc::clone(&e.value().limiter)))
            .collect();
        donors.sort_unstable_by_key(|(seq, _, _)| *seq);

        if self.donor_order == DonorOrder::Rotating && !donors.is_empty() {
            let start = self.rotation.fetch_add(1, Ordering::Relaxed) % donors.len();
            donors.rotate_left(start);
        }

        for (_, donor_type, donor) in donors {
            debug!("Borrowing a slot from {} for {}", donor_type, request_type);
            match donor.allow_slot_borrowing() {
                Ok(Some(reservation)) => return Some(reservation),
                Ok(None) => {}
                Err(Error::Interrupted) => {
                    self.interrupted_borrows.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Interrupted while borrowing from {} for {}, trying next donor",
                        donor_type, request_type
                    );
                }
                Err(e) => {
                    warn!("Borrowing from {} failed: {}", donor_type, e);
                }
            }
        }

        None
    }

    /// Registers `limiter` under `request_type`, replacing any existing one.
    ///
    /// A replaced limiter keeps its position in the donor order. After
    /// [`shutdown`](Self::shutdown) the limiter's pool is closed on arrival.
    pub fn register_request_rate_limiter(
        &self,
        limiter: RequestRateLimiter,
        request_type: RequestType,
    ) {
        match self.limiters.entry(request_type) {
            Entry::Occupied(mut occupied) => {
                let seq = occupied.get().seq;
                let limiter = self.admit_limiter(limiter);
                occupied.insert(RegistryEntry { seq, limiter });
                info!("Replaced rate limiter for {}", request_type);
            }
            Entry::Vacant(vacant) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                let limiter = self.admit_limiter(limiter);
                vacant.insert(RegistryEntry { seq, limiter });
                info!("Registered rate limiter for {}", request_type);
            }
        }
    }

    /// Wraps a freshly built limiter, closing its pool once shut down.
    ///
    /// Called with the entry's shard lock held, so a concurrent `shutdown`
    /// either sets the flag first or sweeps the new entry.
    fn admit_limiter(&self, limiter: RequestRateLimiter) -> Arc<RequestRateLimiter> {
        if self.is_shut_down() {
            limiter.pool().close();
        }
        Arc::new(limiter)
    }

    /// Current limiter for `request_type`.
    pub fn get_request_rate_limiter(
        &self,
        request_type: RequestType,
    ) -> Option<Arc<RequestRateLimiter>> {
        self.limiters
            .get(&request_type)
            .map(|entry| Arc::clone(&entry.limiter))
    }

    /// Re-reads the query limiter settings from `properties`.
    ///
    /// Only the query type is reconfigured live. When nothing relevant
    /// changed the existing limiter, its pool and its in-flight
    /// reservations are left alone and `Ok(false)` is returned.
    ///
    /// # Errors
    ///
    /// Invalid `rate-limiters.query.*` values; the current limiter stays.
    pub fn on_change(&self, properties: &PropertyMap) -> Result<bool> {
        let result = self.apply_query_change(properties);
        if let Err(e) = &result {
            warn!("Ignoring query rate limiter update: {}", e);
        }
        result
    }

    fn apply_query_change(&self, properties: &PropertyMap) -> Result<bool> {
        let request_type = RequestType::Query;

        // Entry holds the shard write lock: compute and swap are one step.
        match self.limiters.entry(request_type) {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.get().limiter.config();
                let next = process_config_change(request_type, Some(previous), properties)?;
                let Some(config) = next else {
                    return Ok(false);
                };
                let seq = occupied.get().seq;
                self.log_swap(Some(occupied.get().limiter.config()), &config);
                let limiter = self.admit_limiter(RequestRateLimiter::new(config)?);
                occupied.insert(RegistryEntry { seq, limiter });
            }
            Entry::Vacant(vacant) => {
                let Some(config) = process_config_change(request_type, None, properties)? else {
                    return Ok(false);
                };
                self.log_swap(None, &config);
                let limiter = self.admit_limiter(RequestRateLimiter::new(config)?);
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                vacant.insert(RegistryEntry { seq, limiter });
            }
        }

        self.config_swaps.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    fn log_swap(&self, previous: Option<&RateLimiterConfig>, next: &RateLimiterConfig) {
        info!(
            "Reconfiguring {} rate limiter: enabled={} allowedRequests={} (was {:?}) guaranteedSlots={} borrowing={} timeoutMs={}",
            next.request_type,
            next.enabled,
            next.max_concurrent_requests,
            previous.map(|p| p.max_concurrent_requests),
            next.guaranteed_slots,
            next.slot_borrowing_enabled,
            next.slot_acquisition_timeout_ms,
        );
    }

    /// Closes every registered pool.
    ///
    /// Callers blocked on a local wait get [`Error::Interrupted`]; borrowers
    /// move on to the next donor. Held reservations can still be released.
    /// The manager stays shut down: limiters registered or swapped in later
    /// come with closed pools.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let limiters: Vec<Arc<RequestRateLimiter>> = self
            .limiters
            .iter()
            .map(|e| Arc::clone(&e.value().limiter))
            .collect();
        for limiter in &limiters {
            limiter.pool().close();
        }
        info!("Closed {} rate limiter pools", limiters.len());
    }

    /// `true` once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Donor sweep strategy.
    pub fn donor_order(&self) -> DonorOrder {
        self.donor_order
    }

    /// Registered request types, in registration order.
    pub fn request_types(&self) -> Vec<RequestType> {
        let mut types: Vec<(u64, RequestType)> = self
            .limiters
            .iter()
            .map(|e| (e.value().seq, *e.key()))
            .collect();
        types.sort_unstable();
        types.into_iter().map(|(_, t)| t).collect()
    }

    /// Number of registered limiters.
    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    /// `true` when no limiter is registered.
    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    /// Counters of the limiter currently registered for `request_type`.
    pub fn metrics(&self, request_type: RequestType) -> Option<LimiterMetrics> {
        self.get_request_rate_limiter(request_type)
            .map(|limiter| limiter.metrics())
    }

    /// Manager-wide counters.
    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            registered_limiters: self.len(),
            unlimited_grants: self.unlimited_grants.load(Ordering::Relaxed),
            local_grants: self.local_grants.load(Ordering::Relaxed),
            borrowed_grants: self.borrowed_grants.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            interrupted_borrows: self.interrupted_borrows.load(Ordering::Relaxed),
            config_swaps: self.config_swaps.load(Ordering::Relaxed),
        }
    }
}

impl Default for RateLimitManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigListener for RateLimitManager {
    fn on_change(&self, properties: &PropertyMap) -> Result<bool> {
        RateLimitManager::on_change(self, properties)
    }
}

impl std::fmt::Debug for RateLimitManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitManager")
            .field("request_types", &self.request_types())
            .field("donor_order", &self.donor_order)
            .finish()
    }
}

/// Builder for [`RateLimitManager`].
///
/// ```rust
/// use slotgate::{DonorOrder, RateLimitManager, RateLimiterConfig, RequestType};
///
/// let manager = RateLimitManager::builder()
///     .limiter(
///         RateLimiterConfig::builder(RequestType::Update)
///             .enabled(true)
///             .max_concurrent_requests(8)
///             .slot_borrowing_enabled(true)
///             .build(),
///     )
///     .donor_order(DonorOrder::Rotating)
///     .build()
///     .unwrap();
///
/// assert_eq!(manager.request_types(), vec![RequestType::Update]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RateLimitManagerBuilder {
    configs: Vec<RateLimiterConfig>,
    initial_properties: Option<PropertyMap>,
    donor_order: DonorOrder,
}

impl RateLimitManagerBuilder {
    /// Adds a limiter; registration order follows call order.
    pub fn limiter(mut self, config: RateLimiterConfig) -> Self {
        self.configs.push(config);
        self
    }

    /// Seeds the query limiter from startup cluster properties. It is
    /// registered first, ahead of limiters added with [`limiter`](Self::limiter).
    pub fn initial_properties(mut self, properties: PropertyMap) -> Self {
        self.initial_properties = Some(properties);
        self
    }

    /// Sets the donor sweep strategy.
    pub fn donor_order(mut self, order: DonorOrder) -> Self {
        self.donor_order = order;
        self
    }

    /// Validates every config and builds the manager.
    ///
    /// # Errors
    ///
    /// The first invalid config or property value.
    pub fn build(self) -> Result<RateLimitManager> {
        let manager = RateLimitManager::with_donor_order(self.donor_order);

        if let Some(properties) = &self.initial_properties {
            let limiter = query_rate_limiter(properties)?;
            manager.register_request_rate_limiter(limiter, RequestType::Query);
        }

        for config in self.configs {
            let request_type = config.request_type;
            manager.register_request_rate_limiter(RequestRateLimiter::new(config)?, request_type);
        }

        Ok(manager)
    }
}
