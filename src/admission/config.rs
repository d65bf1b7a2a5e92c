//! # Admission Configuration
//!
//! Value types that describe how one request type is admitted, plus the
//! helpers that read them out of a flat cluster property map.
//!
//! ## Key Concepts
//!
//! ```text
//!     RateLimiterConfig (one per request type):
//!
//!     ┌──────────────────────────────────────┐
//!     │ request_type: QUERY                  │ ← registry key
//!     │ enabled: true                        │ ← false = unlimited
//!     │ max_concurrent_requests: 24          │ ← pool capacity
//!     │ guaranteed_slots: 8                  │ ← never lent out
//!     │ slot_acquisition_timeout_ms: -1      │ ← -1 = don't wait
//!     │ slot_borrowing_enabled: true         │ ← may lend spare slots
//!     └──────────────────────────────────────┘
//! ```
//!
//! Configs are never mutated once built. A change produces a new instance and
//! a new limiter around it.

use super::error::{Error, Result};
use super::utils::default_max_concurrent_requests;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Flat `key → value` property map delivered by the configuration source.
pub type PropertyMap = HashMap<String, String>;

/// Timeout sentinel meaning "try once, never block".
pub const NO_WAIT_TIMEOUT_MS: i64 = -1;

/// Prefix shared by all rate limiter properties.
pub const RATE_LIMITERS_PREFIX: &str = "rate-limiters";

/// Property field names under `rate-limiters.<type>.`.
pub mod keys {
    /// `bool`: limiter on or off.
    pub const ENABLED: &str = "enabled";
    /// `u32`: pool capacity.
    pub const ALLOWED_REQUESTS: &str = "allowedRequests";
    /// `u32`: slots never lent to other request types.
    pub const GUARANTEED_SLOTS: &str = "guaranteedSlots";
    /// `bool`: spare slots may be lent.
    pub const SLOT_BORROWING_ENABLED: &str = "slotBorrowingEnabled";
    /// `i64`: local wait in milliseconds, `-1` for none.
    pub const SLOT_ACQUISITION_TIMEOUT_MS: &str = "slotAcquisitionTimeoutInMS";
}

/// Receiver of live cluster property changes.
///
/// Implementors read only the keys they own and ignore the rest.
pub trait ConfigListener: Send + Sync {
    /// Applies `properties`. Returns `Ok(true)` when live state changed.
    ///
    /// # Errors
    ///
    /// Invalid values for owned keys; the previous state stays active.
    fn on_change(&self, properties: &PropertyMap) -> Result<bool>;
}

/// Classification of an incoming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RequestType {
    /// Administrative calls (collections, cores, config).
    Admin,
    /// Search traffic.
    Query,
    /// Indexing traffic.
    Update,
    /// Streaming expressions and exports.
    Streaming,
    /// Could not be classified; never rate limited.
    Unspecified,
}

impl RequestType {
    /// Every variant, in declaration order.
    pub const ALL: [RequestType; 5] = [
        Self::Admin,
        Self::Query,
        Self::Update,
        Self::Streaming,
        Self::Unspecified,
    ];

    /// Label used on the wire, e.g. `QUERY`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Query => "QUERY",
            Self::Update => "UPDATE",
            Self::Streaming => "STREAMING",
            Self::Unspecified => "UNSPECIFIED",
        }
    }

    /// Segment used in property keys, e.g. `query`.
    pub fn property_segment(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Query => "query",
            Self::Update => "update",
            Self::Streaming => "streaming",
            Self::Unspecified => "unspecified",
        }
    }

    /// Full property key for `field`, e.g. `rate-limiters.query.enabled`.
    pub fn property_key(&self, field: &str) -> String {
        format!("{}.{}.{}", RATE_LIMITERS_PREFIX, self.property_segment(), field)
    }

    /// Parses a request label. Unknown labels yield `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(label))
    }

    /// Whether requests of this type go through admission control at all.
    pub fn is_classified(&self) -> bool {
        !matches!(self, Self::Unspecified)
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_label(s).ok_or_else(|| Error::InvalidProperty {
            key: "request type".to_string(),
            value: s.to_string(),
            reason: "expected one of ADMIN, QUERY, UPDATE, STREAMING, UNSPECIFIED",
        })
    }
}

/// Where a request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RequestContext {
    /// External client traffic; subject to admission control.
    #[default]
    Client,
    /// Server-to-server traffic; always admitted.
    Server,
}

impl RequestContext {
    /// Parses the context label carried with a request.
    ///
    /// Only an explicit `SERVER` marks internal traffic; anything else,
    /// including a missing label, is treated as a client request.
    pub fn from_label(label: Option<&str>) -> Self {
        match label {
            Some(l) if l.trim().eq_ignore_ascii_case("SERVER") => Self::Server,
            _ => Self::Client,
        }
    }

    /// `true` for server-originated requests.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Server)
    }
}

/// Immutable admission settings for one request type.
///
/// ```rust
/// use slotgate::{RateLimiterConfig, RequestType};
///
/// let config = RateLimiterConfig::builder(RequestType::Query)
///     .enabled(true)
///     .max_concurrent_requests(16)
///     .guaranteed_slots(4)
///     .slot_borrowing_enabled(true)
///     .try_build()
///     .unwrap();
///
/// assert_eq!(config.max_concurrent_requests, 16);
/// assert!(!config.waits_for_slot());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Registry key.
    pub request_type: RequestType,

    /// Disabled limiters admit everything.
    pub enabled: bool,

    /// Pool capacity.
    pub max_concurrent_requests: u32,

    /// Slots held back from borrowers. Only meaningful with borrowing enabled.
    pub guaranteed_slots: u32,

    /// `-1` = try once; `>= 0` = wait up to this many milliseconds locally.
    pub slot_acquisition_timeout_ms: i64,

    /// Whether spare capacity may be lent to other request types.
    pub slot_borrowing_enabled: bool,
}

impl RateLimiterConfig {
    /// Default settings for `request_type`: disabled, capacity of three slots
    /// per available CPU, no waiting, no borrowing.
    pub fn new(request_type: RequestType) -> Self {
        Self {
            request_type,
            enabled: false,
            max_concurrent_requests: default_max_concurrent_requests(),
            guaranteed_slots: 0,
            slot_acquisition_timeout_ms: NO_WAIT_TIMEOUT_MS,
            slot_borrowing_enabled: false,
        }
    }

    /// Starts a builder seeded with [`RateLimiterConfig::new`].
    pub fn builder(request_type: RequestType) -> RateLimiterConfigBuilder {
        RateLimiterConfigBuilder {
            config: Self::new(request_type),
        }
    }

    /// Checks the invariants a live limiter relies on.
    ///
    /// # Errors
    ///
    /// - capacity of zero on an enabled limiter
    /// - more guaranteed slots than capacity
    /// - a timeout below `-1`
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.max_concurrent_requests == 0 {
            return Err(Error::InvalidCapacity {
                request_type: self.request_type,
                value: self.max_concurrent_requests,
            });
        }

        if self.guaranteed_slots > self.max_concurrent_requests {
            return Err(Error::InvalidGuaranteedSlots {
                request_type: self.request_type,
                guaranteed: self.guaranteed_slots,
                capacity: self.max_concurrent_requests,
            });
        }

        if self.slot_acquisition_timeout_ms < NO_WAIT_TIMEOUT_MS {
            return Err(Error::InvalidTimeout {
                request_type: self.request_type,
                value: self.slot_acquisition_timeout_ms,
            });
        }

        Ok(())
    }

    /// `true` when a local acquire may block.
    #[inline]
    pub fn waits_for_slot(&self) -> bool {
        self.slot_acquisition_timeout_ms >= 0
    }

    /// Slots a borrower may take while the pool is idle.
    #[inline]
    pub fn lendable_slots(&self) -> u32 {
        if self.slot_borrowing_enabled {
            self.max_concurrent_requests - self.guaranteed_slots.min(self.max_concurrent_requests)
        } else {
            0
        }
    }

    /// Overlays every `rate-limiters.<type>.*` key present in `properties`.
    ///
    /// Returns the merged config and whether any relevant key was seen.
    /// The result is not validated.
    pub(crate) fn overlay(&self, properties: &PropertyMap) -> Result<(Self, bool)> {
        let mut next = self.clone();
        let mut seen = false;
        let rt = self.request_type;

        if let Some(v) = lookup(properties, rt, keys::ENABLED) {
            next.enabled = parse_bool(&rt.property_key(keys::ENABLED), v)?;
            seen = true;
        }
        if let Some(v) = lookup(properties, rt, keys::ALLOWED_REQUESTS) {
            next.max_concurrent_requests = parse_u32(&rt.property_key(keys::ALLOWED_REQUESTS), v)?;
            seen = true;
        }
        if let Some(v) = lookup(properties, rt, keys::GUARANTEED_SLOTS) {
            next.guaranteed_slots = parse_u32(&rt.property_key(keys::GUARANTEED_SLOTS), v)?;
            seen = true;
        }
        if let Some(v) = lookup(properties, rt, keys::SLOT_BORROWING_ENABLED) {
            next.slot_borrowing_enabled =
                parse_bool(&rt.property_key(keys::SLOT_BORROWING_ENABLED), v)?;
            seen = true;
        }
        if let Some(v) = lookup(properties, rt, keys::SLOT_ACQUISITION_TIMEOUT_MS) {
            next.slot_acquisition_timeout_ms =
                parse_i64(&rt.property_key(keys::SLOT_ACQUISITION_TIMEOUT_MS), v)?;
            seen = true;
        }

        Ok((next, seen))
    }
}

/// Fluent builder for [`RateLimiterConfig`].
#[derive(Debug, Clone)]
pub struct RateLimiterConfigBuilder {
    config: RateLimiterConfig,
}

impl RateLimiterConfigBuilder {
    /// Turns the limiter on or off.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// Sets the pool capacity.
    pub fn max_concurrent_requests(mut self, n: u32) -> Self {
        self.config.max_concurrent_requests = n;
        self
    }

    /// Sets how many slots are never lent out.
    pub fn guaranteed_slots(mut self, n: u32) -> Self {
        self.config.guaranteed_slots = n;
        self
    }

    /// Sets the local wait; `-1` disables waiting.
    pub fn slot_acquisition_timeout_ms(mut self, ms: i64) -> Self {
        self.config.slot_acquisition_timeout_ms = ms;
        self
    }

    /// Allows spare capacity to be lent to other request types.
    pub fn slot_borrowing_enabled(mut self, enabled: bool) -> Self {
        self.config.slot_borrowing_enabled = enabled;
        self
    }

    /// Returns the config without validation.
    pub fn build(self) -> RateLimiterConfig {
        self.config
    }

    /// Returns the config if it passes [`RateLimiterConfig::validate`].
    pub fn try_build(self) -> Result<RateLimiterConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn lookup<'a>(properties: &'a PropertyMap, rt: RequestType, field: &str) -> Option<&'a str> {
    properties.get(&rt.property_key(field)).map(String::as_str)
}

pub(crate) fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(invalid(key, raw, "expected true or false")),
    }
}

pub(crate) fn parse_u32(key: &str, raw: &str) -> Result<u32> {
    raw.trim()
        .parse()
        .map_err(|_| invalid(key, raw, "expected a non-negative integer"))
}

pub(crate) fn parse_i64(key: &str, raw: &str) -> Result<i64> {
    raw.trim()
        .parse()
        .map_err(|_| invalid(key, raw, "expected an integer"))
}

pub(crate) fn parse_f64(key: &str, raw: &str) -> Result<f64> {
    raw.trim()
        .parse()
        .map_err(|_| invalid(key, raw, "expected a number"))
}

fn invalid(key: &str, raw: &str, reason: &'static str) -> Error {
    Error::InvalidProperty {
        key: key.to_string(),
        value: raw.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> PropertyMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_request_type_labels() {
        assert_eq!(RequestType::from_label("QUERY"), Some(RequestType::Query));
        assert_eq!(RequestType::from_label("update"), Some(RequestType::Update));
        assert_eq!(RequestType::from_label(" Streaming "), Some(RequestType::Streaming));
        assert_eq!(RequestType::from_label("select"), None);
        assert!("bogus".parse::<RequestType>().is_err());
        assert_eq!(RequestType::Query.to_string(), "QUERY");
        assert!(!RequestType::Unspecified.is_classified());
    }

    #[test]
    fn test_property_keys() {
        assert_eq!(
            RequestType::Query.property_key(keys::ALLOWED_REQUESTS),
            "rate-limiters.query.allowedRequests"
        );
    }

    #[test]
    fn test_request_context() {
        assert!(RequestContext::from_label(Some("SERVER")).is_internal());
        assert!(RequestContext::from_label(Some("server")).is_internal());
        assert!(!RequestContext::from_label(Some("CLIENT")).is_internal());
        assert!(!RequestContext::from_label(None).is_internal());
    }

    #[test]
    fn test_defaults() {
        let config = RateLimiterConfig::new(RequestType::Query);
        assert!(!config.enabled);
        assert!(config.max_concurrent_requests > 0);
        assert_eq!(
            config.max_concurrent_requests,
            default_max_concurrent_requests()
        );
        assert_eq!(config.slot_acquisition_timeout_ms, NO_WAIT_TIMEOUT_MS);
        assert!(!config.waits_for_slot());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let zero = RateLimiterConfig::builder(RequestType::Query)
            .enabled(true)
            .max_concurrent_requests(0)
            .try_build();
        assert!(matches!(zero, Err(Error::InvalidCapacity { value: 0, .. })));

        // A disabled limiter never uses its pool.
        let disabled_zero = RateLimiterConfig::builder(RequestType::Query)
            .max_concurrent_requests(0)
            .try_build();
        assert!(disabled_zero.is_ok());

        let too_many_guaranteed = RateLimiterConfig::builder(RequestType::Update)
            .enabled(true)
            .max_concurrent_requests(4)
            .guaranteed_slots(5)
            .try_build();
        assert!(matches!(
            too_many_guaranteed,
            Err(Error::InvalidGuaranteedSlots { guaranteed: 5, capacity: 4, .. })
        ));

        let bad_timeout = RateLimiterConfig::builder(RequestType::Query)
            .slot_acquisition_timeout_ms(-2)
            .try_build();
        assert!(matches!(bad_timeout, Err(Error::InvalidTimeout { value: -2, .. })));
    }

    #[test]
    fn test_lendable_slots() {
        let config = RateLimiterConfig::builder(RequestType::Update)
            .enabled(true)
            .max_concurrent_requests(10)
            .guaranteed_slots(3)
            .slot_borrowing_enabled(true)
            .build();
        assert_eq!(config.lendable_slots(), 7);

        let no_borrow = RateLimiterConfig {
            slot_borrowing_enabled: false,
            ..config
        };
        assert_eq!(no_borrow.lendable_slots(), 0);
    }

    #[test]
    fn test_overlay_reads_only_own_keys() {
        let base = RateLimiterConfig::new(RequestType::Query);
        let map = props(&[
            ("rate-limiters.query.enabled", "true"),
            ("rate-limiters.query.allowedRequests", "7"),
            ("rate-limiters.update.allowedRequests", "99"),
            ("unrelated.key", "x"),
        ]);

        let (next, seen) = base.overlay(&map).unwrap();
        assert!(seen);
        assert!(next.enabled);
        assert_eq!(next.max_concurrent_requests, 7);
        assert_eq!(next.slot_acquisition_timeout_ms, base.slot_acquisition_timeout_ms);
    }

    #[test]
    fn test_overlay_without_relevant_keys() {
        let base = RateLimiterConfig::new(RequestType::Query);
        let (next, seen) = base.overlay(&props(&[("other", "1")])).unwrap();
        assert!(!seen);
        assert_eq!(next, base);
    }

    #[test]
    fn test_overlay_rejects_malformed_values() {
        let base = RateLimiterConfig::new(RequestType::Query);
        let err = base
            .overlay(&props(&[("rate-limiters.query.allowedRequests", "lots")]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidProperty { .. }));

        let err = base
            .overlay(&props(&[("rate-limiters.query.enabled", "yes")]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidProperty { .. }));
    }
}
