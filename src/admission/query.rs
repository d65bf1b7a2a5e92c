//! Configuration processing for the query limiter.
//!
//! The query limiter is the only one reconfigured live. Every cluster
//! property notification funnels through [`process_config_change`], which
//! answers "does this change the limiter?" without touching any state.

use super::config::{PropertyMap, RateLimiterConfig, RequestType};
use super::error::Result;
use super::limiter::RequestRateLimiter;

/// Works out the config `request_type` should run with after `properties`
/// changed.
///
/// Starts from `previous` (or the defaults when no limiter exists yet),
/// overlays the `rate-limiters.<type>.*` keys and validates the result.
///
/// Returns `Ok(None)` when no relevant key is present or the merged config
/// equals `previous`, meaning the existing limiter and its in-flight
/// reservations stay untouched.
///
/// # Errors
///
/// Malformed property values and configs that fail validation.
///
/// # Example
///
/// ```rust
/// use slotgate::{process_config_change, PropertyMap, RequestType};
///
/// let mut props = PropertyMap::new();
/// props.insert("urlScheme".into(), "https".into());
/// assert!(process_config_change(RequestType::Query, None, &props).unwrap().is_none());
///
/// props.insert("rate-limiters.query.enabled".into(), "true".into());
/// props.insert("rate-limiters.query.allowedRequests".into(), "8".into());
/// let config = process_config_change(RequestType::Query, None, &props)
///     .unwrap()
///     .unwrap();
/// assert_eq!(config.max_concurrent_requests, 8);
/// ```
pub fn process_config_change(
    request_type: RequestType,
    previous: Option<&RateLimiterConfig>,
    properties: &PropertyMap,
) -> Result<Option<RateLimiterConfig>> {
    let base = previous
        .cloned()
        .unwrap_or_else(|| RateLimiterConfig::new(request_type));

    let (candidate, seen) = base.overlay(properties)?;
    if !seen {
        return Ok(None);
    }

    candidate.validate()?;

    if previous == Some(&candidate) {
        return Ok(None);
    }
    Ok(Some(candidate))
}

/// Builds the initial query limiter from whatever the cluster properties
/// hold at startup; absent keys fall back to the (disabled) defaults.
///
/// # Errors
///
/// Same as [`process_config_change`].
pub fn query_rate_limiter(properties: &PropertyMap) -> Result<RequestRateLimiter> {
    let config = process_config_change(RequestType::Query, None, properties)?
        .unwrap_or_else(|| RateLimiterConfig::new(RequestType::Query));
    RequestRateLimiter::new(config)
}
