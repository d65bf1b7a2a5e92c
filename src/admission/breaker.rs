//! # Circuit Breakers
//!
//! Load-pressure checks that reject work regardless of slot accounting.
//!
//! ```text
//!     check()
//!       │
//!       ▼
//!     enabled? ──No──► not tripped
//!       │
//!       ▼
//!     gauge.sample() < 0 ──► warn once, not tripped (fail open)
//!       │
//!       ▼
//!     sample >= threshold ──► tripped, observation attached
//! ```
//!
//! Each [`CircuitBreaker::check`] samples the gauge fresh and returns the
//! observation alongside the verdict, so the rejection message always
//! describes the sample that caused it.

use super::config::{parse_bool, parse_f64, ConfigListener, PropertyMap};
use super::error::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// `circuit-breakers.cpu.enabled`
pub const CPU_BREAKER_ENABLED_KEY: &str = "circuit-breakers.cpu.enabled";

/// `circuit-breakers.cpu.threshold`
pub const CPU_BREAKER_THRESHOLD_KEY: &str = "circuit-breakers.cpu.threshold";

/// Source of a load percentage.
///
/// A negative sample means the value is currently unavailable.
pub trait LoadGauge: Send + Sync {
    /// Current load in percent, or a negative value when unknown.
    fn sample(&self) -> f64;
}

impl<F> LoadGauge for F
where
    F: Fn() -> f64 + Send + Sync,
{
    fn sample(&self) -> f64 {
        self()
    }
}

/// Gauge fed by an external sampler thread.
///
/// Clones share one value. Reads and writes are single atomic operations on
/// the value's bit pattern.
///
/// ```rust
/// use slotgate::{LoadGauge, SharedLoadGauge};
///
/// let gauge = SharedLoadGauge::new();
/// let sampler = gauge.clone();
/// assert!(gauge.sample() < 0.0);
///
/// sampler.record(42.5);
/// assert_eq!(gauge.sample(), 42.5);
/// ```
#[derive(Debug, Clone)]
pub struct SharedLoadGauge {
    bits: Arc<AtomicU64>,
}

impl SharedLoadGauge {
    /// A gauge with no sample yet.
    pub fn new() -> Self {
        Self {
            bits: Arc::new(AtomicU64::new((-1.0f64).to_bits())),
        }
    }

    /// Publishes a new sample.
    pub fn record(&self, percent: f64) {
        self.bits.store(percent.to_bits(), Ordering::Release);
    }

    /// Marks the value unavailable.
    pub fn clear(&self) {
        self.record(-1.0);
    }
}

impl Default for SharedLoadGauge {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadGauge for SharedLoadGauge {
    fn sample(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}

/// Sample and threshold seen by one check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadObservation {
    /// Sampled load, percent.
    pub seen: f64,
    /// Threshold in force, percent.
    pub allowed: f64,
}

/// Outcome of a single breaker check.
#[derive(Debug, Clone, PartialEq)]
pub struct TripDecision {
    /// Name of the breaker that produced it.
    pub breaker: &'static str,
    /// Whether the request should be rejected.
    pub tripped: bool,
    /// What was compared; absent when disabled or the gauge had no value.
    pub observation: Option<LoadObservation>,
}

impl TripDecision {
    fn open(breaker: &'static str) -> Self {
        Self {
            breaker,
            tripped: false,
            observation: None,
        }
    }

    /// Compact key/value rendering for logs, labelled by breaker name.
    pub fn debug_info(&self) -> String {
        match self.observation {
            Some(o) => format!(
                "seen{name}Usage={} allowed{name}Usage={}",
                o.seen,
                o.allowed,
                name = self.breaker
            ),
            None => format!("{}: no observation", self.breaker),
        }
    }

    /// Message returned to the rejected client.
    pub fn error_message(&self) -> String {
        match self.observation {
            Some(o) => format!(
                "{} circuit breaker triggered as seen usage is above allowed threshold. \
                 Seen usage {} and allocated threshold {}",
                self.breaker, o.seen, o.allowed
            ),
            None => format!("{} circuit breaker triggered", self.breaker),
        }
    }
}

impl fmt::Display for TripDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.debug_info())
    }
}

/// A check that can refuse work under pressure.
pub trait CircuitBreaker: Send + Sync {
    /// Short identifier used in messages.
    fn name(&self) -> &'static str;

    /// Samples fresh and decides.
    fn check(&self) -> TripDecision;

    /// Shorthand for `check().tripped`.
    fn is_tripped(&self) -> bool {
        self.check().tripped
    }
}

/// Trips when CPU usage reaches a percentage threshold.
///
/// ```rust
/// use slotgate::{CircuitBreaker, CpuCircuitBreaker, SharedLoadGauge};
///
/// let gauge = SharedLoadGauge::new();
/// let breaker = CpuCircuitBreaker::new(gauge.clone(), 75.0).unwrap();
///
/// // No sample yet: fail open.
/// assert!(!breaker.is_tripped());
///
/// gauge.record(80.0);
/// let decision = breaker.check();
/// assert!(decision.tripped);
/// assert_eq!(decision.debug_info(), "seenCPUUsage=80 allowedCPUUsage=75");
/// ```
pub struct CpuCircuitBreaker {
    gauge: Box<dyn LoadGauge>,
    threshold_bits: AtomicU64,
    enabled: AtomicBool,
    warned_unavailable: AtomicBool,
}

impl CpuCircuitBreaker {
    /// Enabled breaker reading `gauge`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidThreshold`] unless `0 < threshold <= 100`.
    pub fn new(gauge: impl LoadGauge + 'static, threshold: f64) -> Result<Self> {
        validate_threshold(threshold)?;
        Ok(Self {
            gauge: Box::new(gauge),
            threshold_bits: AtomicU64::new(threshold.to_bits()),
            enabled: AtomicBool::new(true),
            warned_unavailable: AtomicBool::new(false),
        })
    }

    /// Replaces the threshold.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidThreshold`] unless `0 < threshold <= 100`; the old
    /// value stays.
    pub fn set_threshold(&self, threshold: f64) -> Result<()> {
        validate_threshold(threshold)?;
        self.threshold_bits
            .store(threshold.to_bits(), Ordering::Release);
        Ok(())
    }

    /// Threshold in percent.
    pub fn threshold(&self) -> f64 {
        f64::from_bits(self.threshold_bits.load(Ordering::Acquire))
    }

    /// Turns the breaker on or off.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Whether checks sample the gauge at all.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

fn validate_threshold(threshold: f64) -> Result<()> {
    if threshold.is_nan() || threshold > 100.0 || threshold <= 0.0 {
        return Err(Error::InvalidThreshold { value: threshold });
    }
    Ok(())
}

impl CircuitBreaker for CpuCircuitBreaker {
    fn name(&self) -> &'static str {
        "CPU"
    }

    fn check(&self) -> TripDecision {
        if !self.is_enabled() {
            return TripDecision::open(self.name());
        }

        let seen = self.gauge.sample();
        if seen < 0.0 || seen.is_nan() {
            if !self.warned_unavailable.swap(true, Ordering::Relaxed) {
                warn!("Unable to get CPU usage, CPU circuit breaker will not trip");
            }
            return TripDecision::open(self.name());
        }

        let allowed = self.threshold();
        TripDecision {
            breaker: self.name(),
            tripped: seen >= allowed,
            observation: Some(LoadObservation { seen, allowed }),
        }
    }
}

impl ConfigListener for CpuCircuitBreaker {
    fn on_change(&self, properties: &PropertyMap) -> Result<bool> {
        // Parse both before applying either.
        let enabled = properties
            .get(CPU_BREAKER_ENABLED_KEY)
            .map(|v| parse_bool(CPU_BREAKER_ENABLED_KEY, v))
            .transpose()?;
        let threshold = properties
            .get(CPU_BREAKER_THRESHOLD_KEY)
            .map(|v| parse_f64(CPU_BREAKER_THRESHOLD_KEY, v))
            .transpose()?;

        let mut changed = false;
        if let Some(threshold) = threshold {
            if threshold != self.threshold() {
                self.set_threshold(threshold)?;
                changed = true;
            }
        }
        if let Some(enabled) = enabled {
            if enabled != self.is_enabled() {
                self.set_enabled(enabled);
                changed = true;
            }
        }

        if changed {
            info!(
                "CPU circuit breaker: enabled={} threshold={}",
                self.is_enabled(),
                self.threshold()
            );
        }
        Ok(changed)
    }
}

impl fmt::Debug for CpuCircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuCircuitBreaker")
            .field("enabled", &self.is_enabled())
            .field("threshold", &self.threshold())
            .finish()
    }
}

/// A set of breakers checked together.
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: Vec<Arc<dyn CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a breaker.
    pub fn register(&mut self, breaker: Arc<dyn CircuitBreaker>) {
        self.breakers.push(breaker);
    }

    /// Every tripped decision of one pass over all breakers.
    pub fn check_tripped(&self) -> Vec<TripDecision> {
        self.breakers
            .iter()
            .map(|b| b.check())
            .filter(|d| d.tripped)
            .collect()
    }

    /// Rejection text for `decisions`, one line per breaker.
    pub fn error_message(decisions: &[TripDecision]) -> String {
        decisions
            .iter()
            .map(TripDecision::error_message)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Number of registered breakers.
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.breakers.iter().map(|b| b.name()).collect();
        f.debug_struct("CircuitBreakerRegistry")
            .field("breakers", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn props(pairs: &[(&str, &str)]) -> PropertyMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_threshold_bounds() {
        assert!(CpuCircuitBreaker::new(|| 0.0, 100.0).is_ok());
        assert!(CpuCircuitBreaker::new(|| 0.0, 0.01).is_ok());

        for bad in [101.0, 0.0, -5.0, f64::NAN] {
            assert!(matches!(
                CpuCircuitBreaker::new(|| 0.0, bad),
                Err(Error::InvalidThreshold { .. })
            ));
        }
    }

    #[test]
    fn test_set_threshold_keeps_old_value_on_error() {
        let breaker = CpuCircuitBreaker::new(|| 0.0, 50.0).unwrap();
        assert!(breaker.set_threshold(150.0).is_err());
        assert_eq!(breaker.threshold(), 50.0);
        breaker.set_threshold(90.0).unwrap();
        assert_eq!(breaker.threshold(), 90.0);
    }

    #[test]
    fn test_trips_at_threshold() {
        let gauge = SharedLoadGauge::new();
        let breaker = CpuCircuitBreaker::new(gauge.clone(), 80.0).unwrap();

        gauge.record(79.9);
        assert!(!breaker.is_tripped());
        gauge.record(80.0);
        assert!(breaker.is_tripped());
        gauge.record(99.0);
        let decision = breaker.check();
        assert!(decision.tripped);
        assert_eq!(
            decision.observation,
            Some(LoadObservation {
                seen: 99.0,
                allowed: 80.0
            })
        );
        assert!(decision.error_message().contains("Seen usage 99"));
    }

    #[test]
    fn test_unavailable_sample_fails_open() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let breaker = CpuCircuitBreaker::new(
            move || {
                counter.fetch_add(1, Ordering::Relaxed);
                -1.0
            },
            0.001,
        )
        .unwrap();

        for _ in 0..5 {
            let decision = breaker.check();
            assert!(!decision.tripped);
            assert!(decision.observation.is_none());
        }
        // Sampled fresh every check.
        assert_eq!(calls.load(Ordering::Relaxed), 5);
        assert!(breaker.warned_unavailable.load(Ordering::Relaxed));
    }

    #[test]
    fn test_disabled_never_samples() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let breaker = CpuCircuitBreaker::new(
            move || {
                counter.fetch_add(1, Ordering::Relaxed);
                100.0
            },
            10.0,
        )
        .unwrap();
        breaker.set_enabled(false);

        assert!(!breaker.is_tripped());
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_on_change() {
        let breaker = CpuCircuitBreaker::new(|| 50.0, 90.0).unwrap();

        assert!(!breaker.on_change(&props(&[("urlScheme", "https")])).unwrap());
        assert!(breaker
            .on_change(&props(&[(CPU_BREAKER_THRESHOLD_KEY, "40")]))
            .unwrap());
        assert!(breaker.is_tripped());

        assert!(breaker
            .on_change(&props(&[(CPU_BREAKER_ENABLED_KEY, "false")]))
            .unwrap());
        assert!(!breaker.is_tripped());

        let result = breaker.on_change(&props(&[
            (CPU_BREAKER_ENABLED_KEY, "true"),
            (CPU_BREAKER_THRESHOLD_KEY, "101"),
        ]));
        assert!(matches!(result, Err(Error::InvalidThreshold { .. })));
        assert!(!breaker.is_enabled());
        assert_eq!(breaker.threshold(), 40.0);
    }

    #[test]
    fn test_registry_reports_tripped_only() {
        let mut registry = CircuitBreakerRegistry::new();
        registry.register(Arc::new(CpuCircuitBreaker::new(|| 95.0, 90.0).unwrap()));
        registry.register(Arc::new(CpuCircuitBreaker::new(|| 10.0, 90.0).unwrap()));
        assert_eq!(registry.len(), 2);

        let tripped = registry.check_tripped();
        assert_eq!(tripped.len(), 1);
        let message = CircuitBreakerRegistry::error_message(&tripped);
        assert!(message.starts_with("CPU circuit breaker triggered"));
    }

    #[test]
    fn test_debug_info_without_observation() {
        let breaker = CpuCircuitBreaker::new(|| -1.0, 50.0).unwrap();
        assert_eq!(breaker.check().debug_info(), "CPU: no observation");
    }

    #[test]
    fn test_debug_info_uses_breaker_name() {
        let decision = TripDecision {
            breaker: "Memory",
            tripped: true,
            observation: Some(LoadObservation {
                seen: 91.5,
                allowed: 90.0,
            }),
        };
        assert_eq!(
            decision.debug_info(),
            "seenMemoryUsage=91.5 allowedMemoryUsage=90"
        );
        assert!(decision.error_message().starts_with("Memory circuit breaker"));
    }
}
