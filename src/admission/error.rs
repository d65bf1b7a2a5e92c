//! Error type shared by every admission component.
//!
//! Only two kinds of failure exist here: configuration that must never become
//! active, and an interrupted wait on a slot pool. Running out of slots is not
//! an error; it is reported as `Ok(None)` by the acquire paths.

use super::config::RequestType;
use thiserror::Error;

/// Errors raised by admission control.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Circuit breaker threshold outside `(0, 100]`.
    #[error("invalid circuit breaker threshold {value}: must be greater than 0 and at most 100")]
    InvalidThreshold {
        /// Rejected threshold, in percent.
        value: f64,
    },

    /// An enabled limiter was configured without capacity.
    #[error("invalid capacity {value} for request type {request_type}: must be greater than 0")]
    InvalidCapacity {
        /// Limiter the capacity belongs to.
        request_type: RequestType,
        /// Rejected capacity.
        value: u32,
    },

    /// More guaranteed slots than the pool holds.
    #[error(
        "invalid guaranteed slots {guaranteed} for request type {request_type}: pool capacity is {capacity}"
    )]
    InvalidGuaranteedSlots {
        /// Limiter the setting belongs to.
        request_type: RequestType,
        /// Rejected guaranteed slot count.
        guaranteed: u32,
        /// Configured pool capacity.
        capacity: u32,
    },

    /// Acquisition timeout below the `-1` "do not wait" sentinel.
    #[error("invalid slot acquisition timeout {value}ms for request type {request_type}")]
    InvalidTimeout {
        /// Limiter the setting belongs to.
        request_type: RequestType,
        /// Rejected timeout.
        value: i64,
    },

    /// A property value could not be parsed.
    #[error("invalid value {value:?} for property {key}: {reason}")]
    InvalidProperty {
        /// Property key as delivered by the configuration source.
        key: String,
        /// Raw value.
        value: String,
        /// What was expected instead.
        reason: &'static str,
    },

    /// A wait for a slot was cut short because the pool was closed.
    #[error("interrupted while waiting for a slot")]
    Interrupted,
}

impl Error {
    /// Returns `true` for errors that stop a limiter or breaker from becoming active.
    pub fn is_config_error(&self) -> bool {
        !matches!(self, Self::Interrupted)
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
