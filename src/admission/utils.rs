//! # Utility Functions (utils.rs)
//!
//! Low-level helpers used by the slot pool: spin hints, cache-line padding
//! and the default capacity derived from the host's CPU count.
//!
//! ```text
//!     Platform-Specific Features:
//!
//!     x86_64 (Intel/AMD):
//!     ├─ Cache line: 64 bytes
//!     └─ PAUSE instruction for spin loops
//!
//!     AArch64 (ARM):
//!     ├─ Cache line: 128 bytes
//!     └─ YIELD instruction for spin loops
//! ```

/// Slots per available CPU used when no capacity is configured.
pub const DEFAULT_SLOTS_PER_CPU: u32 = 3;

/// Cache line size for x86_64 processors.
#[cfg(target_arch = "x86_64")]
pub const CACHE_LINE_SIZE: usize = 64;

/// Cache line size for ARM64 processors.
#[cfg(target_arch = "aarch64")]
pub const CACHE_LINE_SIZE: usize = 128;

/// Cache line size assumed elsewhere.
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub const CACHE_LINE_SIZE: usize = 64;

/// CPU-specific relaxation hint for spin loops.
///
/// `spin_loop` lowers to PAUSE on x86_64 and YIELD on ARM64.
#[inline(always)]
pub fn cpu_relax() {
    std::hint::spin_loop();
}

/// Default pool capacity: three slots per available processing unit.
///
/// Falls back to a single CPU when parallelism cannot be queried.
pub fn default_max_concurrent_requests() -> u32 {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    u32::try_from(cpus)
        .unwrap_or(u32::MAX / DEFAULT_SLOTS_PER_CPU)
        .saturating_mul(DEFAULT_SLOTS_PER_CPU)
}

/// Cache-aligned wrapper that keeps a hot counter on its own cache line.
///
/// ```text
///     Without Cache Alignment:
///     ┌──────────────────────────┐
///     │ free slots │ wait stats  │ ← Same cache line
///     └──────────────────────────┘
///     Every acquire invalidates the neighbour's line.
///
///     With Cache Alignment:
///     ┌──────────────────────────┐
///     │        free slots        │ ← Own cache line
///     └──────────────────────────┘
/// ```
#[cfg_attr(target_arch = "aarch64", repr(C, align(128)))]
#[cfg_attr(not(target_arch = "aarch64"), repr(C, align(64)))]
pub(crate) struct CacheAligned<T>(T);

impl<T> CacheAligned<T> {
    #[inline(always)]
    pub(crate) const fn new(value: T) -> Self {
        Self(value)
    }

    #[inline(always)]
    pub(crate) fn get(&self) -> &T {
        &self.0
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for CacheAligned<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_cpu_relax_returns() {
        for _ in 0..100 {
            cpu_relax();
        }
    }

    #[test]
    fn test_default_capacity_scales_with_cpus() {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1) as u32;
        assert_eq!(default_max_concurrent_requests(), cpus * DEFAULT_SLOTS_PER_CPU);
        assert!(default_max_concurrent_requests() >= DEFAULT_SLOTS_PER_CPU);
    }

    #[test]
    fn test_cache_alignment() {
        assert_eq!(std::mem::align_of::<CacheAligned<AtomicU32>>(), CACHE_LINE_SIZE);
        let aligned = CacheAligned::new(AtomicU32::new(7));
        assert_eq!(aligned.get().load(std::sync::atomic::Ordering::Relaxed), 7);
    }
}
