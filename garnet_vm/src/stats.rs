//! Dispatch and preparation counters.
//!
//! Plain relaxed atomics; the numbers steer nothing, they exist for
//! diagnostics and for tests that pin cache behavior (a cache-hit test
//! asserts the full-lookup counter stood still).

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one VM state.
#[derive(Debug, Default)]
pub struct VmStats {
    /// Instructions dispatched.
    pub dispatched: AtomicU64,
    /// Sends executed.
    pub sends: AtomicU64,
    /// Inline-cache hits.
    pub cache_hits: AtomicU64,
    /// Inline-cache misses.
    pub cache_misses: AtomicU64,
    /// Full method lookups (empty sites, cache misses, megamorphic sites).
    pub full_lookups: AtomicU64,
    /// Constant-cache hits.
    pub constant_hits: AtomicU64,
    /// Constant-cache misses.
    pub constant_misses: AtomicU64,
    /// Safepoint polls taken.
    pub safepoints: AtomicU64,
    /// Compiled codes prepared into machine code.
    pub prepared: AtomicU64,
}

impl VmStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_send(&self) {
        self.sends.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_full_lookup(&self) {
        self.full_lookups.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_constant_hit(&self) {
        self.constant_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_constant_miss(&self) {
        self.constant_misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_safepoint(&self) {
        self.safepoints.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_prepared(&self) {
        self.prepared.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn full_lookups(&self) -> u64 {
        self.full_lookups.load(Ordering::Relaxed)
    }

    /// Inline-cache hit rate (0.0 to 1.0).
    pub fn cache_hit_rate(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        if hits + misses == 0 {
            0.0
        } else {
            hits as f64 / (hits + misses) as f64
        }
    }
}

/// One `m_counter` site installed by the preparer. Diagnostic only; the
/// prepared operand word holds the counter's index.
#[derive(Debug)]
pub struct Measurement {
    pub ip: u32,
    count: AtomicU64,
}

impl Measurement {
    pub fn new(ip: u32) -> Measurement {
        Measurement {
            ip,
            count: AtomicU64::new(0),
        }
    }

    #[inline(always)]
    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let stats = VmStats::new();
        assert_eq!(stats.cache_hit_rate(), 0.0);
        for _ in 0..9 {
            stats.record_cache_hit();
        }
        stats.record_cache_miss();
        assert!((stats.cache_hit_rate() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_measurement() {
        let m = Measurement::new(12);
        m.increment();
        m.increment();
        assert_eq!(m.count(), 2);
        assert_eq!(m.ip, 12);
    }
}
