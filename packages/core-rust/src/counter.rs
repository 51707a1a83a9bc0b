//! Injected correlation-id counters.
//!
//! Owned services rather than package-level statics, so every server,
//! client, and test case holds its own independent instance. Increments are
//! atomic; relaxed ordering is enough because only uniqueness matters, not
//! cross-counter ordering.

use std::sync::atomic::{AtomicI64, Ordering};

/// Monotonic labelled id source, e.g. `request_0`, `request_1`, ...
///
/// Unique for the lifetime of the owning process; wraparound is not a
/// concern at realistic request rates.
#[derive(Debug)]
pub struct SequenceCounter {
    prefix: &'static str,
    next: AtomicI64,
}

impl SequenceCounter {
    /// New counter starting at `<prefix>_0`.
    #[must_use]
    pub const fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            next: AtomicI64::new(0),
        }
    }

    /// Next label in the sequence.
    #[must_use]
    pub fn next_label(&self) -> String {
        format!("{}_{}", self.prefix, self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Bounded-range counter cycling through `0..modulus`.
#[derive(Debug)]
pub struct CyclingCounter {
    modulus: i64,
    next: AtomicI64,
}

impl CyclingCounter {
    /// New counter cycling through `0..modulus`.
    #[must_use]
    pub const fn new(modulus: i64) -> Self {
        Self {
            modulus,
            next: AtomicI64::new(0),
        }
    }

    /// Next value in the cycle.
    #[must_use]
    pub fn next_value(&self) -> i64 {
        self.next.fetch_add(1, Ordering::Relaxed).rem_euclid(self.modulus)
    }
}
