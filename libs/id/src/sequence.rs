//! Monotonic allocator for sequence ids.

use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out strictly increasing integers starting at 1.
///
/// Zero is never returned so it can stand for "unassigned" in wire formats.
#[derive(Debug)]
pub struct Sequence(AtomicU64);

impl Sequence {
    pub const fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    /// Starts the sequence after `last`, e.g. the highest id restored from a store.
    pub const fn starting_after(last: u64) -> Self {
        Self(AtomicU64::new(last.saturating_add(1)))
    }

    pub fn next<T: From<u64>>(&self) -> T {
        T::from(self.0.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new()
    }
}
