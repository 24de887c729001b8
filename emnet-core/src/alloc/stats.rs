//! ## emnet-core::alloc::stats
//! **Allocator counters**
//!
//! Counters are bumped from both the stack task and driver completions, so
//! they are plain relaxed atomics; a [`AllocStatsSnapshot`] is a consistent
//! enough view for diagnostics and metric export.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct AllocStats {
    allocations: AtomicU64,
    releases: AtomicU64,
    shares: AtomicU64,
    failures: AtomicU64,
    fallthroughs: AtomicU64,
}

impl AllocStats {
    pub const fn new() -> Self {
        Self {
            allocations: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            shares: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            fallthroughs: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc_allocations(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts buffers returned to a free list (use-count reached zero).
    #[inline]
    pub fn inc_releases(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_shares(&self) {
        self.shares.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_failures(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts allocations served by a larger pool than the first candidate.
    #[inline]
    pub fn inc_fallthroughs(&self) {
        self.fallthroughs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> AllocStatsSnapshot {
        AllocStatsSnapshot {
            allocations: self.allocations.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            shares: self.shares.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            fallthroughs: self.fallthroughs.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AllocStatsSnapshot {
    pub allocations: u64,
    pub releases: u64,
    pub shares: u64,
    pub failures: u64,
    pub fallthroughs: u64,
}

impl AllocStatsSnapshot {
    /// Buffers handed out and not yet back on a free list.
    pub fn outstanding(&self) -> u64 {
        self.allocations.saturating_sub(self.releases)
    }
}
