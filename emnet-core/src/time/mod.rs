//! ## emnet-core::time
//! **Millisecond clocks for the protocol timers**
//!
//! The ARP and ACD timers only need a monotonic millisecond count. Tests and
//! the simulator drive a [`VirtualClock`]; hosted deployments use
//! [`MonotonicClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Granularity of the periodic stack timer.
pub const TICK_MS: u64 = 1000;

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Clone, Default)]
pub struct VirtualClock {
    offset: Arc<AtomicU64>, // Milliseconds
}

impl VirtualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            offset: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.offset.fetch_add(ms, Ordering::Release);
    }
}

impl Clock for VirtualClock {
    #[inline]
    fn now_ms(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }
}

/// Wall-clock backed, starting at zero when created.
#[derive(Clone)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_clock_is_shared_between_clones() {
        let clock = VirtualClock::new(100);
        let view = clock.clone();
        clock.advance(TICK_MS);
        assert_eq!(view.now_ms(), 1100);
    }

    #[test]
    fn monotonic_clock_does_not_go_backwards() {
        let clock = MonotonicClock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }
}
