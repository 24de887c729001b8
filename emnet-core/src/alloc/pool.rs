//! ## emnet-core::alloc::pool
//! **Size-classed packet pools**
//!
//! All buffers are carved when the allocator is built; pools never grow.
//! `alloc` tries the smallest class that fits and falls through to larger
//! ones, `release` may be called from any thread.
use parking_lot::MappedMutexGuard;
use tracing::{trace, warn};

use super::packet::{Packet, PacketBuf};
use super::stats::{AllocStats, AllocStatsSnapshot};
use crate::error::PoolError;
use crate::queue::Queue;
use crate::sync::Critical;

/// One size class: `count` buffers of `size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolClass {
    pub size: usize,
    pub count: usize,
}

impl PoolClass {
    pub const fn new(size: usize, count: usize) -> Self {
        Self { size, count }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Size classes in strictly increasing order.
    pub classes: Vec<PoolClass>,
    /// Bytes left in front of the payload of a fresh packet for headers.
    pub header_reserve: usize,
    /// Surround every buffer with sentinel words, checked on release.
    pub guard_words: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            classes: vec![PoolClass::new(128, 16), PoolClass::new(1536, 8)],
            header_reserve: 34, // Ethernet + IPv4 base header.
            guard_words: cfg!(debug_assertions),
        }
    }
}

struct PoolState {
    bufs: Vec<PacketBuf>,
    free: Queue,
}

struct Pool {
    size: usize,
    count: usize,
    state: Critical<PoolState>,
}

impl Pool {
    fn new(class: PoolClass, guarded: bool) -> Self {
        let mut bufs: Vec<PacketBuf> = (0..class.count)
            .map(|_| PacketBuf::new(class.size, guarded))
            .collect();
        let mut free = Queue::new();
        for slot in 0..class.count {
            free.add(bufs.as_mut_slice(), slot);
        }
        Self {
            size: class.size,
            count: class.count,
            state: Critical::new(PoolState { bufs, free }),
        }
    }

    fn take(&self, reserve: usize) -> Option<usize> {
        self.state.enter(|st| {
            let slot = st.free.try_remove_first(st.bufs.as_mut_slice())?;
            st.bufs[slot].reset(reserve);
            Some(slot)
        })
    }
}

/// Fixed set of packet pools shared by every protocol layer.
pub struct PacketAllocator {
    pools: Vec<Pool>,
    reserve: usize,
    stats: AllocStats,
}

impl PacketAllocator {
    pub fn new(config: &AllocatorConfig) -> Result<Self, PoolError> {
        let classes = &config.classes;
        let first = classes.first().ok_or(PoolError::NoClasses)?;
        if config.header_reserve >= first.size {
            return Err(PoolError::ReserveTooLarge {
                reserve: config.header_reserve,
                smallest: first.size,
            });
        }
        for (index, class) in classes.iter().enumerate() {
            if class.count == 0 {
                return Err(PoolError::EmptyClass { index });
            }
            if class.count > u16::MAX as usize {
                return Err(PoolError::TooManyBuffers {
                    index,
                    count: class.count,
                });
            }
        }
        for pair in classes.windows(2) {
            if pair[1].size <= pair[0].size {
                return Err(PoolError::UnorderedClasses {
                    prev: pair[0].size,
                    next: pair[1].size,
                });
            }
        }
        if classes.len() > u8::MAX as usize {
            return Err(PoolError::TooManyBuffers {
                index: u8::MAX as usize,
                count: classes.len(),
            });
        }

        let guarded = config.guard_words || cfg!(feature = "guard-words");
        let pools = classes.iter().map(|c| Pool::new(*c, guarded)).collect();

        Ok(Self {
            pools,
            reserve: config.header_reserve,
            stats: AllocStats::new(),
        })
    }

    /// Hands out a buffer of at least `size` bytes, or `None` when every
    /// eligible pool is empty. Never blocks.
    pub fn alloc(&self, size: usize) -> Option<Packet> {
        if let Some(first) = self.pools.iter().position(|p| p.size >= size) {
            for (index, pool) in self.pools.iter().enumerate().skip(first) {
                if let Some(slot) = pool.take(self.reserve) {
                    self.stats.inc_allocations();
                    if index != first {
                        self.stats.inc_fallthroughs();
                    }
                    trace!(size, pool = pool.size, slot, "packet allocated");
                    return Some(Packet {
                        pool: index as u8,
                        slot: slot as u16,
                    });
                }
            }
        }

        self.stats.inc_failures();
        warn!(
            size,
            failures = self.stats.snapshot().failures,
            "packet pools exhausted"
        );
        None
    }

    /// Adds an owner to `packet` and returns that owner's handle.
    pub fn share(&self, packet: &Packet) -> Packet {
        let pool = self.pool(packet);
        pool.state.enter(|st| {
            let count = st.bufs[packet.slot()].use_count_mut();
            assert!(*count > 0, "share of a free packet (pool {}, slot {})", packet.pool, packet.slot);
            *count += 1;
        });
        self.stats.inc_shares();
        Packet {
            pool: packet.pool,
            slot: packet.slot,
        }
    }

    /// Drops one owner; the last one returns the buffer to its pool.
    ///
    /// # Panics
    ///
    /// On a release of a free buffer, a buffer whose size matches no pool
    /// class or, with guard words enabled, a buffer whose sentinels were
    /// overwritten.
    pub fn release(&self, packet: Packet) {
        let pool = self.pool(&packet);
        let slot = packet.slot();
        let freed = pool.state.enter(|st| {
            let buf = &mut st.bufs[slot];
            let count = buf.use_count_mut();
            assert!(*count > 0, "double release (pool {}, slot {slot})", packet.pool);
            *count -= 1;
            if *count > 0 {
                return false;
            }

            let class = self.pools.iter().position(|p| p.size == buf.capacity());
            assert_eq!(
                class,
                Some(packet.pool()),
                "released buffer of {} bytes matches no pool class",
                buf.capacity()
            );
            assert!(
                buf.guards_intact(),
                "buffer overrun detected (pool {}, slot {slot})",
                packet.pool
            );
            st.free.add(st.bufs.as_mut_slice(), slot);
            true
        });

        if freed {
            self.stats.inc_releases();
            trace!(pool = pool.size, slot, "packet returned to pool");
        }
    }

    /// Locks the packet's pool and exposes its buffer.
    ///
    /// The guard holds the pool's critical section: drop it before calling
    /// `alloc`, `share` or `release` on a packet of the same pool.
    pub fn buf(&self, packet: &Packet) -> MappedMutexGuard<'_, PacketBuf> {
        let slot = packet.slot();
        self.pool(packet).state.project(move |st| &mut st.bufs[slot])
    }

    #[inline]
    pub fn use_count(&self, packet: &Packet) -> u32 {
        self.buf(packet).use_count()
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Buffer size of pool `index`.
    pub fn pool_size(&self, index: usize) -> Option<usize> {
        self.pools.get(index).map(|p| p.size)
    }

    /// Free buffers currently in pool `index`.
    pub fn free_count(&self, index: usize) -> usize {
        self.pools
            .get(index)
            .map_or(0, |p| p.state.enter(|st| st.free.len()))
    }

    pub fn total_buffers(&self) -> usize {
        self.pools.iter().map(|p| p.count).sum()
    }

    pub fn header_reserve(&self) -> usize {
        self.reserve
    }

    pub fn stats(&self) -> AllocStatsSnapshot {
        self.stats.snapshot()
    }

    fn pool(&self, packet: &Packet) -> &Pool {
        match self.pools.get(packet.pool()) {
            Some(pool) => pool,
            None => panic!("packet names unknown pool {}", packet.pool),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;
    use tracing_test::traced_test;

    fn allocator(classes: &[(usize, usize)]) -> PacketAllocator {
        PacketAllocator::new(&AllocatorConfig {
            classes: classes.iter().map(|&(s, c)| PoolClass::new(s, c)).collect(),
            header_reserve: 16,
            guard_words: true,
        })
        .unwrap()
    }

    #[test]
    fn smallest_fitting_pool_first_then_fallthrough() {
        let alloc = allocator(&[(64, 4), (1536, 2)]);

        let small: Vec<_> = (0..4).map(|_| alloc.alloc(40).unwrap()).collect();
        assert!(small.iter().all(|p| p.pool() == 0));
        assert_eq!(alloc.free_count(0), 0);

        let fifth = alloc.alloc(40).unwrap();
        assert_eq!(fifth.pool(), 1);
        assert_eq!(alloc.stats().fallthroughs, 1);

        let sixth = alloc.alloc(40).unwrap();
        assert_eq!(sixth.pool(), 1);
        assert!(alloc.alloc(40).is_none());

        for p in small.into_iter().chain([fifth, sixth]) {
            alloc.release(p);
        }
        assert_eq!(alloc.free_count(0), 4);
        assert_eq!(alloc.free_count(1), 2);
        assert_eq!(alloc.stats().outstanding(), 0);
    }

    #[test]
    fn oversized_request_fails_without_touching_pools() {
        let alloc = allocator(&[(64, 1)]);
        assert!(alloc.alloc(65).is_none());
        assert_eq!(alloc.free_count(0), 1);
        assert_eq!(alloc.stats().failures, 1);
    }

    #[test]
    fn fresh_packet_is_reset() {
        let alloc = allocator(&[(64, 1)]);
        let p = alloc.alloc(10).unwrap();
        {
            let mut buf = alloc.buf(&p);
            assert!(buf.append(b"stale"));
            buf.set_dest(std::net::Ipv4Addr::new(10, 0, 0, 1));
        }
        alloc.release(p);

        let p = alloc.alloc(10).unwrap();
        {
            let buf = alloc.buf(&p);
            assert_eq!(buf.use_count(), 1);
            assert_eq!(buf.offset(), 16);
            assert_eq!(buf.len(), 0);
            assert!(buf.dest().is_unspecified());
        }
        alloc.release(p);
    }

    #[test]
    fn shared_packet_survives_first_release() {
        let alloc = allocator(&[(64, 1)]);
        let p = alloc.alloc(8).unwrap();
        let q = alloc.share(&p);
        assert_eq!(p, q);
        assert_eq!(alloc.use_count(&p), 2);

        alloc.release(p);
        assert_eq!(alloc.free_count(0), 0);
        assert_eq!(alloc.use_count(&q), 1);

        alloc.release(q);
        assert_eq!(alloc.free_count(0), 1);
    }

    #[test]
    #[should_panic(expected = "double release")]
    fn forged_second_release_is_fatal() {
        let alloc = allocator(&[(64, 1)]);
        let p = alloc.alloc(8).unwrap();
        let forged = Packet { pool: 0, slot: 0 };
        alloc.release(p);
        alloc.release(forged);
    }

    #[test]
    #[should_panic(expected = "buffer overrun")]
    fn corrupted_guard_is_fatal() {
        let alloc = allocator(&[(64, 1)]);
        let p = alloc.alloc(8).unwrap();
        alloc.buf(&p).scribble_tail_guard();
        alloc.release(p);
    }

    #[test]
    fn rejects_bad_layouts() {
        let cfg = |classes: Vec<PoolClass>, reserve| AllocatorConfig {
            classes,
            header_reserve: reserve,
            guard_words: false,
        };
        assert!(matches!(
            PacketAllocator::new(&cfg(vec![], 0)),
            Err(PoolError::NoClasses)
        ));
        assert!(matches!(
            PacketAllocator::new(&cfg(vec![PoolClass::new(64, 1), PoolClass::new(64, 1)], 0)),
            Err(PoolError::UnorderedClasses { .. })
        ));
        assert!(matches!(
            PacketAllocator::new(&cfg(vec![PoolClass::new(64, 0)], 0)),
            Err(PoolError::EmptyClass { index: 0 })
        ));
        assert!(matches!(
            PacketAllocator::new(&cfg(vec![PoolClass::new(32, 1)], 34)),
            Err(PoolError::ReserveTooLarge { .. })
        ));
    }

    #[traced_test]
    #[test]
    fn exhaustion_is_reported() {
        let alloc = allocator(&[(64, 1)]);
        let p = alloc.alloc(1).unwrap();
        assert!(alloc.alloc(1).is_none());
        assert!(logs_contain("packet pools exhausted"));
        alloc.release(p);
    }

    #[test]
    fn release_from_completion_thread() {
        let alloc = Arc::new(allocator(&[(64, 8)]));
        let packets: Vec<_> = (0..8).map(|_| alloc.alloc(1).unwrap()).collect();

        let completer = {
            let alloc = Arc::clone(&alloc);
            thread::spawn(move || {
                for p in packets {
                    alloc.release(p);
                }
            })
        };
        completer.join().unwrap();
        assert_eq!(alloc.free_count(0), 8);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Alloc(usize),
        Share(usize),
        Release(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1usize..1600).prop_map(Op::Alloc),
            any::<usize>().prop_map(Op::Share),
            any::<usize>().prop_map(Op::Release),
        ]
    }

    proptest! {
        #[test]
        fn buffers_are_either_free_or_owned(ops in proptest::collection::vec(op(), 0..64)) {
            let alloc = allocator(&[(64, 4), (256, 2), (1536, 2)]);
            let mut held: Vec<Packet> = Vec::new();

            for op in ops {
                match op {
                    Op::Alloc(size) => {
                        if let Some(p) = alloc.alloc(size) {
                            prop_assert!(alloc.pool_size(p.pool()).unwrap() >= size);
                            held.push(p);
                        }
                    }
                    Op::Share(i) if !held.is_empty() => {
                        let p = alloc.share(&held[i % held.len()]);
                        held.push(p);
                    }
                    Op::Release(i) if !held.is_empty() => {
                        let p = held.swap_remove(i % held.len());
                        alloc.release(p);
                    }
                    _ => {}
                }

                // Every slot is on exactly one free list or held by at least one owner.
                let mut owned = std::collections::HashSet::new();
                for p in &held {
                    prop_assert!(alloc.use_count(p) >= 1);
                    owned.insert((p.pool(), p.slot()));
                }
                let free: usize = (0..alloc.pool_count()).map(|i| alloc.free_count(i)).sum();
                prop_assert_eq!(free + owned.len(), alloc.total_buffers());
            }

            for p in held {
                alloc.release(p);
            }
            prop_assert_eq!(alloc.stats().outstanding(), 0);
        }
    }
}
