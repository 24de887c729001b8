//! ## emnet-stack::link
//! **In-memory link driver**
//!
//! [`SimLink`] copies each transmitted frame out of its packet, releases the
//! packet and records the bytes. A [`SimTap`] shares the record so tests and
//! the simulator can inspect frames or carry them to another stack.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use emnet_core::alloc::{Packet, PacketAllocator};
use emnet_protocols::ethernet::{EthernetHeader, ETHERTYPE_ARP};
use emnet_protocols::{ArpPacket, MacAddr, ETH_HEADER_LEN};
use parking_lot::Mutex;

use crate::error::LinkError;
use crate::iface::LinkDriver;

/// Standard Ethernet payload limit plus header.
pub const SIM_MTU: usize = 1514;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub dest: MacAddr,
    pub bytes: Vec<u8>,
}

impl Frame {
    pub fn ethernet(&self) -> Option<EthernetHeader> {
        EthernetHeader::parse(&self.bytes).ok()
    }

    /// Decoded ARP payload, if this is an ARP frame.
    pub fn arp(&self) -> Option<ArpPacket> {
        let eth = self.ethernet()?;
        if eth.ethertype != ETHERTYPE_ARP {
            return None;
        }
        ArpPacket::parse(&self.bytes[ETH_HEADER_LEN..]).ok()
    }

    pub fn payload(&self) -> &[u8] {
        self.bytes.get(ETH_HEADER_LEN..).unwrap_or(&[])
    }
}

#[derive(Default)]
struct Shared {
    frames: Mutex<VecDeque<Frame>>,
    fail_next: AtomicUsize,
}

pub struct SimLink {
    alloc: Arc<PacketAllocator>,
    shared: Arc<Shared>,
}

#[derive(Clone)]
pub struct SimTap {
    shared: Arc<Shared>,
}

impl SimLink {
    pub fn new(alloc: Arc<PacketAllocator>) -> (Self, SimTap) {
        let shared = Arc::new(Shared::default());
        let tap = SimTap {
            shared: shared.clone(),
        };
        (Self { alloc, shared }, tap)
    }
}

impl LinkDriver for SimLink {
    fn send_frame(&self, dest: MacAddr, packet: Packet) -> Result<(), LinkError> {
        if self
            .shared
            .fail_next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
        {
            self.alloc.release(packet);
            return Err(LinkError::Busy);
        }

        let bytes = self.alloc.buf(&packet).payload().to_vec();
        self.alloc.release(packet);
        if bytes.len() > SIM_MTU {
            return Err(LinkError::FrameTooLarge {
                len: bytes.len(),
                mtu: SIM_MTU,
            });
        }
        self.shared.frames.lock().push_back(Frame { dest, bytes });
        Ok(())
    }
}

impl SimTap {
    pub fn len(&self) -> usize {
        self.shared.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and returns every recorded frame, oldest first.
    pub fn drain(&self) -> Vec<Frame> {
        self.shared.frames.lock().drain(..).collect()
    }

    pub fn pop(&self) -> Option<Frame> {
        self.shared.frames.lock().pop_front()
    }

    /// Makes the next `n` transmissions fail with [`LinkError::Busy`].
    pub fn fail_next(&self, n: usize) {
        self.shared.fail_next.store(n, Ordering::Release);
    }
}
