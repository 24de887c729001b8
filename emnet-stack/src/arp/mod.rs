//! ## emnet-stack::arp
//! **Address resolution and conflict detection**
//!
//! ### Key Submodules:
//! - `table`: resolution rows, pending packets, timers and statistics
//! - `acd`: probe / announce / defend state machine for a claimed address

pub mod acd;
pub mod table;

pub use acd::{AcdAction, AcdEvent, AcdMachine, AcdPhase, AcdPolicy, ConflictResponse, DefaultPolicy};
pub use table::{ArpEntry, ArpStats, ArpStatus, ArpTable, EntryState};

use emnet_core::alloc::PacketAllocator;
use emnet_protocols::ethernet::{ETHERTYPE_ARP, ETH_HEADER_LEN};
use emnet_protocols::{ArpPacket, MacAddr, ARP_PACKET_LEN};

use crate::error::NetError;
use crate::iface::Interface;

/// Builds one ARP frame in a fresh packet and transmits it.
pub(crate) fn emit(
    alloc: &PacketAllocator,
    iface: &Interface,
    arp: &ArpPacket,
    dest: MacAddr,
) -> Result<(), NetError> {
    let packet = alloc
        .alloc(ETH_HEADER_LEN + ARP_PACKET_LEN)
        .ok_or(NetError::NoBuffer)?;
    let written = {
        let mut buf = alloc.buf(&packet);
        let ok = match buf.put_tail(ARP_PACKET_LEN) {
            Some(room) => arp.write(room).is_ok(),
            None => false,
        };
        ok
    };
    if !written {
        alloc.release(packet);
        return Err(NetError::NoBuffer);
    }
    iface.transmit(alloc, packet, dest, ETHERTYPE_ARP)
}
