//! ## emnet-stack::arp::table
//! **Fixed-size IPv4 to Ethernet resolution table**
//!
//! Rows move `Free -> Pending -> Resolved -> Free`. A pending row holds at
//! most one packet; it is transmitted when the reply arrives and released
//! when the row times out or is evicted.

use std::net::Ipv4Addr;

use emnet_config::ArpConfig;
use emnet_core::alloc::{IfaceId, Packet, PacketAllocator};
use emnet_protocols::ethernet::ETHERTYPE_IPV4;
use emnet_protocols::{ArpOp, ArpPacket, MacAddr};
use tracing::{debug, trace, warn};

use super::emit;
use crate::error::NetError;
use crate::iface::Interface;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Free,
    /// Request sent, no reply yet.
    Pending,
    Resolved,
}

/// Outcome of [`ArpTable::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpStatus {
    /// Frame handed to the link driver.
    Sent,
    /// Packet parked on the entry until the reply arrives.
    Pending,
    /// Another packet is already waiting for this address; the new one was
    /// released.
    Dropped,
}

#[derive(Debug)]
pub struct ArpEntry {
    ip: Option<Ipv4Addr>,
    hw: MacAddr,
    iface: IfaceId,
    pending: Option<Packet>,
    created_ms: u64,
    queued_ms: u64,
    last_used_ms: u64,
}

impl ArpEntry {
    const fn free() -> Self {
        Self {
            ip: None,
            hw: MacAddr::ZERO,
            iface: IfaceId(0),
            pending: None,
            created_ms: 0,
            queued_ms: 0,
            last_used_ms: 0,
        }
    }

    pub fn state(&self) -> EntryState {
        match self.ip {
            None => EntryState::Free,
            Some(_) if self.hw.is_zero() => EntryState::Pending,
            Some(_) => EntryState::Resolved,
        }
    }

    pub fn ip(&self) -> Option<Ipv4Addr> {
        self.ip
    }

    pub fn hw(&self) -> MacAddr {
        self.hw
    }

    pub fn iface(&self) -> IfaceId {
        self.iface
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn created_ms(&self) -> u64 {
        self.created_ms
    }

    pub fn last_used_ms(&self) -> u64 {
        self.last_used_ms
    }

    /// Start of the pending timeout: when the queued packet was parked, or
    /// when the row was created if nothing is queued.
    pub fn waiting_since(&self) -> u64 {
        if self.pending.is_some() {
            self.queued_ms
        } else {
            self.created_ms
        }
    }

    fn park(&mut self, packet: Packet, now: u64) {
        self.pending = Some(packet);
        self.queued_ms = now;
        self.last_used_ms = now;
    }

    fn occupy(&mut self, ip: Ipv4Addr, iface: IfaceId, now: u64) {
        self.ip = Some(ip);
        self.hw = MacAddr::ZERO;
        self.iface = iface;
        self.created_ms = now;
        self.last_used_ms = now;
    }

    fn vacate(&mut self, alloc: &PacketAllocator) {
        if let Some(packet) = self.pending.take() {
            alloc.release(packet);
        }
        *self = Self::free();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArpStats {
    pub sent: u64,
    pub pending: u64,
    pub drops: u64,
    pub timeouts: u64,
    pub age_outs: u64,
    pub evictions: u64,
    pub requests: u64,
    pub replies: u64,
    pub received: u64,
    pub malformed: u64,
    pub conflicts: u64,
    pub defends: u64,
    pub suppressed: u64,
    pub probes: u64,
    pub announcements: u64,
}

impl ArpStats {
    /// `(name, value)` pairs for export.
    pub fn counters(&self) -> [(&'static str, u64); 15] {
        [
            ("arp_sent", self.sent),
            ("arp_pending", self.pending),
            ("arp_drops", self.drops),
            ("arp_timeouts", self.timeouts),
            ("arp_age_outs", self.age_outs),
            ("arp_evictions", self.evictions),
            ("arp_requests", self.requests),
            ("arp_replies", self.replies),
            ("arp_received", self.received),
            ("arp_malformed", self.malformed),
            ("acd_conflicts", self.conflicts),
            ("acd_defends", self.defends),
            ("acd_suppressed", self.suppressed),
            ("acd_probes", self.probes),
            ("acd_announcements", self.announcements),
        ]
    }
}

pub struct ArpTable {
    entries: Vec<ArpEntry>,
    age_out_ms: u64,
    pending_timeout_ms: u64,
    idle_before_age_out_ms: u64,
    pub(crate) stats: ArpStats,
}

impl ArpTable {
    pub fn new(config: &ArpConfig) -> Self {
        Self {
            entries: (0..config.table_size.max(1)).map(|_| ArpEntry::free()).collect(),
            age_out_ms: config.age_out_ms,
            pending_timeout_ms: config.pending_timeout_ms,
            idle_before_age_out_ms: config.idle_before_age_out_ms,
            stats: ArpStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ArpEntry> {
        self.entries.iter()
    }

    pub fn entry(&self, ip: Ipv4Addr) -> Option<&ArpEntry> {
        self.find(ip).map(|i| &self.entries[i])
    }

    /// Resolved entries only.
    pub fn has_entry(&self, ip: Ipv4Addr) -> bool {
        self.lookup(ip).is_some()
    }

    pub fn lookup(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.entry(ip)
            .filter(|e| e.state() == EntryState::Resolved)
            .map(|e| e.hw)
    }

    pub fn stats(&self) -> ArpStats {
        self.stats
    }

    fn find(&self, ip: Ipv4Addr) -> Option<usize> {
        self.entries.iter().position(|e| e.ip == Some(ip))
    }

    /// Picks a row for `ip` in one pass: the row already holding `ip`, else
    /// the first free row, else the least recently used one (evicted).
    fn claim(&mut self, alloc: &PacketAllocator, ip: Ipv4Addr, iface: IfaceId, now: u64) -> usize {
        let mut free = None;
        let mut oldest: Option<(usize, u64)> = None;
        for (index, entry) in self.entries.iter().enumerate() {
            match entry.ip {
                Some(held) if held == ip => return index,
                None => {
                    free.get_or_insert(index);
                }
                Some(_) => {
                    if oldest.map_or(true, |(_, used)| entry.last_used_ms < used) {
                        oldest = Some((index, entry.last_used_ms));
                    }
                }
            }
        }

        let index = match (free, oldest) {
            (Some(index), _) => index,
            (None, Some((index, _))) => {
                let victim = &mut self.entries[index];
                debug!(ip = ?victim.ip, hw = %victim.hw, "evicting least recently used ARP entry");
                victim.vacate(alloc);
                self.stats.evictions += 1;
                index
            }
            (None, None) => 0,
        };
        self.entries[index].occupy(ip, iface, now);
        index
    }

    /// Sends `packet` (an IPv4 datagram) to `dest` on `iface`, resolving the
    /// link address first if needed. Consumes `packet` on every path.
    pub fn send(
        &mut self,
        alloc: &PacketAllocator,
        iface: &Interface,
        packet: Packet,
        dest: Ipv4Addr,
        now: u64,
    ) -> Result<ArpStatus, NetError> {
        if let Some(index) = self.find(dest) {
            let entry = &mut self.entries[index];
            return match entry.state() {
                EntryState::Resolved => {
                    entry.last_used_ms = now;
                    let hw = entry.hw;
                    iface.transmit(alloc, packet, hw, ETHERTYPE_IPV4)?;
                    self.stats.sent += 1;
                    Ok(ArpStatus::Sent)
                }
                _ if entry.pending.is_some() => {
                    alloc.release(packet);
                    self.stats.drops += 1;
                    debug!(%dest, "resolution in progress with a packet queued, dropping");
                    Ok(ArpStatus::Dropped)
                }
                _ => {
                    entry.park(packet, now);
                    self.stats.pending += 1;
                    Ok(ArpStatus::Pending)
                }
            };
        }

        let index = self.claim(alloc, dest, iface.id, now);
        self.entries[index].park(packet, now);
        self.stats.pending += 1;
        if let Err(err) = self.request(alloc, iface, dest) {
            // The row stays pending and times out like an unanswered request.
            warn!(%dest, %err, "ARP request not sent");
        }
        Ok(ArpStatus::Pending)
    }

    /// Broadcasts an unsolicited request for `ip`, creating a pending row
    /// without a packet when none exists.
    pub fn send_request(
        &mut self,
        alloc: &PacketAllocator,
        iface: &Interface,
        ip: Ipv4Addr,
        now: u64,
    ) -> Result<(), NetError> {
        if self.find(ip).is_none() {
            self.claim(alloc, ip, iface.id, now);
        }
        self.request(alloc, iface, ip)
    }

    fn request(&mut self, alloc: &PacketAllocator, iface: &Interface, ip: Ipv4Addr) -> Result<(), NetError> {
        let request = ArpPacket::request(iface.mac, iface.addr, ip);
        emit(alloc, iface, &request, MacAddr::BROADCAST)?;
        self.stats.requests += 1;
        trace!(%ip, iface = %iface.id, "ARP request sent");
        Ok(())
    }

    /// Table side of ARP input: completes pending resolutions and answers
    /// requests for the interface's own address.
    pub fn input(
        &mut self,
        alloc: &PacketAllocator,
        iface: &Interface,
        arp: &ArpPacket,
        now: u64,
    ) -> Result<(), NetError> {
        let learnable = !arp.sender_ip.is_unspecified();
        let known = if learnable { self.find(arp.sender_ip) } else { None };

        if let Some(index) = known {
            self.resolve(alloc, iface, index, arp.sender_hw, now)?;
        }

        if arp.op != ArpOp::Request || !iface.has_address() || arp.target_ip != iface.addr {
            return Ok(());
        }

        if learnable && known.is_none() {
            let index = self.claim(alloc, arp.sender_ip, iface.id, now);
            self.resolve(alloc, iface, index, arp.sender_hw, now)?;
        }

        let reply = ArpPacket::reply(iface.mac, iface.addr, arp.sender_hw, arp.sender_ip);
        emit(alloc, iface, &reply, arp.sender_hw)?;
        self.stats.replies += 1;
        trace!(to = %arp.sender_ip, hw = %arp.sender_hw, "ARP reply sent");
        Ok(())
    }

    fn resolve(
        &mut self,
        alloc: &PacketAllocator,
        iface: &Interface,
        index: usize,
        hw: MacAddr,
        now: u64,
    ) -> Result<(), NetError> {
        let entry = &mut self.entries[index];
        let was = entry.state();
        entry.hw = hw;
        entry.iface = iface.id;
        entry.created_ms = now;
        if was == EntryState::Pending {
            debug!(ip = ?entry.ip, %hw, "ARP entry resolved");
        }

        if let Some(packet) = entry.pending.take() {
            entry.last_used_ms = now;
            iface.transmit(alloc, packet, hw, ETHERTYPE_IPV4)?;
            self.stats.sent += 1;
        }
        Ok(())
    }

    /// Expires unanswered requests and ages out idle resolved rows.
    pub fn periodic_timer(&mut self, alloc: &PacketAllocator, now: u64) {
        for entry in self.entries.iter_mut() {
            let age = now.saturating_sub(entry.created_ms);
            let waited = now.saturating_sub(entry.waiting_since());
            match entry.state() {
                EntryState::Free => {}
                EntryState::Pending if waited >= self.pending_timeout_ms => {
                    debug!(ip = ?entry.ip, dropped = entry.has_pending(), "ARP request timed out");
                    entry.vacate(alloc);
                    self.stats.timeouts += 1;
                }
                EntryState::Resolved
                    if age > self.age_out_ms
                        && now.saturating_sub(entry.last_used_ms) >= self.idle_before_age_out_ms =>
                {
                    debug!(ip = ?entry.ip, hw = %entry.hw, "ARP entry aged out");
                    entry.vacate(alloc);
                    self.stats.age_outs += 1;
                }
                _ => {}
            }
        }
    }

    /// Frees every row, releasing queued packets.
    pub fn clear(&mut self, alloc: &PacketAllocator) {
        for entry in self.entries.iter_mut() {
            entry.vacate(alloc);
        }
    }
}
