//! ## emnet-stack::stack
//! **The network context and its lock**
//!
//! All task-context state (interfaces, ARP table, ACD machine, IP output
//! counters) lives in one [`NetContext`] behind one `parking_lot::Mutex`.
//! Every public operation on [`NetStack`] takes that lock for its whole
//! duration. Packet buffers are guarded separately by the allocator's own
//! critical sections, so drivers may release from any thread while the
//! context lock is held elsewhere.
//!
//! ### Expectations (Production):
//! - No operation waits on I/O or sleeps while holding the lock
//! - Every packet handed in is either transmitted, parked on an ARP row or
//!   released before the call returns

use std::net::Ipv4Addr;
use std::sync::Arc;

use emnet_config::{AcdConfig, ArpConfig, EmnetConfig, IpConfig, PoolsConfig};
use emnet_core::alloc::{AllocatorConfig, IfaceId, Packet, PacketAllocator, PoolClass};
use emnet_core::time::Clock;
use emnet_protocols::ethernet::{EthernetHeader, ETHERTYPE_ARP, ETH_HEADER_LEN};
use emnet_protocols::{ArpPacket, MacAddr};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, trace, warn};

use crate::arp::{
    emit, AcdAction, AcdEvent, AcdMachine, AcdPhase, AcdPolicy, ArpStats, ArpStatus, ArpTable,
    ConflictResponse, EntryState,
};
use crate::error::{NetError, SetupError};
use crate::iface::{Interface, LinkDriver};
use crate::ip::{Delivery, IpOutput, IpStats};

/// Allocator layout for a configured pool section.
pub fn allocator_config(pools: &PoolsConfig) -> AllocatorConfig {
    AllocatorConfig {
        classes: pools
            .classes
            .iter()
            .map(|c| PoolClass::new(c.size, c.count))
            .collect(),
        header_reserve: pools.header_reserve,
        guard_words: pools.guard_words,
    }
}

pub struct NetContext {
    ifaces: Vec<Interface>,
    arp: ArpTable,
    acd: AcdMachine,
    ip: IpOutput,
}

impl NetContext {
    fn iface_index(&self, id: Option<IfaceId>) -> Result<usize, NetError> {
        let index = id.map_or(0, |id| id.0 as usize);
        if index < self.ifaces.len() {
            Ok(index)
        } else {
            Err(NetError::UnknownInterface(id.unwrap_or(IfaceId(0))))
        }
    }

    fn arp_input(&mut self, alloc: &PacketAllocator, index: usize, arp: ArpPacket, now: u64) {
        let id = self.ifaces[index].id;

        // ACD sees ARP on its interface first and consumes conflicts.
        if self.acd.phase() != AcdPhase::Idle && self.acd.iface() == id {
            let actions = self.acd.step(AcdEvent::Arp(arp), now);
            if !actions.is_empty() {
                self.run_acd(alloc, actions);
                return;
            }
        }

        let iface = &self.ifaces[index];
        if iface.has_address() && arp.sender_ip == iface.addr && arp.sender_hw != iface.mac {
            self.arp.stats.conflicts += 1;
            warn!(iface = %id, addr = %iface.addr, from = %arp.sender_hw, "address conflict on unmanaged address");
            return;
        }

        if let Err(err) = self.arp.input(alloc, iface, &arp, now) {
            debug!(iface = %id, %err, "ARP input incomplete");
        }
    }

    fn run_acd(&mut self, alloc: &PacketAllocator, actions: Vec<AcdAction>) {
        for action in actions {
            match action {
                AcdAction::Probe { iface, candidate } => {
                    if let Some(i) = self.ifaces.get(iface.0 as usize) {
                        self.arp.stats.probes += 1;
                        let probe = ArpPacket::probe(i.mac, candidate);
                        if let Err(err) = emit(alloc, i, &probe, MacAddr::BROADCAST) {
                            warn!(%iface, %candidate, %err, "ACD probe not sent");
                        }
                    }
                }
                AcdAction::Announce { iface, addr } => {
                    if let Some(i) = self.ifaces.get(iface.0 as usize) {
                        self.arp.stats.announcements += 1;
                        let announcement = ArpPacket::announcement(i.mac, addr);
                        if let Err(err) = emit(alloc, i, &announcement, MacAddr::BROADCAST) {
                            warn!(%iface, %addr, %err, "ACD announcement not sent");
                        }
                    }
                }
                AcdAction::Configure { iface, addr } => {
                    if let Some(i) = self.ifaces.get_mut(iface.0 as usize) {
                        info!(%iface, %addr, "interface address configured");
                        i.addr = addr;
                    }
                }
                AcdAction::Conflict { response, .. } => {
                    self.arp.stats.conflicts += 1;
                    match response {
                        ConflictResponse::Defend => self.arp.stats.defends += 1,
                        ConflictResponse::Suppress => self.arp.stats.suppressed += 1,
                        ConflictResponse::Renew | ConflictResponse::Abandon => {}
                    }
                }
                AcdAction::Abandoned { iface, addr } => {
                    if let Some(i) = self.ifaces.get_mut(iface.0 as usize) {
                        if i.addr == addr {
                            warn!(%iface, %addr, "interface address withdrawn");
                            i.addr = Ipv4Addr::UNSPECIFIED;
                        }
                    }
                }
            }
        }
    }
}

/// One network context: allocator, clock and the locked protocol state.
pub struct NetStack {
    alloc: Arc<PacketAllocator>,
    clock: Arc<dyn Clock>,
    ctx: Mutex<NetContext>,
}

impl NetStack {
    pub fn new(
        alloc: Arc<PacketAllocator>,
        clock: Arc<dyn Clock>,
        ifaces: Vec<Interface>,
        arp: &ArpConfig,
        acd: &AcdConfig,
        ip: &IpConfig,
    ) -> Self {
        Self {
            alloc,
            clock,
            ctx: Mutex::new(NetContext {
                ifaces,
                arp: ArpTable::new(arp),
                acd: AcdMachine::new(acd),
                ip: IpOutput::new(ip),
            }),
        }
    }

    /// Builds the stack for `config`. `drivers[i]` serves `config.interfaces[i]`.
    pub fn from_config(
        config: &EmnetConfig,
        alloc: Arc<PacketAllocator>,
        clock: Arc<dyn Clock>,
        drivers: Vec<Box<dyn LinkDriver>>,
    ) -> Result<Self, SetupError> {
        if drivers.len() != config.interfaces.len() {
            return Err(SetupError::DriverCount {
                interfaces: config.interfaces.len(),
                drivers: drivers.len(),
            });
        }
        if config.interfaces.len() > u8::MAX as usize {
            return Err(SetupError::TooManyInterfaces(config.interfaces.len()));
        }

        let ifaces = config
            .interfaces
            .iter()
            .zip(drivers)
            .enumerate()
            .map(|(index, (iface, driver))| Interface::from_config(IfaceId(index as u8), iface, driver))
            .collect::<Result<Vec<_>, _>>()?;

        for iface in &ifaces {
            info!(iface = %iface.id, name = %iface.name, addr = %iface.addr, mac = %iface.mac, "interface up");
        }

        Ok(Self::new(alloc, clock, ifaces, &config.arp, &config.acd, &config.ip))
    }

    pub fn allocator(&self) -> &Arc<PacketAllocator> {
        &self.alloc
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Sends an IPv4 datagram to `dest` on the packet's interface (or the
    /// first one), resolving `dest` through ARP.
    pub fn arp_send(&self, packet: Packet, dest: Ipv4Addr) -> Result<ArpStatus, NetError> {
        let now = self.now_ms();
        let iface = self.alloc.buf(&packet).iface();
        let mut ctx = self.ctx.lock();
        let index = match ctx.iface_index(iface) {
            Ok(index) => index,
            Err(err) => {
                self.alloc.release(packet);
                return Err(err);
            }
        };
        let NetContext { ifaces, arp, .. } = &mut *ctx;
        arp.send(&self.alloc, &ifaces[index], packet, dest, now)
    }

    /// True once `ip` is resolved.
    pub fn arp_has_entry(&self, ip: Ipv4Addr) -> bool {
        self.ctx.lock().arp.has_entry(ip)
    }

    pub fn arp_entry(&self, ip: Ipv4Addr) -> Option<(EntryState, MacAddr)> {
        self.ctx.lock().arp.entry(ip).map(|e| (e.state(), e.hw()))
    }

    pub fn arp_send_request(&self, iface: IfaceId, ip: Ipv4Addr) -> Result<(), NetError> {
        let now = self.now_ms();
        let mut ctx = self.ctx.lock();
        let index = ctx.iface_index(Some(iface))?;
        let NetContext { ifaces, arp, .. } = &mut *ctx;
        arp.send_request(&self.alloc, &ifaces[index], ip, now)
    }

    /// Prepends an IPv4 header for `protocol` and sends the datagram towards
    /// the packet's `dest`. The packet is consumed on every path.
    pub fn ip_write(&self, protocol: u8, packet: Packet) -> Result<Delivery, NetError> {
        let now = self.now_ms();
        let iface = self.alloc.buf(&packet).iface();
        let mut ctx = self.ctx.lock();
        let index = match ctx.iface_index(iface) {
            Ok(index) => index,
            Err(err) => {
                self.alloc.release(packet);
                return Err(err);
            }
        };
        let NetContext { ifaces, arp, ip, .. } = &mut *ctx;
        ip.write(&self.alloc, &ifaces[index], arp, protocol, packet, now)
    }

    /// Receive path: `packet` holds one Ethernet frame from `iface`.
    ///
    /// ARP is processed; every other ethertype belongs to layers outside
    /// this stack and is dropped. The packet is always released.
    #[instrument(level = "trace", skip_all, fields(%iface))]
    pub fn on_frame_received(&self, iface: IfaceId, packet: Packet) {
        let now = self.now_ms();
        let frame = {
            let buf = self.alloc.buf(&packet);
            let bytes = buf.payload();
            let parsed = EthernetHeader::parse(bytes)
                .ok()
                .map(|eth| (eth, ArpPacket::parse(bytes.get(ETH_HEADER_LEN..).unwrap_or(&[]))));
            parsed
        };
        self.alloc.release(packet);

        let Some((eth, arp)) = frame else {
            trace!("runt frame dropped");
            return;
        };
        if eth.ethertype != ETHERTYPE_ARP {
            trace!(ethertype = eth.ethertype, "frame not for this layer");
            return;
        }

        let mut ctx = self.ctx.lock();
        let Ok(index) = ctx.iface_index(Some(iface)) else {
            warn!("frame from unknown interface");
            return;
        };
        let mac = ctx.ifaces[index].mac;
        if eth.dst != mac && !eth.dst.is_broadcast() {
            return;
        }

        ctx.arp.stats.received += 1;
        match arp {
            Ok(arp) => ctx.arp_input(&self.alloc, index, arp, now),
            Err(err) => {
                ctx.arp.stats.malformed += 1;
                debug!(%err, "malformed ARP payload");
            }
        }
    }

    /// Drives ARP expiry and ACD probing. Call every
    /// [`TICK_MS`](emnet_core::time::TICK_MS).
    pub fn periodic_timer(&self) {
        let now = self.now_ms();
        let mut ctx = self.ctx.lock();
        ctx.arp.periodic_timer(&self.alloc, now);
        let actions = ctx.acd.step(AcdEvent::Tick, now);
        ctx.run_acd(&self.alloc, actions);
    }

    /// `policy: None` keeps the current policy.
    pub fn acd_config(
        &self,
        probe_count: u32,
        defend_interval_ms: u64,
        policy: Option<Box<dyn AcdPolicy>>,
    ) {
        self.ctx
            .lock()
            .acd
            .configure(probe_count, defend_interval_ms, policy);
    }

    /// Starts probing for `candidate` on `iface`; the first probe goes out
    /// immediately. If the interface was already bound to `candidate` it is
    /// unbound until the claim succeeds.
    #[instrument(skip(self))]
    pub fn acd_start(&self, iface: IfaceId, candidate: Ipv4Addr) -> Result<(), NetError> {
        if candidate.is_unspecified() || candidate.is_broadcast() || candidate.is_multicast() {
            return Err(NetError::InvalidAddress(candidate));
        }
        let now = self.now_ms();
        let mut ctx = self.ctx.lock();
        let index = ctx.iface_index(Some(iface))?;
        let mac = ctx.ifaces[index].mac;
        // The candidate is not ours until the claim completes: no replies for
        // it and no datagrams sourced from it while probing.
        if ctx.ifaces[index].addr == candidate {
            debug!(%iface, %candidate, "address held back until claimed");
            ctx.ifaces[index].addr = Ipv4Addr::UNSPECIFIED;
        }
        let actions = ctx.acd.step(
            AcdEvent::Start {
                iface,
                mac,
                candidate,
            },
            now,
        );
        ctx.run_acd(&self.alloc, actions);
        Ok(())
    }

    pub fn acd_phase(&self) -> AcdPhase {
        self.ctx.lock().acd.phase()
    }

    pub fn interface_addr(&self, iface: IfaceId) -> Option<Ipv4Addr> {
        self.ctx
            .lock()
            .ifaces
            .get(iface.0 as usize)
            .map(|i| i.addr)
    }

    pub fn interface_mac(&self, iface: IfaceId) -> Option<MacAddr> {
        self.ctx
            .lock()
            .ifaces
            .get(iface.0 as usize)
            .map(|i| i.mac)
    }

    pub fn arp_stats(&self) -> ArpStats {
        self.ctx.lock().arp.stats()
    }

    pub fn ip_stats(&self) -> IpStats {
        self.ctx.lock().ip.stats()
    }

    /// Allocator, ARP and IP counters as `(name, value)` pairs.
    pub fn counters(&self) -> Vec<(&'static str, u64)> {
        let alloc = self.alloc.stats();
        let (arp, ip) = {
            let ctx = self.ctx.lock();
            (ctx.arp.stats(), ctx.ip.stats())
        };
        let mut out = vec![
            ("pool_allocations", alloc.allocations),
            ("pool_releases", alloc.releases),
            ("pool_shares", alloc.shares),
            ("pool_failures", alloc.failures),
            ("pool_fallthroughs", alloc.fallthroughs),
        ];
        out.extend(arp.counters());
        out.extend(ip.counters());
        out
    }
}

impl Drop for NetStack {
    fn drop(&mut self) {
        self.ctx.get_mut().arp.clear(&self.alloc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emnet_core::time::VirtualClock;

    use crate::link::SimLink;

    #[test]
    fn from_config_checks_driver_count() {
        let config = EmnetConfig::default();
        let alloc = Arc::new(PacketAllocator::new(&allocator_config(&config.pools)).unwrap());
        let err = NetStack::from_config(&config, alloc, Arc::new(VirtualClock::new(0)), Vec::new())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            SetupError::DriverCount {
                interfaces: 1,
                drivers: 0
            }
        ));
    }

    #[test]
    fn from_config_binds_interfaces_in_order() {
        let config = EmnetConfig::default();
        let alloc = Arc::new(PacketAllocator::new(&allocator_config(&config.pools)).unwrap());
        let (link, _tap) = SimLink::new(alloc.clone());
        let stack = NetStack::from_config(
            &config,
            alloc,
            Arc::new(VirtualClock::new(0)),
            vec![Box::new(link)],
        )
        .unwrap();
        assert_eq!(
            stack.interface_addr(IfaceId(0)),
            Some(Ipv4Addr::new(192, 168, 1, 10))
        );
        assert_eq!(stack.interface_addr(IfaceId(1)), None);
    }

    #[test]
    fn unknown_interface_releases_packet() {
        let config = EmnetConfig::default();
        let alloc = Arc::new(PacketAllocator::new(&allocator_config(&config.pools)).unwrap());
        let (link, _tap) = SimLink::new(alloc.clone());
        let stack = NetStack::from_config(
            &config,
            alloc.clone(),
            Arc::new(VirtualClock::new(0)),
            vec![Box::new(link)],
        )
        .unwrap();

        let packet = alloc.alloc(10).unwrap();
        alloc.buf(&packet).set_iface(Some(IfaceId(3)));
        assert_eq!(
            stack.ip_write(17, packet),
            Err(NetError::UnknownInterface(IfaceId(3)))
        );
        assert_eq!(alloc.stats().outstanding(), 0);
    }

    #[test]
    fn acd_rejects_group_candidates() {
        let config = EmnetConfig::default();
        let alloc = Arc::new(PacketAllocator::new(&allocator_config(&config.pools)).unwrap());
        let (link, tap) = SimLink::new(alloc.clone());
        let stack = NetStack::from_config(
            &config,
            alloc,
            Arc::new(VirtualClock::new(0)),
            vec![Box::new(link)],
        )
        .unwrap();
        let group = Ipv4Addr::new(224, 0, 0, 1);
        assert_eq!(
            stack.acd_start(IfaceId(0), group),
            Err(NetError::InvalidAddress(group))
        );
        assert!(tap.is_empty());
    }
}
