//! Two hosts sharing one simulated Ethernet segment on a virtual clock.
//!
//! The local host runs the configured stack. Its peer gets the next free
//! address on the same subnet. The run walks through address claiming, a
//! resolved send, a resolution timeout and finally the age-out of the
//! learned neighbour.

use std::net::Ipv4Addr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use emnet_config::EmnetConfig;
use emnet_core::alloc::{IfaceId, Packet, PacketAllocator};
use emnet_core::time::{Clock, VirtualClock, TICK_MS};
use emnet_protocols::ethernet::ETHERTYPE_IPV4;
use emnet_protocols::ipv4::PROTO_UDP;
use emnet_protocols::MacAddr;
use emnet_stack::{allocator_config, AcdPhase, Delivery, NetStack, SimLink, SimTap};
use emnet_telemetry::MetricsRecorder;
use ipnetwork::Ipv4Network;
use tracing::{info, warn};

use crate::commands::SimulateArgs;

const IF0: IfaceId = IfaceId(0);

struct Host {
    name: &'static str,
    stack: NetStack,
    tap: SimTap,
    alloc: Arc<PacketAllocator>,
}

impl Host {
    fn new(name: &'static str, config: &EmnetConfig, clock: &VirtualClock) -> anyhow::Result<Self> {
        let alloc = Arc::new(PacketAllocator::new(&allocator_config(&config.pools))?);
        let mut drivers: Vec<Box<dyn emnet_stack::LinkDriver>> = Vec::new();
        let mut taps = Vec::new();
        for _ in &config.interfaces {
            let (link, tap) = SimLink::new(alloc.clone());
            drivers.push(Box::new(link));
            taps.push(tap);
        }
        let stack = NetStack::from_config(config, alloc.clone(), Arc::new(clock.clone()), drivers)
            .with_context(|| format!("building host {name}"))?;
        let tap = taps
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("host {name} has no interfaces"))?;
        Ok(Self {
            name,
            stack,
            tap,
            alloc,
        })
    }

    fn addr(&self) -> Ipv4Addr {
        self.stack.interface_addr(IF0).unwrap_or(Ipv4Addr::UNSPECIFIED)
    }

    fn datagram(&self, dest: Ipv4Addr, body: &[u8]) -> anyhow::Result<Packet> {
        let packet = self
            .alloc
            .alloc(body.len())
            .ok_or_else(|| anyhow!("{}: no buffer for a {} byte datagram", self.name, body.len()))?;
        let appended = {
            let mut buf = self.alloc.buf(&packet);
            buf.set_dest(dest);
            buf.append(body)
        };
        if !appended {
            self.alloc.release(packet);
            bail!("{}: datagram does not fit its buffer", self.name);
        }
        Ok(packet)
    }

    /// Hands every frame queued on this host's link to `to`. Returns how
    /// many IPv4 frames were among them.
    fn carry_to(&self, to: &Host) -> usize {
        let mut ipv4 = 0;
        for frame in self.tap.drain() {
            if frame.ethernet().map(|eth| eth.ethertype) == Some(ETHERTYPE_IPV4) {
                ipv4 += 1;
            }
            let Some(packet) = to.alloc.alloc(frame.bytes.len()) else {
                warn!(host = to.name, "receive pool exhausted, frame lost");
                continue;
            };
            if to.alloc.buf(&packet).append(&frame.bytes) {
                to.stack.on_frame_received(IF0, packet);
            } else {
                to.alloc.release(packet);
            }
        }
        ipv4
    }
}

struct Segment {
    clock: VirtualClock,
    local: Host,
    peer: Host,
    delivered: usize,
}

impl Segment {
    /// Moves frames both ways until the wire is quiet.
    fn settle(&mut self) {
        while !self.local.tap.is_empty() || !self.peer.tap.is_empty() {
            self.delivered += self.local.carry_to(&self.peer);
            self.peer.carry_to(&self.local);
        }
    }

    fn clock_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    fn clock_seconds(&self) -> u64 {
        self.clock_ms() / TICK_MS
    }

    fn tick(&mut self) {
        self.clock.advance(TICK_MS);
        self.local.stack.periodic_timer();
        self.peer.stack.periodic_timer();
        self.settle();
    }
}

/// Peer address: the next host address on the local subnet.
fn peer_address(net: Ipv4Network, skip: &[Ipv4Addr]) -> Option<Ipv4Addr> {
    let first = u32::from(net.network()).checked_add(1)?;
    let last = u32::from(net.broadcast()).checked_sub(1)?;
    if last < first {
        return None;
    }
    let hosts = last - first + 1;
    let start = u32::from(net.ip()).saturating_sub(first);
    (1..=hosts)
        .map(|step| first + ((start as u64 + step as u64) % hosts as u64) as u32)
        .map(Ipv4Addr::from)
        .find(|addr| !skip.contains(addr))
}

fn peer_config(config: &EmnetConfig, addr: Ipv4Addr) -> anyhow::Result<EmnetConfig> {
    let mut peer = config.clone();
    peer.interfaces.truncate(1);
    let iface = peer
        .interfaces
        .first_mut()
        .context("no interfaces configured")?;
    let mut mac: MacAddr = iface.mac.parse()?;
    mac.0[5] ^= 0xff;
    iface.name = "peer0".into();
    iface.mac = mac.to_string();
    iface.address = Ipv4Network::new(addr, iface.address.prefix())?;
    Ok(peer)
}

pub fn run(config: &EmnetConfig, args: &SimulateArgs) -> anyhow::Result<()> {
    let clock = VirtualClock::new(0);
    let local_net = config
        .interfaces
        .first()
        .map(|iface| iface.address)
        .context("no interfaces configured")?;
    let local_addr = local_net.ip();
    let peer_addr = peer_address(local_net, &[local_addr])
        .ok_or_else(|| anyhow!("subnet {local_net} has no room for a peer"))?;

    let mut seg = Segment {
        local: Host::new("local", config, &clock)?,
        peer: Host::new("peer", &peer_config(config, peer_addr)?, &clock)?,
        clock,
        delivered: 0,
    };

    // Claim the configured address before using it.
    seg.local.stack.acd_start(IF0, local_addr)?;
    seg.settle();
    for _ in 0..=config.acd.probe_count {
        if !matches!(seg.local.stack.acd_phase(), AcdPhase::Probing { .. }) {
            break;
        }
        seg.tick();
    }
    match seg.local.stack.acd_phase() {
        AcdPhase::Claimed { addr } => info!(%addr, "address claimed"),
        phase => warn!(?phase, "address claim did not complete"),
    }

    // Resolved send: queued behind ARP, flushed by the peer's reply.
    let packet = seg.local.datagram(peer_addr, b"emnet simulate")?;
    let delivery = seg.local.stack.ip_write(PROTO_UDP, packet)?;
    seg.settle();
    info!(?delivery, peer = %peer_addr, delivered = seg.delivered, "datagram to peer");

    // Unanswered resolution: times out on the next ticks.
    if let Some(silent) = peer_address(local_net, &[local_addr, peer_addr]) {
        let packet = seg.local.datagram(silent, b"nobody home")?;
        if seg.local.stack.ip_write(PROTO_UDP, packet)? == Delivery::Pending {
            let timeout_ticks = config.arp.pending_timeout_ms.div_ceil(TICK_MS) + 1;
            for _ in 0..timeout_ticks {
                seg.tick();
            }
            info!(%silent, timeouts = seg.local.stack.arp_stats().timeouts, "resolution abandoned");
        }
    }

    let seconds = args
        .seconds
        .unwrap_or(config.arp.age_out_ms / TICK_MS + 2);
    let elapsed = seg.clock_seconds();
    for _ in elapsed..seconds {
        seg.tick();
        if !seg.local.stack.arp_has_entry(peer_addr) {
            break;
        }
    }
    if seg.local.stack.arp_has_entry(peer_addr) {
        info!(peer = %peer_addr, "peer still cached at end of run");
    } else {
        info!(peer = %peer_addr, at_ms = seg.clock_ms(), "peer aged out");
    }

    info!(
        local = %seg.local.addr(),
        peer = %seg.peer.addr(),
        delivered = seg.delivered,
        outstanding = seg.local.alloc.stats().outstanding(),
        "simulation finished"
    );

    if !args.quiet {
        let metrics = MetricsRecorder::new()?;
        metrics.record(seg.local.stack.counters());
        for pool in 0..seg.local.alloc.pool_count() {
            if let Some(size) = seg.local.alloc.pool_size(pool) {
                metrics.set_pool_free(size, seg.local.alloc.free_count(pool));
            }
        }
        print!("{}", metrics.gather_metrics()?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_address_skips_taken_hosts() {
        let net: Ipv4Network = "192.168.1.10/24".parse().unwrap();
        let local = net.ip();
        let peer = peer_address(net, &[local]).unwrap();
        assert_eq!(peer, Ipv4Addr::new(192, 168, 1, 11));
        assert_eq!(
            peer_address(net, &[local, peer]),
            Some(Ipv4Addr::new(192, 168, 1, 12))
        );
    }

    #[test]
    fn peer_address_wraps_within_the_subnet() {
        let net: Ipv4Network = "10.0.0.254/24".parse().unwrap();
        assert_eq!(peer_address(net, &[net.ip()]), Some(Ipv4Addr::new(10, 0, 0, 1)));

        let tiny: Ipv4Network = "10.0.0.1/31".parse().unwrap();
        assert_eq!(peer_address(tiny, &[tiny.ip()]), None);
    }

    #[test]
    fn default_run_completes() {
        let args = SimulateArgs {
            config: None,
            seconds: Some(5),
            quiet: true,
        };
        run(&EmnetConfig::default(), &args).unwrap();
    }
}
