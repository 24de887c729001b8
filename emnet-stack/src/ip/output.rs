//! IPv4 datagram output: header, first-hop choice, hand-off.

use std::net::Ipv4Addr;

use emnet_config::IpConfig;
use emnet_core::alloc::{Packet, PacketAllocator};
use emnet_protocols::ethernet::ETHERTYPE_IPV4;
use emnet_protocols::ipv4::{Ipv4Header, IPV4_HEADER_LEN};
use emnet_protocols::MacAddr;
use tracing::{debug, trace};

use super::route::{classify, Route};
use crate::arp::{ArpStatus, ArpTable};
use crate::error::NetError;
use crate::iface::Interface;

/// Successful outcome of [`IpOutput::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Parked on an ARP entry awaiting resolution.
    Pending,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IpStats {
    pub sent: u64,
    pub pending: u64,
    pub broadcast: u64,
    pub multicast: u64,
    pub no_route: u64,
    pub busy: u64,
    pub no_buffer: u64,
    pub link_errors: u64,
    pub oversize: u64,
}

impl IpStats {
    pub fn counters(&self) -> [(&'static str, u64); 9] {
        [
            ("ip_sent", self.sent),
            ("ip_pending", self.pending),
            ("ip_broadcast", self.broadcast),
            ("ip_multicast", self.multicast),
            ("ip_no_route", self.no_route),
            ("ip_busy", self.busy),
            ("ip_no_buffer", self.no_buffer),
            ("ip_link_errors", self.link_errors),
            ("ip_oversize", self.oversize),
        ]
    }
}

pub struct IpOutput {
    ttl: u8,
    ident: u16,
    pub(crate) stats: IpStats,
}

impl IpOutput {
    pub fn new(config: &IpConfig) -> Self {
        Self {
            ttl: config.ttl,
            ident: 0,
            stats: IpStats::default(),
        }
    }

    pub fn stats(&self) -> IpStats {
        self.stats
    }

    fn next_ident(&mut self) -> u16 {
        let id = self.ident;
        self.ident = self.ident.wrapping_add(1);
        id
    }

    /// Prepends an IPv4 header to `packet` and sends it towards the address
    /// in its `dest` field. Consumes `packet` on every path.
    pub fn write(
        &mut self,
        alloc: &PacketAllocator,
        iface: &Interface,
        arp: &mut ArpTable,
        protocol: u8,
        packet: Packet,
        now: u64,
    ) -> Result<Delivery, NetError> {
        let result = self.route(alloc, iface, arp, protocol, packet, now);
        match &result {
            Ok(Delivery::Sent) => self.stats.sent += 1,
            Ok(Delivery::Pending) => self.stats.pending += 1,
            Err(NetError::NoRoute(_)) => self.stats.no_route += 1,
            Err(NetError::ResolutionBusy(_)) => self.stats.busy += 1,
            Err(NetError::NoBuffer) => self.stats.no_buffer += 1,
            Err(NetError::Link(_)) => self.stats.link_errors += 1,
            Err(NetError::DatagramTooLarge(_)) => self.stats.oversize += 1,
            Err(_) => {}
        }
        result
    }

    fn route(
        &mut self,
        alloc: &PacketAllocator,
        iface: &Interface,
        arp: &mut ArpTable,
        protocol: u8,
        packet: Packet,
        now: u64,
    ) -> Result<Delivery, NetError> {
        let dest = alloc.buf(&packet).dest();
        let len = alloc.buf(&packet).len() + IPV4_HEADER_LEN;
        let Ok(total_len) = u16::try_from(len) else {
            debug!(%dest, len, "datagram too large for IPv4");
            alloc.release(packet);
            return Err(NetError::DatagramTooLarge(len));
        };
        let ident = self.next_ident();

        let stamped = {
            let mut buf = alloc.buf(&packet);
            buf.set_iface(Some(iface.id));
            let header = Ipv4Header {
                tos: 0,
                total_len,
                ident,
                flags_frag: 0,
                ttl: self.ttl,
                protocol,
                checksum: 0,
                src: iface.addr,
                dst: dest,
            };
            // Checksum is always written here, even for offload-capable links.
            let ok = match buf.push_header(IPV4_HEADER_LEN) {
                Some(room) => header.write(room).is_ok(),
                None => false,
            };
            ok
        };
        if !stamped {
            alloc.release(packet);
            return Err(NetError::NoBuffer);
        }

        match classify(dest, iface) {
            Route::Broadcast => {
                self.stats.broadcast += 1;
                self.link_send(alloc, iface, packet, MacAddr::BROADCAST)
            }
            Route::Multicast(mac) => {
                self.stats.multicast += 1;
                self.link_send(alloc, iface, packet, mac)
            }
            Route::Direct(hop) | Route::Gateway(hop) => {
                trace!(%dest, %hop, ident, "resolving next hop");
                match arp.send(alloc, iface, packet, hop, now)? {
                    ArpStatus::Sent => Ok(Delivery::Sent),
                    ArpStatus::Pending => Ok(Delivery::Pending),
                    ArpStatus::Dropped => Err(NetError::ResolutionBusy(hop)),
                }
            }
            Route::Unreachable => {
                debug!(%dest, iface = %iface.id, "no route");
                alloc.release(packet);
                Err(NetError::NoRoute(dest))
            }
        }
    }

    fn link_send(
        &self,
        alloc: &PacketAllocator,
        iface: &Interface,
        packet: Packet,
        mac: MacAddr,
    ) -> Result<Delivery, NetError> {
        iface.transmit(alloc, packet, mac, ETHERTYPE_IPV4)?;
        Ok(Delivery::Sent)
    }
}

/// Destination helper for callers building datagrams by hand.
pub fn set_destination(alloc: &PacketAllocator, packet: &Packet, dest: Ipv4Addr) {
    alloc.buf(packet).set_dest(dest);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use emnet_config::ArpConfig;
    use emnet_core::alloc::{AllocatorConfig, IfaceId, PoolClass};
    use emnet_protocols::checksum;
    use emnet_protocols::ipv4::PROTO_UDP;
    use emnet_protocols::ArpPacket;
    use ipnetwork::Ipv4Network;

    use crate::link::{SimLink, SimTap};

    const LOCAL: Ipv4Addr = Ipv4Addr::new(10, 1, 0, 2);

    struct Rig {
        alloc: Arc<PacketAllocator>,
        iface: Interface,
        tap: SimTap,
        arp: ArpTable,
        ip: IpOutput,
    }

    fn rig(gateway: Option<Ipv4Addr>) -> Rig {
        let alloc = Arc::new(
            PacketAllocator::new(&AllocatorConfig {
                classes: vec![PoolClass::new(64, 4), PoolClass::new(1536, 2)],
                header_reserve: 34,
                guard_words: true,
            })
            .unwrap(),
        );
        let (link, tap) = SimLink::new(alloc.clone());
        let iface = Interface::new(
            IfaceId(0),
            "sim0",
            Ipv4Network::new(LOCAL, 16).unwrap(),
            gateway,
            MacAddr::new(0x02, 0, 0, 0, 0, 2),
            Box::new(link),
        );
        Rig {
            alloc,
            iface,
            tap,
            arp: ArpTable::new(&ArpConfig::default()),
            ip: IpOutput::new(&IpConfig { ttl: 32 }),
        }
    }

    impl Rig {
        fn datagram(&self, dest: Ipv4Addr, body: &[u8]) -> Packet {
            let packet = self.alloc.alloc(body.len()).unwrap();
            assert!(self.alloc.buf(&packet).append(body));
            set_destination(&self.alloc, &packet, dest);
            packet
        }

        fn write(&mut self, packet: Packet) -> Result<Delivery, NetError> {
            self.ip
                .write(&self.alloc, &self.iface, &mut self.arp, PROTO_UDP, packet, 0)
        }
    }

    #[test]
    fn broadcast_header_is_well_formed() {
        let mut r = rig(None);
        let packet = r.datagram(Ipv4Addr::BROADCAST, b"hello");
        assert_eq!(r.write(packet), Ok(Delivery::Sent));

        let frame = r.tap.pop().unwrap();
        assert_eq!(frame.dest, MacAddr::BROADCAST);
        let ip = frame.payload();
        assert_eq!(ip.len(), IPV4_HEADER_LEN + 5);
        assert!(checksum::verify(&ip[..IPV4_HEADER_LEN]));
        let hdr = Ipv4Header::parse(ip).unwrap();
        assert_eq!(hdr.ttl, 32);
        assert_eq!(hdr.protocol, PROTO_UDP);
        assert_eq!(hdr.total_len, 25);
        assert_eq!(hdr.src, LOCAL);
        assert_eq!(&ip[IPV4_HEADER_LEN..], b"hello");
        assert_eq!(r.ip.stats().broadcast, 1);
    }

    #[test]
    fn ident_advances_per_datagram() {
        let mut r = rig(None);
        for _ in 0..3 {
            let packet = r.datagram(Ipv4Addr::new(10, 1, 255, 255), b"x");
            r.write(packet).unwrap();
        }
        let idents: Vec<u16> = r
            .tap
            .drain()
            .iter()
            .map(|f| Ipv4Header::parse(f.payload()).unwrap().ident)
            .collect();
        assert_eq!(idents, vec![0, 1, 2]);
    }

    #[test]
    fn checksum_is_software_on_offload_links() {
        let mut r = rig(None);
        r.iface.checksum_offload = true;
        let packet = r.datagram(Ipv4Addr::new(239, 1, 2, 3), b"group");
        assert_eq!(r.write(packet), Ok(Delivery::Sent));
        let frame = r.tap.pop().unwrap();
        assert_eq!(frame.dest, MacAddr::new(0x01, 0x00, 0x5e, 0x01, 0x02, 0x03));
        let header = Ipv4Header::parse(frame.payload()).unwrap();
        assert_ne!(header.checksum, 0);
    }

    #[test]
    fn unreachable_destination_frees_packet() {
        let mut r = rig(None);
        let packet = r.datagram(Ipv4Addr::new(8, 8, 8, 8), b"lost");
        let observer = r.alloc.share(&packet);
        assert_eq!(r.alloc.use_count(&observer), 2);

        assert_eq!(
            r.write(packet),
            Err(NetError::NoRoute(Ipv4Addr::new(8, 8, 8, 8)))
        );
        assert_eq!(r.alloc.use_count(&observer), 1);
        r.alloc.release(observer);
        assert_eq!(r.alloc.stats().outstanding(), 0);
        assert!(r.tap.is_empty());
        assert_eq!(r.ip.stats().no_route, 1);
    }

    #[test]
    fn off_link_goes_through_gateway_resolution() {
        let gw = Ipv4Addr::new(10, 1, 0, 1);
        let mut r = rig(Some(gw));
        let packet = r.datagram(Ipv4Addr::new(172, 16, 0, 9), b"far");
        assert_eq!(r.write(packet), Ok(Delivery::Pending));

        let request = r.tap.pop().unwrap().arp().unwrap();
        assert_eq!(request.target_ip, gw);

        let second = r.datagram(Ipv4Addr::new(172, 16, 0, 10), b"far");
        assert_eq!(r.write(second), Err(NetError::ResolutionBusy(gw)));
        assert_eq!(r.ip.stats().busy, 1);

        let gw_mac = MacAddr::new(0x02, 0, 0, 0, 0, 1);
        r.arp
            .input(&r.alloc, &r.iface, &ArpPacket::reply(gw_mac, gw, r.iface.mac, LOCAL), 5)
            .unwrap();
        let frame = r.tap.pop().unwrap();
        assert_eq!(frame.dest, gw_mac);
        assert_eq!(
            Ipv4Header::parse(frame.payload()).unwrap().dst,
            Ipv4Addr::new(172, 16, 0, 9)
        );
    }

    #[test]
    fn datagram_over_the_length_field_is_refused() {
        let mut r = rig(None);
        r.alloc = Arc::new(
            PacketAllocator::new(&AllocatorConfig {
                classes: vec![PoolClass::new(70_000, 1)],
                header_reserve: 34,
                guard_words: false,
            })
            .unwrap(),
        );
        let body = vec![0u8; 65_516];
        let packet = r.datagram(Ipv4Addr::BROADCAST, &body);
        let observer = r.alloc.share(&packet);

        assert_eq!(r.write(packet), Err(NetError::DatagramTooLarge(65_536)));
        assert_eq!(r.alloc.use_count(&observer), 1);
        r.alloc.release(observer);
        assert_eq!(r.alloc.stats().outstanding(), 0);
        assert!(r.tap.is_empty());
        assert_eq!(r.ip.stats().oversize, 1);
    }

    #[test]
    fn link_failure_is_reported_and_packet_released() {
        let mut r = rig(None);
        r.tap.fail_next(1);
        let packet = r.datagram(Ipv4Addr::BROADCAST, b"busy");
        assert!(matches!(r.write(packet), Err(NetError::Link(_))));
        assert_eq!(r.alloc.stats().outstanding(), 0);
        assert_eq!(r.ip.stats().link_errors, 1);
    }
}
