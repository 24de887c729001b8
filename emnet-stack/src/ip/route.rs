use std::net::Ipv4Addr;

use emnet_protocols::ipv4::{is_multicast, is_subnet_broadcast, same_subnet};
use emnet_protocols::MacAddr;

use crate::iface::Interface;

/// First hop for a datagram leaving through one interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// On-link host, resolved through ARP.
    Direct(Ipv4Addr),
    /// Off-link host, sent to the interface gateway through ARP.
    Gateway(Ipv4Addr),
    /// Link broadcast, no resolution.
    Broadcast,
    /// Group address mapped straight to its link address.
    Multicast(MacAddr),
    Unreachable,
}

pub fn classify(dest: Ipv4Addr, iface: &Interface) -> Route {
    if dest.is_broadcast() {
        return Route::Broadcast;
    }
    if is_multicast(dest) {
        return Route::Multicast(MacAddr::ipv4_multicast(dest));
    }
    if !iface.has_address() || dest.is_unspecified() {
        return Route::Unreachable;
    }
    if same_subnet(dest, iface.addr, iface.netmask) {
        if is_subnet_broadcast(dest, iface.netmask) {
            return Route::Broadcast;
        }
        return Route::Direct(dest);
    }
    match iface.gateway {
        Some(gw) => Route::Gateway(gw),
        None => Route::Unreachable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use emnet_core::alloc::{AllocatorConfig, IfaceId, PacketAllocator};
    use ipnetwork::Ipv4Network;

    use crate::link::SimLink;

    fn iface(gateway: Option<Ipv4Addr>) -> Interface {
        let alloc = Arc::new(PacketAllocator::new(&AllocatorConfig::default()).unwrap());
        let (link, _) = SimLink::new(alloc);
        Interface::new(
            IfaceId(0),
            "sim0",
            Ipv4Network::new(Ipv4Addr::new(192, 168, 1, 10), 24).unwrap(),
            gateway,
            MacAddr::new(0x02, 0, 0, 0, 0, 1),
            Box::new(link),
        )
    }

    #[test]
    fn broadcast_forms() {
        let i = iface(None);
        assert_eq!(classify(Ipv4Addr::BROADCAST, &i), Route::Broadcast);
        assert_eq!(classify(Ipv4Addr::new(192, 168, 1, 255), &i), Route::Broadcast);
        // Another subnet's broadcast is just an off-link host.
        assert_eq!(classify(Ipv4Addr::new(192, 168, 2, 255), &i), Route::Unreachable);
    }

    #[test]
    fn multicast_maps_to_group_mac() {
        let i = iface(None);
        assert_eq!(
            classify(Ipv4Addr::new(224, 0, 0, 251), &i),
            Route::Multicast(MacAddr::new(0x01, 0x00, 0x5e, 0x00, 0x00, 0xfb))
        );
    }

    #[test]
    fn direct_gateway_and_unreachable() {
        let gw = Ipv4Addr::new(192, 168, 1, 1);
        let with_gw = iface(Some(gw));
        let without = iface(None);
        let local = Ipv4Addr::new(192, 168, 1, 20);
        let remote = Ipv4Addr::new(8, 8, 8, 8);

        assert_eq!(classify(local, &with_gw), Route::Direct(local));
        assert_eq!(classify(remote, &with_gw), Route::Gateway(gw));
        assert_eq!(classify(remote, &without), Route::Unreachable);
    }

    #[test]
    fn unconfigured_interface_only_reaches_link_groups() {
        let mut i = iface(Some(Ipv4Addr::new(192, 168, 1, 1)));
        i.addr = Ipv4Addr::UNSPECIFIED;
        assert_eq!(classify(Ipv4Addr::new(192, 168, 1, 20), &i), Route::Unreachable);
        assert_eq!(classify(Ipv4Addr::BROADCAST, &i), Route::Broadcast);
    }
}
