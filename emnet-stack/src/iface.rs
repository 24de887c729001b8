//! ## emnet-stack::iface
//! **Network interfaces and the link driver seam**
//!
//! An [`Interface`] is an address binding plus a [`LinkDriver`]. Frames leave
//! the stack through [`Interface::transmit`], which stamps the Ethernet
//! header into the packet's headroom and hands the packet to the driver.

use std::fmt;
use std::net::Ipv4Addr;

use emnet_config::InterfaceConfig;
use emnet_core::alloc::{IfaceId, Packet, PacketAllocator};
use emnet_protocols::ethernet::{EthernetHeader, ETH_HEADER_LEN};
use emnet_protocols::MacAddr;
use ipnetwork::Ipv4Network;
use tracing::{trace, warn};

use crate::error::{NetError, SetupError};

/// Transmit side of a network device.
///
/// The driver takes ownership of every packet it is given and must release
/// it to the allocator exactly once, whether or not the frame went out. The
/// release may happen later and from another thread (TX completion).
pub trait LinkDriver: Send {
    /// `packet` holds a complete Ethernet frame addressed to `dest`.
    fn send_frame(&self, dest: MacAddr, packet: Packet) -> Result<(), crate::error::LinkError>;
}

pub struct Interface {
    pub id: IfaceId,
    pub name: String,
    pub addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
    pub mac: MacAddr,
    /// Driver can compute the IPv4 header checksum. Informational: the
    /// output path always writes it in software.
    pub checksum_offload: bool,
    driver: Box<dyn LinkDriver>,
}

impl Interface {
    pub fn new(
        id: IfaceId,
        name: impl Into<String>,
        network: Ipv4Network,
        gateway: Option<Ipv4Addr>,
        mac: MacAddr,
        driver: Box<dyn LinkDriver>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            addr: network.ip(),
            netmask: network.mask(),
            gateway,
            mac,
            checksum_offload: false,
            driver,
        }
    }

    pub fn from_config(
        id: IfaceId,
        config: &InterfaceConfig,
        driver: Box<dyn LinkDriver>,
    ) -> Result<Self, SetupError> {
        let mac = config.mac.parse::<MacAddr>().map_err(|source| SetupError::Mac {
            name: config.name.clone(),
            source,
        })?;
        let mut iface = Self::new(id, &config.name, config.address, config.gateway, mac, driver);
        iface.checksum_offload = config.checksum_offload;
        Ok(iface)
    }

    #[inline]
    pub fn has_address(&self) -> bool {
        !self.addr.is_unspecified()
    }

    /// Prepends an Ethernet header and passes the frame to the driver.
    ///
    /// Consumes `packet` on every path.
    pub fn transmit(
        &self,
        alloc: &PacketAllocator,
        packet: Packet,
        dest: MacAddr,
        ethertype: u16,
    ) -> Result<(), NetError> {
        let header = EthernetHeader {
            dst: dest,
            src: self.mac,
            ethertype,
        };
        let stamped = {
            let mut buf = alloc.buf(&packet);
            let ok = match buf.push_header(ETH_HEADER_LEN) {
                Some(room) => header.write(room).is_ok(),
                None => false,
            };
            ok
        };
        if !stamped {
            warn!(iface = %self.id, "no headroom for Ethernet header");
            alloc.release(packet);
            return Err(NetError::NoBuffer);
        }

        trace!(iface = %self.id, %dest, ethertype, "frame to driver");
        self.driver.send_frame(dest, packet).map_err(NetError::from)
    }
}

impl fmt::Debug for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interface")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("addr", &self.addr)
            .field("netmask", &self.netmask)
            .field("gateway", &self.gateway)
            .field("mac", &self.mac)
            .finish_non_exhaustive()
    }
}
