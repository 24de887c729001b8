//! # emnet Wire Formats
//!
//! Crate for the link and network layer encodings the stack emits and
//! consumes: Ethernet II, ARP (RFC 826 / RFC 5227), and the IPv4 base header
//! with its RFC 1071 checksum.
//!
//! All encoders write into caller-provided slices so they can target the
//! header room of a pooled packet buffer without copying.

pub mod arp;
pub mod checksum;
pub mod ethernet;
pub mod ipv4;

pub use arp::{ArpOp, ArpPacket, ArpParseError, ARP_PACKET_LEN};
pub use ethernet::{EthernetError, EthernetHeader, MacAddr, MacParseError, ETH_HEADER_LEN};
pub use ipv4::{Ipv4Error, Ipv4Header, IPV4_HEADER_LEN};
