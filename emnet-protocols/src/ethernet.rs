//! ## emnet-protocols::ethernet
//! Ethernet II header and 48-bit link addresses.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use bytes::{Buf, BufMut};
use thiserror::Error;

pub const ETH_ALEN: usize = 6;
pub const ETH_HEADER_LEN: usize = 14;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum EthernetError {
    #[error("Buffer too short for an Ethernet header")]
    Truncated,
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum MacParseError {
    #[error("MAC address must be six ':'-separated octets")]
    Format,
    #[error("Invalid hex in MAC address: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// 48-bit IEEE link address.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; ETH_ALEN]);

impl MacAddr {
    pub const ZERO: MacAddr = MacAddr([0; ETH_ALEN]);
    pub const BROADCAST: MacAddr = MacAddr([0xff; ETH_ALEN]);

    pub const fn new(a: u8, b: u8, c: u8, d: u8, e: u8, f: u8) -> Self {
        MacAddr([a, b, c, d, e, f])
    }

    /// RFC 1112 mapping: `01:00:5e` plus the low 23 bits of the group.
    pub fn ipv4_multicast(group: Ipv4Addr) -> Self {
        let o = group.octets();
        MacAddr([0x01, 0x00, 0x5e, o[1] & 0x7f, o[2], o[3]])
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    #[inline]
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Group bit set (includes broadcast).
    #[inline]
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    #[inline]
    pub fn octets(&self) -> [u8; ETH_ALEN] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for MacAddr {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != ETH_ALEN || parts.iter().any(|p| p.len() != 2) {
            return Err(MacParseError::Format);
        }
        let mut out = [0u8; ETH_ALEN];
        hex::decode_to_slice(parts.concat(), &mut out)?;
        Ok(MacAddr(out))
    }
}

impl From<[u8; ETH_ALEN]> for MacAddr {
    fn from(bytes: [u8; ETH_ALEN]) -> Self {
        MacAddr(bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub ethertype: u16,
}

impl EthernetHeader {
    pub fn parse(data: &[u8]) -> Result<Self, EthernetError> {
        if data.len() < ETH_HEADER_LEN {
            return Err(EthernetError::Truncated);
        }
        let mut buf = data;
        let mut dst = [0u8; ETH_ALEN];
        let mut src = [0u8; ETH_ALEN];
        buf.copy_to_slice(&mut dst);
        buf.copy_to_slice(&mut src);
        Ok(Self {
            dst: MacAddr(dst),
            src: MacAddr(src),
            ethertype: buf.get_u16(),
        })
    }

    /// Writes the 14 header bytes at the start of `out`.
    pub fn write(&self, out: &mut [u8]) -> Result<(), EthernetError> {
        if out.len() < ETH_HEADER_LEN {
            return Err(EthernetError::Truncated);
        }
        let mut buf = &mut out[..ETH_HEADER_LEN];
        buf.put_slice(&self.dst.0);
        buf.put_slice(&self.src.0);
        buf.put_u16(self.ethertype);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let hdr = EthernetHeader {
            dst: MacAddr::BROADCAST,
            src: MacAddr::new(0x02, 0, 0, 0, 0, 0x01),
            ethertype: ETHERTYPE_ARP,
        };
        let mut out = [0u8; ETH_HEADER_LEN];
        hdr.write(&mut out).unwrap();
        assert_eq!(&out[..6], &[0xff; 6]);
        assert_eq!(&out[6..12], &[0x02, 0, 0, 0, 0, 0x01]);
        assert_eq!(&out[12..], &[0x08, 0x06]);
        assert_eq!(EthernetHeader::parse(&out).unwrap(), hdr);
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert_eq!(EthernetHeader::parse(&[0; 13]), Err(EthernetError::Truncated));
        let hdr = EthernetHeader {
            dst: MacAddr::ZERO,
            src: MacAddr::ZERO,
            ethertype: ETHERTYPE_IPV4,
        };
        assert_eq!(hdr.write(&mut [0; 10]), Err(EthernetError::Truncated));
    }

    #[test]
    fn multicast_mapping_keeps_low_23_bits() {
        let mac = MacAddr::ipv4_multicast(Ipv4Addr::new(239, 129, 2, 3));
        assert_eq!(mac, MacAddr::new(0x01, 0x00, 0x5e, 0x01, 0x02, 0x03));
        assert!(mac.is_multicast());
    }

    #[test]
    fn mac_text_form() {
        let mac: MacAddr = "02:1a:2B:3c:4d:5e".parse().unwrap();
        assert_eq!(mac, MacAddr::new(0x02, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e));
        assert_eq!(mac.to_string(), "02:1a:2b:3c:4d:5e");
        assert_eq!("02:1a:2b".parse::<MacAddr>(), Err(MacParseError::Format));
        assert!(matches!(
            "zz:1a:2b:3c:4d:5e".parse::<MacAddr>(),
            Err(MacParseError::Hex(_))
        ));
    }
}
