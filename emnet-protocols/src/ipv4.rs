//! ## emnet-protocols::ipv4
//! RFC 791 base header (20 bytes, no options) and destination classes.

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut};
use thiserror::Error;

use crate::checksum;

pub const IPV4_HEADER_LEN: usize = 20;
pub const IPV4_VERSION_IHL: u8 = 0x45;
pub const DEFAULT_TTL: u8 = 64;

pub const PROTO_ICMP: u8 = 1;
pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Ipv4Error {
    #[error("Buffer too short for an IPv4 header")]
    Truncated,
    #[error("Not an IPv4 header (version {0})")]
    Version(u8),
    #[error("Header length {0} bytes is unsupported")]
    HeaderLength(usize),
    #[error("Header checksum mismatch")]
    Checksum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub tos: u8,
    pub total_len: u16,
    pub ident: u16,
    pub flags_frag: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl Ipv4Header {
    pub fn new(protocol: u8, src: Ipv4Addr, dst: Ipv4Addr, payload_len: usize) -> Self {
        Self {
            tos: 0,
            total_len: (IPV4_HEADER_LEN + payload_len) as u16,
            ident: 0,
            flags_frag: 0,
            ttl: DEFAULT_TTL,
            protocol,
            checksum: 0,
            src,
            dst,
        }
    }

    /// Writes the header into the first 20 bytes of `out`, computing the
    /// checksum in software. Returns the checksum written.
    pub fn write(&self, out: &mut [u8]) -> Result<u16, Ipv4Error> {
        if out.len() < IPV4_HEADER_LEN {
            return Err(Ipv4Error::Truncated);
        }
        let hdr = &mut out[..IPV4_HEADER_LEN];
        {
            let mut buf = &mut hdr[..];
            buf.put_u8(IPV4_VERSION_IHL);
            buf.put_u8(self.tos);
            buf.put_u16(self.total_len);
            buf.put_u16(self.ident);
            buf.put_u16(self.flags_frag);
            buf.put_u8(self.ttl);
            buf.put_u8(self.protocol);
            buf.put_u16(0);
            buf.put_slice(&self.src.octets());
            buf.put_slice(&self.dst.octets());
        }
        let sum = checksum::internet_checksum(hdr);
        hdr[10..12].copy_from_slice(&sum.to_be_bytes());
        Ok(sum)
    }

    /// Parses and verifies a base header. Options are rejected.
    pub fn parse(data: &[u8]) -> Result<Self, Ipv4Error> {
        if data.len() < IPV4_HEADER_LEN {
            return Err(Ipv4Error::Truncated);
        }
        let version = data[0] >> 4;
        if version != 4 {
            return Err(Ipv4Error::Version(version));
        }
        let ihl = ((data[0] & 0x0f) as usize) * 4;
        if ihl != IPV4_HEADER_LEN {
            return Err(Ipv4Error::HeaderLength(ihl));
        }
        if !checksum::verify(&data[..IPV4_HEADER_LEN]) {
            return Err(Ipv4Error::Checksum);
        }

        let mut buf = &data[1..IPV4_HEADER_LEN];
        Ok(Self {
            tos: buf.get_u8(),
            total_len: buf.get_u16(),
            ident: buf.get_u16(),
            flags_frag: buf.get_u16(),
            ttl: buf.get_u8(),
            protocol: buf.get_u8(),
            checksum: buf.get_u16(),
            src: Ipv4Addr::from(buf.get_u32()),
            dst: Ipv4Addr::from(buf.get_u32()),
        })
    }
}

/// Top nibble `0xE`: class D group address.
#[inline]
pub fn is_multicast(addr: Ipv4Addr) -> bool {
    addr.octets()[0] & 0xf0 == 0xe0
}

/// `addr` and `local` share the network selected by `mask`.
#[inline]
pub fn same_subnet(addr: Ipv4Addr, local: Ipv4Addr, mask: Ipv4Addr) -> bool {
    let m = u32::from(mask);
    u32::from(addr) & m == u32::from(local) & m
}

/// Host part of `addr` is all ones under `mask`.
#[inline]
pub fn is_subnet_broadcast(addr: Ipv4Addr, mask: Ipv4Addr) -> bool {
    let m = u32::from(mask);
    m != u32::MAX && u32::from(addr) | m == u32::MAX
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_header_checksum() {
        // Classic example header: 45 00 00 73 00 00 40 00 40 11 b8 61 c0 a8 00 01 c0 a8 00 c7
        let hdr = Ipv4Header {
            tos: 0,
            total_len: 0x73,
            ident: 0,
            flags_frag: 0x4000,
            ttl: 64,
            protocol: PROTO_UDP,
            checksum: 0,
            src: Ipv4Addr::new(192, 168, 0, 1),
            dst: Ipv4Addr::new(192, 168, 0, 199),
        };
        let mut out = [0u8; IPV4_HEADER_LEN];
        assert_eq!(hdr.write(&mut out).unwrap(), 0xb861);
        assert_eq!(&out[10..12], &[0xb8, 0x61]);

        let parsed = Ipv4Header::parse(&out).unwrap();
        assert_eq!(parsed.checksum, 0xb861);
        assert_eq!(parsed.dst, hdr.dst);
    }

    #[test]
    fn corrupted_header_fails_verification() {
        let mut out = [0u8; IPV4_HEADER_LEN];
        Ipv4Header::new(PROTO_ICMP, Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 8)
            .write(&mut out)
            .unwrap();
        out[8] ^= 0x01;
        assert_eq!(Ipv4Header::parse(&out), Err(Ipv4Error::Checksum));
        out[0] = 0x65;
        assert_eq!(Ipv4Header::parse(&out), Err(Ipv4Error::Version(6)));
    }

    #[test]
    fn destination_classes() {
        let mask = Ipv4Addr::new(255, 255, 255, 0);
        let local = Ipv4Addr::new(192, 168, 1, 10);
        assert!(same_subnet(Ipv4Addr::new(192, 168, 1, 77), local, mask));
        assert!(!same_subnet(Ipv4Addr::new(192, 168, 2, 77), local, mask));
        assert!(is_subnet_broadcast(Ipv4Addr::new(192, 168, 1, 255), mask));
        assert!(!is_subnet_broadcast(Ipv4Addr::new(192, 168, 1, 254), mask));
        assert!(is_multicast(Ipv4Addr::new(224, 0, 0, 251)));
        assert!(is_multicast(Ipv4Addr::new(239, 255, 255, 250)));
        assert!(!is_multicast(Ipv4Addr::new(240, 0, 0, 1)));
    }
}
