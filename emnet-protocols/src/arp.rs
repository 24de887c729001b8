//! ## emnet-protocols::arp
//! RFC 826 ARP payload for Ethernet/IPv4 (28 bytes), including the RFC 5227
//! probe and announcement forms used by address conflict detection.
//!
//! ```text
//! 0      2      4    5    6      8             14       18            24       28
//! | htype | ptype |hlen|plen| oper | sender MAC | sender IP | target MAC | target IP |
//! ```

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut};
use thiserror::Error;

use crate::ethernet::{MacAddr, ETH_ALEN, ETHERTYPE_IPV4};

pub const HTYPE_ETHERNET: u16 = 1;
pub const PLEN_IPV4: u8 = 4;
pub const ARP_PACKET_LEN: usize = 28;

pub const OPCODE_REQUEST: u16 = 1;
pub const OPCODE_REPLY: u16 = 2;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ArpParseError {
    #[error("ARP payload shorter than 28 bytes")]
    Truncated,
    #[error("Unsupported hardware type {0}")]
    HardwareType(u16),
    #[error("Unsupported protocol type {0:#06x}")]
    ProtocolType(u16),
    #[error("Unexpected address lengths ({hlen}, {plen})")]
    AddressLength { hlen: u8, plen: u8 },
    #[error("Unknown ARP opcode {0}")]
    Opcode(u16),
    #[error("Group address used as ARP sender")]
    InvalidSender,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpOp {
    Request,
    Reply,
}

impl ArpOp {
    pub fn from_raw(op: u16) -> Option<Self> {
        match op {
            OPCODE_REQUEST => Some(ArpOp::Request),
            OPCODE_REPLY => Some(ArpOp::Reply),
            _ => None,
        }
    }

    pub fn to_raw(self) -> u16 {
        match self {
            ArpOp::Request => OPCODE_REQUEST,
            ArpOp::Reply => OPCODE_REPLY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpPacket {
    pub op: ArpOp,
    pub sender_hw: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_hw: MacAddr,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    /// Who-has `target_ip`, broadcast.
    pub fn request(sender_hw: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        Self {
            op: ArpOp::Request,
            sender_hw,
            sender_ip,
            target_hw: MacAddr::ZERO,
            target_ip,
        }
    }

    pub fn reply(
        sender_hw: MacAddr,
        sender_ip: Ipv4Addr,
        target_hw: MacAddr,
        target_ip: Ipv4Addr,
    ) -> Self {
        Self {
            op: ArpOp::Reply,
            sender_hw,
            sender_ip,
            target_hw,
            target_ip,
        }
    }

    /// RFC 5227 probe: sender IP all zeros so no cache learns the candidate.
    pub fn probe(sender_hw: MacAddr, candidate: Ipv4Addr) -> Self {
        Self::request(sender_hw, Ipv4Addr::UNSPECIFIED, candidate)
    }

    /// RFC 5227 announcement: sender and target IP both the claimed address.
    pub fn announcement(sender_hw: MacAddr, addr: Ipv4Addr) -> Self {
        Self::request(sender_hw, addr, addr)
    }

    #[inline]
    pub fn is_probe(&self) -> bool {
        self.op == ArpOp::Request && self.sender_ip.is_unspecified()
    }

    #[inline]
    pub fn is_gratuitous(&self) -> bool {
        self.sender_ip == self.target_ip
    }

    pub fn parse(data: &[u8]) -> Result<Self, ArpParseError> {
        if data.len() < ARP_PACKET_LEN {
            return Err(ArpParseError::Truncated);
        }
        let mut buf = &data[..ARP_PACKET_LEN];

        let htype = buf.get_u16();
        if htype != HTYPE_ETHERNET {
            return Err(ArpParseError::HardwareType(htype));
        }
        let ptype = buf.get_u16();
        if ptype != ETHERTYPE_IPV4 {
            return Err(ArpParseError::ProtocolType(ptype));
        }
        let (hlen, plen) = (buf.get_u8(), buf.get_u8());
        if hlen as usize != ETH_ALEN || plen != PLEN_IPV4 {
            return Err(ArpParseError::AddressLength { hlen, plen });
        }
        let raw_op = buf.get_u16();
        let op = ArpOp::from_raw(raw_op).ok_or(ArpParseError::Opcode(raw_op))?;

        let mut sender_hw = [0u8; ETH_ALEN];
        buf.copy_to_slice(&mut sender_hw);
        let sender_ip = Ipv4Addr::from(buf.get_u32());
        let mut target_hw = [0u8; ETH_ALEN];
        buf.copy_to_slice(&mut target_hw);
        let target_ip = Ipv4Addr::from(buf.get_u32());

        let sender_hw = MacAddr(sender_hw);
        if sender_hw.is_multicast() {
            return Err(ArpParseError::InvalidSender);
        }

        Ok(Self {
            op,
            sender_hw,
            sender_ip,
            target_hw: MacAddr(target_hw),
            target_ip,
        })
    }

    /// Writes the 28-byte payload at the start of `out`.
    pub fn write(&self, out: &mut [u8]) -> Result<(), ArpParseError> {
        if out.len() < ARP_PACKET_LEN {
            return Err(ArpParseError::Truncated);
        }
        let mut buf = &mut out[..ARP_PACKET_LEN];
        buf.put_u16(HTYPE_ETHERNET);
        buf.put_u16(ETHERTYPE_IPV4);
        buf.put_u8(ETH_ALEN as u8);
        buf.put_u8(PLEN_IPV4);
        buf.put_u16(self.op.to_raw());
        buf.put_slice(&self.sender_hw.0);
        buf.put_slice(&self.sender_ip.octets());
        buf.put_slice(&self.target_hw.0);
        buf.put_slice(&self.target_ip.octets());
        Ok(())
    }
}
