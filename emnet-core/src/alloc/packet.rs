//! ## emnet-core::alloc::packet
//! **Packet handles and the buffers they name**

use std::fmt;
use std::net::Ipv4Addr;

use crate::queue::{Link, LinkArena};

/// Sentinel written before and after the payload region of guarded buffers.
pub const GUARD_WORD: u32 = 0xDEAD_BEEF;

/// Bytes taken by one sentinel.
pub const GUARD_LEN: usize = 4;

/// Index of a network interface in the owning context's interface table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IfaceId(pub u8);

impl fmt::Display for IfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "if{}", self.0)
    }
}

/// Owning handle to one checked-out packet buffer.
///
/// Only [`PacketAllocator`](super::PacketAllocator) mints handles: `alloc`
/// hands out the first one and `share` hands out one more per extra owner.
/// Every handle must go back through `release` exactly once.
#[must_use = "packets must be released back to their allocator"]
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Packet {
    pub(crate) pool: u8,
    pub(crate) slot: u16,
}

impl Packet {
    /// Index of the pool this packet was carved from.
    #[inline]
    pub fn pool(&self) -> usize {
        self.pool as usize
    }

    #[inline]
    pub fn slot(&self) -> usize {
        self.slot as usize
    }
}

/// One pre-allocated buffer plus its bookkeeping.
///
/// The payload window is `offset..offset + len` inside a region of fixed
/// `capacity`. Headers are prepended by moving `offset` down
/// ([`push_header`](Self::push_header)) and stripped by moving it up.
pub struct PacketBuf {
    data: Box<[u8]>,
    guarded: bool,
    capacity: usize,
    offset: usize,
    len: usize,
    use_count: u32,
    iface: Option<IfaceId>,
    dest: Ipv4Addr,
    pub(crate) link: Link,
}

impl PacketBuf {
    pub(crate) fn new(capacity: usize, guarded: bool) -> Self {
        let guard = if guarded { GUARD_LEN } else { 0 };
        let mut data = vec![0u8; capacity + 2 * guard].into_boxed_slice();
        if guarded {
            let word = GUARD_WORD.to_be_bytes();
            data[..GUARD_LEN].copy_from_slice(&word);
            data[GUARD_LEN + capacity..].copy_from_slice(&word);
        }
        Self {
            data,
            guarded,
            capacity,
            offset: 0,
            len: 0,
            use_count: 0,
            iface: None,
            dest: Ipv4Addr::UNSPECIFIED,
            link: Link::new(),
        }
    }

    /// Prepares a free buffer for a new owner.
    pub(crate) fn reset(&mut self, reserve: usize) {
        self.offset = reserve.min(self.capacity);
        self.len = 0;
        self.use_count = 1;
        self.iface = None;
        self.dest = Ipv4Addr::UNSPECIFIED;
    }

    #[inline]
    pub(crate) fn use_count_mut(&mut self) -> &mut u32 {
        &mut self.use_count
    }

    #[inline]
    pub fn use_count(&self) -> u32 {
        self.use_count
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Free bytes in front of the payload.
    #[inline]
    pub fn headroom(&self) -> usize {
        self.offset
    }

    /// Free bytes behind the payload.
    #[inline]
    pub fn tailroom(&self) -> usize {
        self.capacity - self.offset - self.len
    }

    #[inline]
    pub fn iface(&self) -> Option<IfaceId> {
        self.iface
    }

    #[inline]
    pub fn set_iface(&mut self, iface: Option<IfaceId>) {
        self.iface = iface;
    }

    /// Protocol-level destination the IP layer routes on.
    #[inline]
    pub fn dest(&self) -> Ipv4Addr {
        self.dest
    }

    #[inline]
    pub fn set_dest(&mut self, dest: Ipv4Addr) {
        self.dest = dest;
    }

    #[inline]
    fn region(&self) -> &[u8] {
        let start = if self.guarded { GUARD_LEN } else { 0 };
        &self.data[start..start + self.capacity]
    }

    #[inline]
    fn region_mut(&mut self) -> &mut [u8] {
        let start = if self.guarded { GUARD_LEN } else { 0 };
        &mut self.data[start..start + self.capacity]
    }

    /// Current payload (headers already pushed included).
    pub fn payload(&self) -> &[u8] {
        &self.region()[self.offset..self.offset + self.len]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let (start, end) = (self.offset, self.offset + self.len);
        &mut self.region_mut()[start..end]
    }

    /// Sets the payload length; fails if it would run past the buffer.
    pub fn set_len(&mut self, len: usize) -> bool {
        if self.offset + len > self.capacity {
            return false;
        }
        self.len = len;
        true
    }

    /// Grows the payload at the tail and returns the new bytes.
    pub fn put_tail(&mut self, n: usize) -> Option<&mut [u8]> {
        if n > self.tailroom() {
            return None;
        }
        let start = self.offset + self.len;
        self.len += n;
        Some(&mut self.region_mut()[start..start + n])
    }

    /// Copies `bytes` behind the current payload.
    pub fn append(&mut self, bytes: &[u8]) -> bool {
        match self.put_tail(bytes.len()) {
            Some(dst) => {
                dst.copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    /// Grows the payload at the front and returns the new header bytes.
    pub fn push_header(&mut self, n: usize) -> Option<&mut [u8]> {
        if n > self.offset {
            return None;
        }
        self.offset -= n;
        self.len += n;
        let start = self.offset;
        Some(&mut self.region_mut()[start..start + n])
    }

    /// Strips `n` bytes from the front and returns them.
    pub fn pull_header(&mut self, n: usize) -> Option<&[u8]> {
        if n > self.len {
            return None;
        }
        let start = self.offset;
        self.offset += n;
        self.len -= n;
        Some(&self.region()[start..start + n])
    }

    #[inline]
    pub fn is_guarded(&self) -> bool {
        self.guarded
    }

    /// Both sentinels still hold [`GUARD_WORD`]. Always true when unguarded.
    pub fn guards_intact(&self) -> bool {
        if !self.guarded {
            return true;
        }
        let word = GUARD_WORD.to_be_bytes();
        self.data[..GUARD_LEN] == word && self.data[GUARD_LEN + self.capacity..] == word
    }

    #[cfg(test)]
    pub(crate) fn scribble_tail_guard(&mut self) {
        let end = self.data.len();
        self.data[end - 1] ^= 0xFF;
    }
}

impl fmt::Debug for PacketBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuf")
            .field("capacity", &self.capacity)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("use_count", &self.use_count)
            .field("iface", &self.iface)
            .field("dest", &self.dest)
            .finish()
    }
}

impl LinkArena for [PacketBuf] {
    #[inline]
    fn link(&self, item: usize) -> &Link {
        &self[item].link
    }

    #[inline]
    fn link_mut(&mut self, item: usize) -> &mut Link {
        &mut self[item].link
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_push_and_pull() {
        let mut buf = PacketBuf::new(64, false);
        buf.reset(20);
        assert!(buf.append(b"payload"));
        assert_eq!(buf.len(), 7);

        let hdr = buf.push_header(4).unwrap();
        hdr.copy_from_slice(b"HDR:");
        assert_eq!(buf.payload(), b"HDR:payload");
        assert_eq!(buf.headroom(), 16);

        assert_eq!(buf.pull_header(4).unwrap(), b"HDR:");
        assert_eq!(buf.payload(), b"payload");
    }

    #[test]
    fn push_beyond_headroom_fails() {
        let mut buf = PacketBuf::new(32, false);
        buf.reset(8);
        assert!(buf.push_header(9).is_none());
        assert_eq!(buf.offset(), 8);
    }

    #[test]
    fn tail_growth_is_bounded() {
        let mut buf = PacketBuf::new(16, false);
        buf.reset(10);
        assert!(buf.put_tail(6).is_some());
        assert!(buf.put_tail(1).is_none());
        assert!(!buf.set_len(7));
        assert!(buf.set_len(0));
    }

    #[test]
    fn guards_surround_region() {
        let mut buf = PacketBuf::new(8, true);
        buf.reset(0);
        assert!(buf.append(&[0xAA; 8]));
        assert!(buf.guards_intact());
        buf.scribble_tail_guard();
        assert!(!buf.guards_intact());
    }
}
