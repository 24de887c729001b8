//! ## emnet-protocols::checksum
//! RFC 1071 internet checksum: ones'-complement sum of 16-bit big-endian words.

/// Folded ones'-complement sum of `data`, an odd trailing byte padded with zero.
pub fn ones_complement_sum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = data.chunks_exact(2);
    for w in &mut words {
        sum += u16::from_be_bytes([w[0], w[1]]) as u32;
    }
    if let [last] = words.remainder() {
        sum += (*last as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum as u16
}

/// Checksum to store in a header whose checksum field is zero.
#[inline]
pub fn internet_checksum(data: &[u8]) -> u16 {
    !ones_complement_sum(data)
}

/// A header that carries its own checksum sums to `0xffff`.
#[inline]
pub fn verify(data: &[u8]) -> bool {
    ones_complement_sum(data) == 0xffff
}
