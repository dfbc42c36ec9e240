//! Packet number encoding and decoding.
//!
//! Packet numbers are carried truncated to 1-4 bytes. The decoder
//! reconstructs the full 62-bit value from the truncated bits and the
//! next packet number the receiver expects.

#![forbid(unsafe_code)]

use crate::error::{Error, Result};
use crate::types::{PacketNumber, MAX_PACKET_NUMBER};

/// Width of an on-wire packet number field (1-4 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketNumberLen {
    One = 1,
    Two = 2,
    Three = 3,
    Four = 4,
}

impl PacketNumberLen {
    /// Convert from the two packet-number-length bits of the first
    /// header byte (valid for all values 0-3).
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => PacketNumberLen::One,
            1 => PacketNumberLen::Two,
            2 => PacketNumberLen::Three,
            _ => PacketNumberLen::Four,
        }
    }

    /// Convert to the encoded length bits.
    pub fn to_bits(self) -> u8 {
        (self as u8) - 1
    }

    /// Width in bytes.
    pub fn len(self) -> usize {
        self as usize
    }

    /// Width in bits.
    pub fn bits(self) -> u32 {
        (self as u32) * 8
    }
}

/// Parse a truncated packet number as a big-endian integer.
pub fn parse_truncated(bytes: &[u8], len: PacketNumberLen) -> Result<u32> {
    if bytes.len() < len.len() {
        return Err(Error::frame_encoding("truncated packet number field"));
    }
    let mut value = 0u32;
    for &byte in &bytes[..len.len()] {
        value = (value << 8) | byte as u32;
    }
    Ok(value)
}

/// Reconstruct a full 62-bit packet number.
///
/// Given the truncated value and the packet number the receiver expects
/// next (one past the highest received), pick the candidate congruent to
/// `truncated` modulo `2^bits` that is closest to `expected`; a tie goes
/// to the higher candidate.
pub fn reconstruct(expected: PacketNumber, truncated: u32, bits: u32) -> PacketNumber {
    let pn_win = 1u64 << bits;
    let pn_hwin = pn_win / 2;
    let pn_mask = pn_win - 1;

    let truncated = truncated as u64;
    let candidate = (expected & !pn_mask) | truncated;

    if expected >= pn_hwin
        && candidate <= expected - pn_hwin
        && candidate < (1u64 << 62) - pn_win
    {
        candidate + pn_win
    } else if candidate > expected + pn_hwin && candidate >= pn_win {
        candidate - pn_win
    } else {
        candidate
    }
}

/// Smallest width able to carry `pn` unambiguously given the peer has
/// acknowledged everything up to `largest_acked`.
pub fn minimal_len(pn: PacketNumber, largest_acked: PacketNumber) -> PacketNumberLen {
    let num_unacked = pn.saturating_sub(largest_acked);

    if num_unacked < (1u64 << 7) {
        PacketNumberLen::One
    } else if num_unacked < (1u64 << 15) {
        PacketNumberLen::Two
    } else if num_unacked < (1u64 << 23) {
        PacketNumberLen::Three
    } else {
        PacketNumberLen::Four
    }
}

/// Write the truncated form of `pn` into `buf` big-endian.
pub fn encode_truncated(pn: PacketNumber, len: PacketNumberLen, buf: &mut [u8]) -> Result<()> {
    if pn > MAX_PACKET_NUMBER {
        return Err(Error::Invariant("packet number exceeds 62 bits"));
    }
    if buf.len() < len.len() {
        return Err(Error::Invariant("packet number buffer too small"));
    }
    for (i, slot) in buf[..len.len()].iter_mut().enumerate() {
        let shift = 8 * (len.len() - 1 - i);
        *slot = (pn >> shift) as u8;
    }
    Ok(())
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_len_from_bits_roundtrip() {
        for bits in 0..4u8 {
            let len = PacketNumberLen::from_bits(bits);
            assert_eq!(len.to_bits(), bits);
            assert_eq!(len.len(), bits as usize + 1);
        }
    }

    #[test]
    fn test_parse_truncated_widths() {
        assert_eq!(parse_truncated(&[0x42], PacketNumberLen::One).unwrap(), 0x42);
        assert_eq!(
            parse_truncated(&[0x12, 0x34], PacketNumberLen::Two).unwrap(),
            0x1234
        );
        assert_eq!(
            parse_truncated(&[0x12, 0x34, 0x56], PacketNumberLen::Three).unwrap(),
            0x123456
        );
        assert_eq!(
            parse_truncated(&[0x12, 0x34, 0x56, 0x78], PacketNumberLen::Four).unwrap(),
            0x12345678
        );
    }

    #[test]
    fn test_parse_truncated_short_buffer() {
        assert!(parse_truncated(&[0x12], PacketNumberLen::Two).is_err());
    }

    #[test]
    fn test_reconstruct_sequential() {
        assert_eq!(reconstruct(0, 0, 8), 0);
        assert_eq!(reconstruct(1, 1, 8), 1);
        assert_eq!(reconstruct(2, 2, 8), 2);
    }

    #[test]
    fn test_reconstruct_wraparound() {
        // After 255, a 1-byte truncation of 256 shows as 0.
        assert_eq!(reconstruct(256, 0, 8), 256);
        assert_eq!(reconstruct(65_536, 0, 16), 65_536);
    }

    #[test]
    fn test_reconstruct_draft_example() {
        // expected 0xa82f30eb, truncated 0x9b32 over 16 bits.
        assert_eq!(reconstruct(0xa82f30eb, 0x9b32, 16), 0xa82f9b32);
    }

    #[test]
    fn test_reconstruct_tie_prefers_higher() {
        // candidate is exactly half a window below expected: take the
        // higher alternative.
        assert_eq!(reconstruct(0x180, 0x00, 8), 0x200);
    }

    #[test]
    fn test_minimal_len_boundaries() {
        assert_eq!(minimal_len(10, 5), PacketNumberLen::One);
        assert_eq!(minimal_len(200, 5), PacketNumberLen::Two);
        assert_eq!(minimal_len(50_000, 5), PacketNumberLen::Three);
        assert_eq!(minimal_len(10_000_000, 5), PacketNumberLen::Four);
    }

    #[test]
    fn test_encode_truncated() {
        let mut buf = [0u8; 4];
        encode_truncated(0x12345678, PacketNumberLen::Four, &mut buf).unwrap();
        assert_eq!(buf, [0x12, 0x34, 0x56, 0x78]);

        encode_truncated(0xabcd, PacketNumberLen::Two, &mut buf).unwrap();
        assert_eq!(&buf[..2], &[0xab, 0xcd]);
    }

    proptest! {
        /// Any packet number within half a window of the expected value
        /// survives a truncate/reconstruct round trip.
        #[test]
        fn prop_reconstruct_roundtrip(
            pn in 0u64..=(1u64 << 48),
            offset in -127i64..=127,
        ) {
            for len in [
                PacketNumberLen::One,
                PacketNumberLen::Two,
                PacketNumberLen::Three,
                PacketNumberLen::Four,
            ] {
                let hwin = 1i64 << (len.bits() - 1);
                // Scale the offset into this width's window.
                let offset = offset.saturating_mul(hwin / 128).clamp(-(hwin - 1), hwin - 1);
                let expected = pn.saturating_add_signed(offset);
                let truncated = (pn & ((1u64 << len.bits()) - 1)) as u32;
                prop_assert_eq!(reconstruct(expected, truncated, len.bits()), pn);
            }
        }
    }
}
