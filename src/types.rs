//! Core wire-level types used throughout the crate.
//!
//! Packet numbers, the variable-length integer decoder, connection IDs,
//! endpoint sides, and the monotonic time abstraction that lets tests
//! drive the clock deterministically.

#![forbid(unsafe_code)]

use core::time::Duration;

use bytes::Bytes;

// ============================================================================
// Packet Number
// ============================================================================

/// Packet Number - monotonically increasing per packet number space.
///
/// Packet numbers are 62-bit integers. On the wire they are truncated to
/// 1-4 bytes and header-protected; see [`crate::packet::number`].
pub type PacketNumber = u64;

/// Maximum packet number value (2^62 - 1).
pub const MAX_PACKET_NUMBER: u64 = (1u64 << 62) - 1;

// ============================================================================
// Variable-Length Integer Decoding
// ============================================================================

/// Maximum value representable as a varint (2^62 - 1).
pub const VARINT_MAX: u64 = (1u64 << 62) - 1;

/// Variable-length integer decoder.
///
/// The first two bits of the first byte give the encoded length:
/// 00=1 byte, 01=2 bytes, 10=4 bytes, 11=8 bytes.
pub struct VarIntCodec;

impl VarIntCodec {
    /// Decode a varint from the front of `buf`, returning
    /// `(value, bytes_consumed)`, or `None` if the buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<(u64, usize)> {
        let first = *buf.first()?;
        let len = 1usize << (first >> 6);
        if buf.len() < len {
            return None;
        }

        let mut value = (first & 0x3f) as u64;
        for &byte in &buf[1..len] {
            value = (value << 8) | byte as u64;
        }
        Some((value, len))
    }
}

// ============================================================================
// Connection ID
// ============================================================================

/// Maximum length of a connection ID (20 bytes).
pub const MAX_CID_LENGTH: usize = 20;

/// Connection ID - opaque byte sequence chosen by an endpoint.
///
/// Zero-length connection IDs are permitted.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId {
    bytes: Bytes,
}

impl ConnectionId {
    /// Create a new ConnectionId from bytes.
    ///
    /// Returns None if length exceeds [`MAX_CID_LENGTH`].
    pub fn new(bytes: Bytes) -> Option<Self> {
        if bytes.len() > MAX_CID_LENGTH {
            return None;
        }
        Some(Self { bytes })
    }

    /// Create from a borrowed slice (copies data).
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() > MAX_CID_LENGTH {
            return None;
        }
        Some(Self {
            bytes: Bytes::copy_from_slice(slice),
        })
    }

    /// Create an empty (zero-length) connection ID.
    pub fn empty() -> Self {
        Self {
            bytes: Bytes::new(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl core::fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ConnectionId({:02x?})", &self.bytes[..])
    }
}

impl core::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for byte in &self.bytes[..] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

// ============================================================================
// Side (Client vs Server)
// ============================================================================

/// Connection endpoint side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    pub fn is_client(self) -> bool {
        matches!(self, Side::Client)
    }

    pub fn is_server(self) -> bool {
        matches!(self, Side::Server)
    }
}

// ============================================================================
// Time Abstraction
// ============================================================================

/// Monotonic timestamp.
///
/// The crate never reads a system clock; callers supply instants from a
/// [`crate::timer::Clock`]. This keeps loss-detection behavior fully
/// deterministic under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant {
    /// Nanoseconds since an arbitrary epoch.
    nanos: u64,
}

impl Instant {
    pub const ZERO: Instant = Instant { nanos: 0 };

    pub fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self {
            nanos: millis.saturating_mul(1_000_000),
        }
    }

    pub fn as_nanos(&self) -> u64 {
        self.nanos
    }

    pub fn as_millis(&self) -> u64 {
        self.nanos / 1_000_000
    }

    /// Duration since another instant, or `None` if `other` is later.
    pub fn duration_since(&self, other: Instant) -> Option<Duration> {
        self.nanos
            .checked_sub(other.nanos)
            .map(Duration::from_nanos)
    }

    /// Duration since another instant, zero if `other` is later.
    pub fn saturating_duration_since(&self, other: Instant) -> Duration {
        Duration::from_nanos(self.nanos.saturating_sub(other.nanos))
    }

    pub fn checked_add(&self, duration: Duration) -> Option<Instant> {
        let nanos = u64::try_from(duration.as_nanos()).ok()?;
        self.nanos.checked_add(nanos).map(|n| Instant { nanos: n })
    }

    pub fn saturating_add(&self, duration: Duration) -> Instant {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        Instant {
            nanos: self.nanos.saturating_add(nanos),
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_decode_lengths() {
        assert_eq!(VarIntCodec::decode(&[0x25]), Some((0x25, 1)));
        assert_eq!(VarIntCodec::decode(&[0x7b, 0xbd]), Some((0x3bbd, 2)));
        assert_eq!(
            VarIntCodec::decode(&[0x9d, 0x7f, 0x3e, 0x7d]),
            Some((494_878_333, 4))
        );
        assert_eq!(
            VarIntCodec::decode(&[0xc2, 0x19, 0x7c, 0x5e, 0xff, 0x14, 0xe8, 0x8c]),
            Some((151_288_809_941_952_652, 8))
        );
    }

    #[test]
    fn test_varint_decode_short_buffer() {
        assert_eq!(VarIntCodec::decode(&[]), None);
        assert_eq!(VarIntCodec::decode(&[0x7b]), None);
        assert_eq!(VarIntCodec::decode(&[0x9d, 0x7f, 0x3e]), None);
    }

    #[test]
    fn test_connection_id_length_limit() {
        assert!(ConnectionId::from_slice(&[0u8; 20]).is_some());
        assert!(ConnectionId::from_slice(&[0u8; 21]).is_none());
        assert!(ConnectionId::empty().is_empty());
    }

    #[test]
    fn test_connection_id_display() {
        let cid = ConnectionId::from_slice(&[0xde, 0xad, 0xbe, 0xef]).unwrap();
        assert_eq!(cid.to_string(), "deadbeef");
    }

    #[test]
    fn test_instant_arithmetic() {
        let t0 = Instant::from_millis(100);
        let t1 = Instant::from_millis(250);

        assert_eq!(t1.duration_since(t0), Some(Duration::from_millis(150)));
        assert_eq!(t0.duration_since(t1), None);
        assert_eq!(t0.saturating_duration_since(t1), Duration::ZERO);
        assert_eq!(
            t0.checked_add(Duration::from_millis(50)),
            Some(Instant::from_millis(150))
        );
        assert_eq!(t1.as_millis(), 250);
    }
}
