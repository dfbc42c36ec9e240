//! Wire parsing of packet headers.
//!
//! Parsing stops at the packet number field: the packet number length
//! bits of the first byte are still header-protected at this stage, so
//! the parser records where the protected field begins and leaves the
//! number itself to [`crate::packet::handler`].

use bytes::{Buf, Bytes};
use thiserror::Error;

use crate::crypto::EncryptionLevel;
use crate::error::Error as CrateError;
use crate::packet::PacketNumberSpace;
use crate::types::{ConnectionId, PacketNumber, VarIntCodec};

/// Long header packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LongType {
    Initial,
    ZeroRtt,
    Handshake,
    Retry,
}

/// A parsed packet header.
///
/// `packet_number` is `None` until header protection has been removed;
/// Retry and Version Negotiation packets never carry one.
#[derive(Debug, Clone)]
pub enum Header {
    Long {
        ty: LongType,
        version: u32,
        dcid: ConnectionId,
        scid: ConnectionId,
        /// Address validation token; Initial packets only. For Retry
        /// packets the token is the remainder of the datagram.
        token: Option<Bytes>,
        /// Declared length of packet number plus payload. Adjusted to
        /// the payload alone once the packet number is decoded.
        payload_length: u64,
        packet_number: Option<PacketNumber>,
    },
    Short {
        dcid: ConnectionId,
        /// Latency spin bit; visible on the wire, not header-protected.
        spin: bool,
        /// Key phase bit; only meaningful after header protection removal.
        key_phase: bool,
        packet_number: Option<PacketNumber>,
    },
    VersionNegotiation {
        dcid: ConnectionId,
        scid: ConnectionId,
        versions: Vec<u32>,
    },
}

/// Header plus the offset of its protected packet number field within
/// the datagram. For Retry and Version Negotiation packets (no packet
/// number), `pn_offset` is the end of the parsed header.
#[derive(Debug, Clone)]
pub struct ParsedHeader {
    pub header: Header,
    pub pn_offset: usize,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    #[error("buffer too short")]
    BufferTooShort,
    #[error("connection ID too long")]
    InvalidCidLength,
    #[error("malformed varint")]
    InvalidVarInt,
}

impl From<HeaderError> for CrateError {
    fn from(err: HeaderError) -> Self {
        match err {
            HeaderError::BufferTooShort => CrateError::frame_encoding("header truncated"),
            HeaderError::InvalidCidLength => {
                CrateError::frame_encoding("connection ID exceeds 20 bytes")
            }
            HeaderError::InvalidVarInt => CrateError::frame_encoding("malformed varint"),
        }
    }
}

impl Header {
    /// Parse a header from the front of a datagram.
    ///
    /// `local_dcid_len` is the length of connection IDs this endpoint
    /// issues, needed to delimit short headers.
    pub fn parse(datagram: &[u8], local_dcid_len: usize) -> Result<ParsedHeader, HeaderError> {
        let mut buf = datagram;
        if !buf.has_remaining() {
            return Err(HeaderError::BufferTooShort);
        }

        let is_long = (buf.chunk()[0] & 0x80) != 0;
        let parsed = if is_long {
            Self::parse_long(&mut buf)?
        } else {
            Self::parse_short(&mut buf, local_dcid_len)?
        };

        Ok(ParsedHeader {
            header: parsed,
            pn_offset: datagram.len() - buf.remaining(),
        })
    }

    fn parse_long(buf: &mut &[u8]) -> Result<Header, HeaderError> {
        if buf.remaining() < 5 {
            return Err(HeaderError::BufferTooShort);
        }
        let first = buf.get_u8();
        let version = buf.get_u32();

        let dcid = parse_cid(buf)?;
        let scid = parse_cid(buf)?;

        if version == 0 {
            // Version Negotiation: the rest is a list of 4-byte versions.
            let mut versions = Vec::with_capacity(buf.remaining() / 4);
            while buf.remaining() >= 4 {
                versions.push(buf.get_u32());
            }
            return Ok(Header::VersionNegotiation {
                dcid,
                scid,
                versions,
            });
        }

        let ty = match (first & 0x30) >> 4 {
            0x0 => LongType::Initial,
            0x1 => LongType::ZeroRtt,
            0x2 => LongType::Handshake,
            _ => LongType::Retry,
        };

        if ty == LongType::Retry {
            // No length or packet number; the remainder is the token.
            let token = buf.copy_to_bytes(buf.remaining());
            return Ok(Header::Long {
                ty,
                version,
                dcid,
                scid,
                token: Some(token),
                payload_length: 0,
                packet_number: None,
            });
        }

        let token = if ty == LongType::Initial {
            let token_len = parse_varint(buf)? as usize;
            if buf.remaining() < token_len {
                return Err(HeaderError::BufferTooShort);
            }
            Some(buf.copy_to_bytes(token_len))
        } else {
            None
        };

        let payload_length = parse_varint(buf)?;

        Ok(Header::Long {
            ty,
            version,
            dcid,
            scid,
            token,
            payload_length,
            packet_number: None,
        })
    }

    fn parse_short(buf: &mut &[u8], local_dcid_len: usize) -> Result<Header, HeaderError> {
        if buf.remaining() < 1 + local_dcid_len {
            return Err(HeaderError::BufferTooShort);
        }
        let first = buf.get_u8();
        let dcid_bytes = buf.copy_to_bytes(local_dcid_len);
        let dcid =
            ConnectionId::new(dcid_bytes).ok_or(HeaderError::InvalidCidLength)?;

        Ok(Header::Short {
            dcid,
            spin: (first & 0x20) != 0,
            // Under header protection until the handler unmasks it.
            key_phase: false,
            packet_number: None,
        })
    }

    /// The packet number space this packet is numbered in, or `None`
    /// for packets that carry no packet number.
    pub fn space(&self) -> Option<PacketNumberSpace> {
        match self {
            Header::Long {
                ty: LongType::Initial,
                ..
            } => Some(PacketNumberSpace::Initial),
            Header::Long {
                ty: LongType::Handshake,
                ..
            } => Some(PacketNumberSpace::Handshake),
            Header::Long {
                ty: LongType::ZeroRtt,
                ..
            } => Some(PacketNumberSpace::ApplicationData),
            Header::Long {
                ty: LongType::Retry,
                ..
            } => None,
            Header::Short { .. } => Some(PacketNumberSpace::ApplicationData),
            Header::VersionNegotiation { .. } => None,
        }
    }

    /// The encryption level whose keys protect this packet.
    pub fn encryption_level(&self) -> Option<EncryptionLevel> {
        match self {
            Header::Long {
                ty: LongType::Initial | LongType::Retry,
                ..
            } => Some(EncryptionLevel::Initial),
            Header::Long {
                ty: LongType::Handshake,
                ..
            } => Some(EncryptionLevel::Handshake),
            Header::Long {
                ty: LongType::ZeroRtt,
                ..
            } => Some(EncryptionLevel::ZeroRtt),
            Header::Short { .. } => Some(EncryptionLevel::OneRtt),
            Header::VersionNegotiation { .. } => None,
        }
    }

    pub fn packet_number(&self) -> Option<PacketNumber> {
        match self {
            Header::Long { packet_number, .. } | Header::Short { packet_number, .. } => {
                *packet_number
            }
            Header::VersionNegotiation { .. } => None,
        }
    }

    pub fn is_long(&self) -> bool {
        matches!(self, Header::Long { .. } | Header::VersionNegotiation { .. })
    }
}

fn parse_cid(buf: &mut &[u8]) -> Result<ConnectionId, HeaderError> {
    if buf.remaining() < 1 {
        return Err(HeaderError::BufferTooShort);
    }
    let len = buf.get_u8() as usize;
    if buf.remaining() < len {
        return Err(HeaderError::BufferTooShort);
    }
    ConnectionId::new(buf.copy_to_bytes(len)).ok_or(HeaderError::InvalidCidLength)
}

fn parse_varint(buf: &mut &[u8]) -> Result<u64, HeaderError> {
    let (value, consumed) =
        VarIntCodec::decode(buf.chunk()).ok_or(HeaderError::InvalidVarInt)?;
    buf.advance(consumed);
    Ok(value)
}

// ============================================================================
// Unit Tests
// ============================================================================
