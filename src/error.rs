//! Error types for header processing and loss recovery.

use thiserror::Error;

/// Transport error codes surfaced on the wire in CONNECTION_CLOSE frames.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorCode {
    /// No error (0x00).
    #[error("no error")]
    NoError,

    /// Internal error (0x01).
    #[error("internal error")]
    InternalError,

    /// Frame encoding error (0x07).
    #[error("frame encoding error")]
    FrameEncodingError,

    /// Version negotiation error (0x09).
    #[error("version negotiation error")]
    VersionNegotiationError,

    /// Protocol violation (0x0A).
    #[error("protocol violation")]
    ProtocolViolation,
}

impl TransportErrorCode {
    /// Convert error code to wire format.
    pub fn to_wire(self) -> u64 {
        match self {
            TransportErrorCode::NoError => 0x00,
            TransportErrorCode::InternalError => 0x01,
            TransportErrorCode::FrameEncodingError => 0x07,
            TransportErrorCode::VersionNegotiationError => 0x09,
            TransportErrorCode::ProtocolViolation => 0x0A,
        }
    }

    /// Convert wire format error code to an error code.
    ///
    /// Unknown codes map to `InternalError`.
    pub fn from_wire(code: u64) -> Self {
        match code {
            0x00 => TransportErrorCode::NoError,
            0x07 => TransportErrorCode::FrameEncodingError,
            0x09 => TransportErrorCode::VersionNegotiationError,
            0x0A => TransportErrorCode::ProtocolViolation,
            _ => TransportErrorCode::InternalError,
        }
    }
}

/// Errors produced while processing inbound packets.
///
/// The three kinds carry different consequences for the connection:
/// a [`Error::Quic`] closes it, an [`Error::IgnorePacket`] drops only the
/// offending datagram, and an [`Error::Invariant`] signals a programmer
/// error after which the connection must be aborted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Connection-fatal; surfaced on the wire as CONNECTION_CLOSE.
    #[error("{code}: {detail}")]
    Quic {
        code: TransportErrorCode,
        detail: &'static str,
    },

    /// Drop the offending datagram and keep the connection alive.
    #[error("ignoring packet: {0}")]
    IgnorePacket(&'static str),

    /// A broken internal invariant. Logged loudly by the site that
    /// detects it; the connection is not recoverable.
    #[error("invariant violated: {0}")]
    Invariant(&'static str),
}

impl Error {
    pub fn protocol_violation(detail: &'static str) -> Self {
        Error::Quic {
            code: TransportErrorCode::ProtocolViolation,
            detail,
        }
    }

    pub fn version_negotiation(detail: &'static str) -> Self {
        Error::Quic {
            code: TransportErrorCode::VersionNegotiationError,
            detail,
        }
    }

    pub fn frame_encoding(detail: &'static str) -> Self {
        Error::Quic {
            code: TransportErrorCode::FrameEncodingError,
            detail,
        }
    }

    /// Whether this error tears the connection down.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::IgnorePacket(_))
    }
}

pub type Result<T> = core::result::Result<T, Error>;
