//! # quend: Draft-QUIC Endpoint Core
//!
//! This crate implements the two subsystems at the heart of a QUIC
//! transport endpoint:
//!
//! - **Packet header processing**: parsing long/short/version-negotiation
//!   headers, removing header protection from the packet number field,
//!   reconstructing full 62-bit packet numbers, classifying packets into
//!   their packet number space, and tracking the latency spin bit.
//! - **Loss detection and recovery**: per-space sent-packet tracking, RTT
//!   estimation, time-threshold and packet-threshold loss inference, the
//!   multi-mode retransmission alarm (crypto retransmission, loss-time,
//!   PTO), and probe scheduling.
//!
//! ## Design Principles
//!
//! 1. **Pure State Machine**: No I/O, sockets, or event loops. The library
//!    processes inputs (packets, ACKs, time) and produces outputs (decoded
//!    headers, recovery events).
//!
//! 2. **Explicit Time**: Every time-dependent operation takes the current
//!    [`types::Instant`] as an argument. Tests drive the clock; production
//!    embeds a [`timer::Clock`].
//!
//! 3. **Pluggable Crypto**: Header protection removal is delegated to a
//!    [`crypto::HeaderProtectionKeys`] implementation owned by the TLS
//!    collaborator. This crate never touches key material.
//!
//! 4. **Explicit Observers**: Recovery outcomes (acked, lost, retransmit,
//!    probe) are delivered through [`recovery::RecoveryObserver`] in a
//!    documented order, not through an event bus.
//!
//! ## Module Guide
//!
//! ```text
//! quend/
//! ├── error      - Transport error codes and the crate error enum
//! ├── types      - Packet numbers, varints, connection IDs, instants
//! ├── timer      - Clock trait and the one-shot loss-detection alarm
//! ├── crypto     - Encryption levels and the header-protection seam
//! ├── packet     - Header parsing, packet-number codec, spaces, pipeline
//! └── recovery   - RTT estimation and the loss-detection state machine
//! ```

#![forbid(unsafe_code)]

/// Error types for header processing and loss recovery.
pub mod error;

/// Core wire-level types: packet numbers, varints, connection IDs, time.
pub mod types;

/// Monotonic clock trait and the cancellable one-shot alarm.
pub mod timer;

/// Encryption levels and the header-protection provider seam.
pub mod crypto;

/// Packet header parsing, packet-number codec, and the inbound pipeline.
pub mod packet;

/// Loss detection, RTT estimation, and recovery events.
pub mod recovery;

pub use error::{Error, Result, TransportErrorCode};
pub use timer::{Alarm, Clock};
pub use types::{ConnectionId, Instant, PacketNumber, Side};
pub use crypto::{EncryptionLevel, HeaderProtectionKeys};
pub use packet::{
    handler::{HeaderHandler, ProcessedHeader},
    header::{Header, LongType},
    PacketNumberSpace,
};
pub use recovery::{
    loss::LossDetector, rtt::RttEstimator, AckRange, AckReceived, RecoveryObserver, SentPacket,
};
