//! Loss detection and recovery.
//!
//! The recovery subsystem tracks every sent packet per packet number
//! space, infers loss from ACKs (packet threshold and time threshold),
//! and drives a single multi-mode alarm: crypto retransmission while
//! handshake data is outstanding, the earliest per-space loss time when
//! reordering is suspected, and the probe timeout (PTO) otherwise.
//!
//! Outcomes are delivered through the [`RecoveryObserver`] the
//! connection hands to each operation. Per ACK, every `packet_acked`
//! callback fires before any `packets_lost` callback; consumers (the
//! congestion controller, the ACK handler) can rely on that order.

#![forbid(unsafe_code)]

pub mod loss;
pub mod rtt;


use core::time::Duration;

use bytes::Bytes;

use crate::crypto::EncryptionLevel;
use crate::packet::PacketNumberSpace;
use crate::types::{Instant, PacketNumber};

// ============================================================================
// Loss Detection Constants
// ============================================================================

/// Reordering threshold in packets: a packet more than this many numbers
/// below the largest acknowledged is deemed lost.
pub const PACKET_THRESHOLD: u64 = 3;

/// Reordering threshold in time, as the ratio 9/8 applied to the larger
/// of the latest and smoothed RTT.
pub const TIME_THRESHOLD_NUMER: u32 = 9;
pub const TIME_THRESHOLD_DENOM: u32 = 8;

/// Loss-detection timer granularity; no timer or loss delay is shorter.
pub const GRANULARITY: Duration = Duration::from_millis(50);

/// RTT assumed before the first sample.
pub const INITIAL_RTT: Duration = Duration::from_millis(100);

/// Default maximum ACK delay, used unless the peer advertises another.
pub const DEFAULT_MAX_ACK_DELAY: Duration = Duration::from_millis(25);

/// Upper bound on probe transmissions per PTO firing.
pub const MAX_PTO_PROBES: usize = 2;

// ============================================================================
// Sent Packet Record
// ============================================================================

/// Metadata retained for every sent packet until it is acked or lost.
#[derive(Debug, Clone)]
pub struct SentPacket {
    pub packet_number: PacketNumber,
    pub space: PacketNumberSpace,
    pub sent_at: Instant,
    pub size_bytes: usize,
    /// Carries any frame other than ACK, PADDING, or CONNECTION_CLOSE.
    pub is_ack_eliciting: bool,
    /// Carries CRYPTO frames (handshake data).
    pub is_crypto: bool,
    /// Counts against the congestion window.
    pub in_flight: bool,
    /// Opaque frame payload, handed back on retransmission.
    pub frames: Bytes,
}

// ============================================================================
// ACK View
// ============================================================================

/// A contiguous range of acknowledged packet numbers, inclusive on both
/// ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckRange {
    pub smallest: PacketNumber,
    pub largest: PacketNumber,
}

/// The slice of an ACK frame the loss detector consumes.
///
/// The encryption level identifies the packet number space the ranges
/// refer to.
#[derive(Debug, Clone, Copy)]
pub struct AckReceived<'a> {
    pub level: EncryptionLevel,
    pub largest_acknowledged: PacketNumber,
    /// Delay the peer reports between receiving `largest_acknowledged`
    /// and sending this ACK.
    pub ack_delay: Duration,
    pub ranges: &'a [AckRange],
}

// ============================================================================
// Observer
// ============================================================================

/// Recovery outcomes, delivered synchronously and in order.
///
/// `on_retransmit` hands back a packet whose frames should be re-sent in
/// a fresh packet: all unacked crypto packets on a crypto retransmission
/// timeout, or up to [`MAX_PTO_PROBES`] ack-eliciting packets on a PTO.
/// The original packet stays tracked until it is acked or declared lost.
pub trait RecoveryObserver {
    fn on_packet_acked(&mut self, packet: &SentPacket);

    fn on_packets_lost(&mut self, packets: &[SentPacket]);

    fn on_retransmit(&mut self, packet: &SentPacket);

    /// A PTO fired; the probes were delivered through `on_retransmit`.
    fn on_pto_probe(&mut self);

    /// An ACK acknowledged ack-eliciting data while probes were in
    /// flight.
    fn on_retransmission_timeout_verified(&mut self) {}

    /// Reserved for ECN feedback.
    fn on_ecn_ack(&mut self, _ack: &AckReceived<'_>) {}
}
