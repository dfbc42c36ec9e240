//! The loss detection state machine.
//!
//! One detector per connection. It owns the per-space sent-packet maps,
//! the RTT estimator, and the loss-detection alarm. The embedding
//! connection calls [`LossDetector::on_packet_sent`] for every outgoing
//! packet, [`LossDetector::on_ack_received`] for every parsed ACK frame,
//! and [`LossDetector::on_loss_detection_alarm`] when the alarm deadline
//! passes.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use core::time::Duration;

use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::packet::PacketNumberSpace;
use crate::recovery::rtt::RttEstimator;
use crate::recovery::{
    AckReceived, RecoveryObserver, SentPacket, DEFAULT_MAX_ACK_DELAY, GRANULARITY, INITIAL_RTT,
    MAX_PTO_PROBES, PACKET_THRESHOLD, TIME_THRESHOLD_DENOM, TIME_THRESHOLD_NUMER,
};
use crate::timer::Alarm;
use crate::types::{Instant, PacketNumber};

/// Loss state for one packet number space.
#[derive(Debug, Clone, Default)]
struct LossSpace {
    /// Highest packet number the peer has acknowledged.
    largest_acked: PacketNumber,

    /// Earliest time an unacked packet in this space crosses the time
    /// threshold; unset when no packet is a candidate.
    loss_time: Option<Instant>,

    /// Sent packets awaiting acknowledgement, keyed by packet number.
    /// Ordered so range scans and probe selection walk in number order.
    sent_packets: BTreeMap<PacketNumber, SentPacket>,
}

/// Per-connection loss detection state.
pub struct LossDetector {
    spaces: [LossSpace; PacketNumberSpace::COUNT],
    rtt: RttEstimator,
    alarm: Alarm,

    /// Consecutive crypto retransmission timeouts.
    crypto_count: u32,
    /// Consecutive probe timeouts.
    pto_count: u32,

    time_of_last_sent_ack_eliciting: Option<Instant>,
    time_of_last_sent_crypto: Option<Instant>,

    /// Sent packets with `is_ack_eliciting` not yet acked or lost.
    ack_eliciting_outstanding: u32,
    /// Sent packets with `is_crypto` not yet acked or lost.
    crypto_outstanding: u32,
}

impl LossDetector {
    pub fn new() -> Self {
        Self::with_max_ack_delay(DEFAULT_MAX_ACK_DELAY)
    }

    /// Build a detector honouring the peer's advertised maximum ACK
    /// delay.
    pub fn with_max_ack_delay(max_ack_delay: Duration) -> Self {
        Self {
            spaces: Default::default(),
            rtt: RttEstimator::new(max_ack_delay),
            alarm: Alarm::new(),
            crypto_count: 0,
            pto_count: 0,
            time_of_last_sent_ack_eliciting: None,
            time_of_last_sent_crypto: None,
            ack_eliciting_outstanding: 0,
            crypto_outstanding: 0,
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// The loss-detection alarm. The driver watches
    /// [`Alarm::expires_at`] and calls
    /// [`LossDetector::on_loss_detection_alarm`] once the deadline
    /// passes.
    pub fn alarm(&self) -> &Alarm {
        &self.alarm
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    #[cfg(test)]
    pub(crate) fn rtt_mut(&mut self) -> &mut RttEstimator {
        &mut self.rtt
    }

    pub fn ack_eliciting_outstanding(&self) -> u32 {
        self.ack_eliciting_outstanding
    }

    pub fn crypto_outstanding(&self) -> u32 {
        self.crypto_outstanding
    }

    pub fn crypto_count(&self) -> u32 {
        self.crypto_count
    }

    pub fn pto_count(&self) -> u32 {
        self.pto_count
    }

    pub fn largest_acked(&self, space: PacketNumberSpace) -> PacketNumber {
        self.spaces[space.index()].largest_acked
    }

    pub fn loss_time(&self, space: PacketNumberSpace) -> Option<Instant> {
        self.spaces[space.index()].loss_time
    }

    /// Number of packets still tracked in a space.
    pub fn tracked(&self, space: PacketNumberSpace) -> usize {
        self.spaces[space.index()].sent_packets.len()
    }

    pub fn is_tracked(&self, space: PacketNumberSpace, pn: PacketNumber) -> bool {
        self.spaces[space.index()].sent_packets.contains_key(&pn)
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Register a sent packet.
    ///
    /// Registering a packet number already tracked in its space is a
    /// programming error and is rejected; the existing record is left
    /// untouched.
    pub fn on_packet_sent(&mut self, packet: SentPacket) -> Result<()> {
        if self.spaces[packet.space.index()]
            .sent_packets
            .contains_key(&packet.packet_number)
        {
            error!(
                space = %packet.space,
                pn = packet.packet_number,
                "sent packet registered twice"
            );
            return Err(Error::Invariant("sent packet registered twice"));
        }

        if packet.is_crypto {
            self.crypto_outstanding += 1;
            self.time_of_last_sent_crypto = Some(packet.sent_at);
        }
        if packet.is_ack_eliciting {
            self.ack_eliciting_outstanding += 1;
            self.time_of_last_sent_ack_eliciting = Some(packet.sent_at);
        }

        debug!(
            space = %packet.space,
            pn = packet.packet_number,
            ack_eliciting = packet.is_ack_eliciting,
            crypto = packet.is_crypto,
            "packet sent"
        );
        self.spaces[packet.space.index()]
            .sent_packets
            .insert(packet.packet_number, packet);

        self.set_loss_detection_alarm();
        Ok(())
    }

    /// Process an ACK frame.
    ///
    /// Emits `packet_acked` for every newly acknowledged ack-eliciting
    /// packet (in range order), then any `packets_lost` this ACK
    /// reveals.
    pub fn on_ack_received(
        &mut self,
        ack: &AckReceived<'_>,
        now: Instant,
        observer: &mut dyn RecoveryObserver,
    ) {
        let space_id = ack.level.space();
        let space = &mut self.spaces[space_id.index()];
        space.largest_acked = space.largest_acked.max(ack.largest_acknowledged);

        // An RTT sample is only valid off the largest acknowledged
        // packet, and only the first time it is acknowledged; a
        // duplicate ACK for an already-removed packet must not touch
        // the estimator.
        if let Some(packet) = space.sent_packets.get(&ack.largest_acknowledged) {
            if packet.is_ack_eliciting {
                let latest = now.saturating_duration_since(packet.sent_at);
                self.rtt.update(latest, ack.ack_delay);
            }
        }

        let mut acked_ack_eliciting = false;
        for range in ack.ranges {
            for pn in range.smallest..=range.largest {
                if let Some(packet) = self.spaces[space_id.index()].sent_packets.remove(&pn) {
                    acked_ack_eliciting |= packet.is_ack_eliciting;
                    self.on_packet_acked(packet, observer);
                }
            }
        }

        self.detect_lost_packets(space_id, now, observer);

        if acked_ack_eliciting && self.pto_count > 0 {
            observer.on_retransmission_timeout_verified();
        }
        self.crypto_count = 0;
        // Only forward progress resets the PTO backoff: an ACK that
        // acknowledges no ack-eliciting data leaves it in place.
        if acked_ack_eliciting {
            self.pto_count = 0;
        }

        self.set_loss_detection_alarm();
    }

    /// The alarm deadline passed; run the mode it was armed for.
    pub fn on_loss_detection_alarm(&mut self, now: Instant, observer: &mut dyn RecoveryObserver) {
        if self.crypto_outstanding > 0 {
            // Handshake retransmission: hand back every unacked crypto
            // packet, across all spaces.
            let mut retransmitted = 0usize;
            for space in &self.spaces {
                for packet in space.sent_packets.values().filter(|p| p.is_crypto) {
                    observer.on_retransmit(packet);
                    retransmitted += 1;
                }
            }
            self.crypto_count += 1;
            debug!(
                retransmitted,
                crypto_count = self.crypto_count,
                "crypto retransmission timeout"
            );
        } else {
            let (loss_time, space) = self.earliest_loss_time();
            if loss_time.is_some() {
                self.detect_lost_packets(space, now, observer);
            } else {
                // PTO: probe with ack-eliciting data, Initial space
                // first. Fewer candidates than probes is fine; the
                // caller may top up with PINGs.
                let mut probes = 0usize;
                'spaces: for space in &self.spaces {
                    for packet in space.sent_packets.values() {
                        if !packet.is_ack_eliciting {
                            continue;
                        }
                        observer.on_retransmit(packet);
                        probes += 1;
                        if probes == MAX_PTO_PROBES {
                            break 'spaces;
                        }
                    }
                }
                observer.on_pto_probe();
                self.pto_count += 1;
                debug!(probes, pto_count = self.pto_count, "probe timeout");
            }
        }

        self.set_loss_detection_alarm();
    }

    /// Tear down all recovery state; the alarm is cancelled and every
    /// sent-packet map emptied.
    pub fn reset(&mut self) {
        self.alarm.reset();
        for space in &mut self.spaces {
            space.sent_packets.clear();
            space.loss_time = None;
            space.largest_acked = 0;
        }
        self.crypto_count = 0;
        self.pto_count = 0;
        self.ack_eliciting_outstanding = 0;
        self.crypto_outstanding = 0;
        self.time_of_last_sent_ack_eliciting = None;
        self.time_of_last_sent_crypto = None;
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn on_packet_acked(&mut self, packet: SentPacket, observer: &mut dyn RecoveryObserver) {
        if packet.is_ack_eliciting {
            self.ack_eliciting_outstanding = self.ack_eliciting_outstanding.saturating_sub(1);
            observer.on_packet_acked(&packet);
        }
        if packet.is_crypto {
            self.crypto_outstanding = self.crypto_outstanding.saturating_sub(1);
        }
    }

    /// Scan one space for lost packets and recompute its loss time.
    fn detect_lost_packets(
        &mut self,
        space_id: PacketNumberSpace,
        now: Instant,
        observer: &mut dyn RecoveryObserver,
    ) {
        let loss_delay = {
            let rtt = self.rtt.latest_rtt().max(self.rtt.smoothed_rtt());
            ((rtt * TIME_THRESHOLD_NUMER) / TIME_THRESHOLD_DENOM).max(GRANULARITY)
        };

        let space = &mut self.spaces[space_id.index()];
        let largest_acked = space.largest_acked;

        let mut lost_pns = Vec::new();
        let mut loss_time: Option<Instant> = None;
        for (&pn, packet) in &space.sent_packets {
            let aged_out = now.saturating_duration_since(packet.sent_at) >= loss_delay;
            let below_threshold = pn.saturating_add(PACKET_THRESHOLD) < largest_acked;
            if aged_out || below_threshold {
                lost_pns.push(pn);
            } else if pn < largest_acked {
                let candidate = packet.sent_at.saturating_add(loss_delay);
                loss_time = Some(loss_time.map_or(candidate, |t| t.min(candidate)));
            }
        }
        space.loss_time = loss_time;

        if lost_pns.is_empty() {
            return;
        }
        let mut lost = Vec::with_capacity(lost_pns.len());
        for pn in lost_pns {
            if let Some(packet) = space.sent_packets.remove(&pn) {
                lost.push(packet);
            }
        }
        for packet in &lost {
            if packet.is_ack_eliciting {
                self.ack_eliciting_outstanding = self.ack_eliciting_outstanding.saturating_sub(1);
            }
            if packet.is_crypto {
                self.crypto_outstanding = self.crypto_outstanding.saturating_sub(1);
            }
        }
        debug!(space = %space_id, lost = lost.len(), "packets declared lost");
        observer.on_packets_lost(&lost);
    }

    /// Arm (or cancel) the alarm for the current state. The modes, in
    /// priority order:
    ///
    /// 1. Nothing ack-eliciting outstanding: cancel.
    /// 2. Crypto data outstanding: handshake retransmission timer,
    ///    based from the last crypto send, doubling per timeout.
    /// 3. A loss time set in any space: fire at the earliest one.
    /// 4. Otherwise: probe timeout, based from the last ack-eliciting
    ///    send, doubling per timeout.
    fn set_loss_detection_alarm(&mut self) {
        if self.ack_eliciting_outstanding == 0 {
            self.alarm.reset();
            return;
        }

        if self.crypto_outstanding > 0 {
            let duration = (self.rtt.smoothed_or(INITIAL_RTT) * 2 + self.rtt.max_ack_delay())
                .max(GRANULARITY)
                .saturating_mul(2u32.saturating_pow(self.crypto_count));
            if let Some(base) = self.time_of_last_sent_crypto {
                self.alarm.start(base, duration);
            }
            return;
        }

        let (loss_time, _) = self.earliest_loss_time();
        if let Some(deadline) = loss_time {
            self.alarm.schedule(deadline);
            return;
        }

        let duration = (self.rtt.smoothed_rtt() + self.rtt.rtt_var() * 4 + self.rtt.max_ack_delay())
            .max(GRANULARITY)
            .saturating_mul(2u32.saturating_pow(self.pto_count));
        if let Some(base) = self.time_of_last_sent_ack_eliciting {
            self.alarm.start(base, duration);
        }
    }

    /// The earliest loss time over all spaces and the space holding it;
    /// `(None, Initial)` when no space has one.
    fn earliest_loss_time(&self) -> (Option<Instant>, PacketNumberSpace) {
        let mut earliest = (
            self.spaces[PacketNumberSpace::Initial.index()].loss_time,
            PacketNumberSpace::Initial,
        );
        for space in [
            PacketNumberSpace::Handshake,
            PacketNumberSpace::ApplicationData,
        ] {
            if let Some(time) = self.spaces[space.index()].loss_time {
                if earliest.0.map_or(true, |cur| time < cur) {
                    earliest = (Some(time), space);
                }
            }
        }
        earliest
    }
}

impl Default for LossDetector {
    fn default() -> Self {
        Self::new()
    }
}
