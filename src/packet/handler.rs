//! The inbound header processing pipeline.
//!
//! Given a parsed header and the datagram it came from, the handler
//! checks the version gate, selects the header-protection context from
//! the header form, unmasks and reconstructs the packet number, updates
//! the packet number space, and performs header-type-specific tail work
//! (payload length correction, spin bit tracking).
//!
//! Payload decryption and authentication happen in a later stage. A
//! packet that fails there has already raised `highest_received`; the
//! mark is never rolled back.

use tracing::debug;

use crate::crypto::{HeaderProtectionKeys, ProtectedBytes, MAX_PN_LEN, SAMPLE_LEN};
use crate::error::{Error, Result};
use crate::packet::header::{Header, LongType};
use crate::packet::number::{self, PacketNumberLen};
use crate::packet::space::PacketSpaceSet;
use crate::types::Side;

/// The draft version this endpoint speaks.
pub const DRAFT_VERSION: u32 = 0xff00_0013;

/// A header with its packet number decoded, plus the offset of the
/// payload (past the packet number field) within the datagram.
#[derive(Debug, Clone)]
pub struct ProcessedHeader {
    pub header: Header,
    pub payload_offset: usize,
}

/// Per-connection header processing state.
pub struct HeaderHandler {
    side: Side,
    supported_versions: Vec<u32>,
    /// Set once the TLS layer has committed to a version; from then on
    /// an unsupported version on an established connection is fatal.
    version_pinned: bool,
    spaces: PacketSpaceSet,
    /// The spin bit value this endpoint will put in its next short
    /// header packet.
    spin_bit: bool,
}

impl HeaderHandler {
    pub fn new(side: Side) -> Self {
        Self::with_versions(side, vec![DRAFT_VERSION])
    }

    pub fn with_versions(side: Side, supported_versions: Vec<u32>) -> Self {
        Self {
            side,
            supported_versions,
            version_pinned: false,
            spaces: PacketSpaceSet::new(),
            spin_bit: false,
        }
    }

    /// Mark version negotiation as settled. Called by the TLS
    /// collaborator once a version is committed.
    pub fn pin_version(&mut self) {
        self.version_pinned = true;
    }

    /// The spin bit to send in outgoing short headers.
    pub fn spin_bit(&self) -> bool {
        self.spin_bit
    }

    pub fn spaces(&self) -> &PacketSpaceSet {
        &self.spaces
    }

    pub fn spaces_mut(&mut self) -> &mut PacketSpaceSet {
        &mut self.spaces
    }

    /// Run the pipeline over one packet.
    ///
    /// `pn_offset` is where the protected packet number field starts in
    /// `datagram` (from [`Header::parse`]). Version Negotiation and
    /// Retry packets carry no packet number and are returned untouched.
    pub fn process(
        &mut self,
        header: Header,
        datagram: &[u8],
        pn_offset: usize,
        keys: &dyn HeaderProtectionKeys,
    ) -> Result<ProcessedHeader> {
        if let Header::VersionNegotiation { .. } = header {
            return Ok(ProcessedHeader {
                header,
                payload_offset: pn_offset,
            });
        }

        self.check_version(&header)?;

        if let Header::Long {
            ty: LongType::Retry,
            ..
        } = header
        {
            return Ok(ProcessedHeader {
                header,
                payload_offset: pn_offset,
            });
        }

        // The packet number field is sampled at its maximum width: the
        // 16-byte sample always starts 4 bytes past the field.
        let sample_offset = pn_offset + MAX_PN_LEN;
        let Some(sample_bytes) = datagram.get(sample_offset..sample_offset + SAMPLE_LEN) else {
            return Err(Error::frame_encoding(
                "datagram too short for header protection sample",
            ));
        };
        let mut sample = [0u8; SAMPLE_LEN];
        sample.copy_from_slice(sample_bytes);

        let mut protected = ProtectedBytes::default();
        protected[0] = datagram[0];
        protected[1..].copy_from_slice(&datagram[pn_offset..pn_offset + MAX_PN_LEN]);

        let unmasked = match &header {
            Header::Long {
                ty: LongType::Initial,
                dcid,
                ..
            } => keys.initial_pn_decrypt(dcid, &sample, &protected)?,
            Header::Long {
                ty: LongType::Handshake,
                ..
            } => keys.handshake_pn_decrypt(&sample, &protected)?,
            Header::Long {
                ty: LongType::ZeroRtt,
                ..
            } => keys.zero_rtt_pn_decrypt(&sample, &protected)?,
            Header::Short { .. } => keys.one_rtt_pn_decrypt(&sample, &protected)?,
            Header::Long {
                ty: LongType::Retry,
                ..
            }
            | Header::VersionNegotiation { .. } => unreachable!("returned before unprotection"),
        };

        let pn_len = PacketNumberLen::from_bits(unmasked[0] & 0x03);
        let truncated = number::parse_truncated(&unmasked[1..], pn_len)?;

        let space_id = match header.space() {
            Some(space) => space,
            None => return Err(Error::Invariant("numbered packet without a number space")),
        };
        let space = self.spaces.get_mut(space_id);
        let pn = number::reconstruct(space.expected_pn(), truncated, pn_len.bits());
        let is_new_highest = space.record_received(pn);

        debug!(space = %space_id, pn, new_highest = is_new_highest, "packet number unprotected");

        let payload_offset = pn_offset + pn_len.len();
        let header = match header {
            Header::Long {
                ty,
                version,
                dcid,
                scid,
                token,
                payload_length,
                ..
            } => {
                // The length field covered the packet number; report the
                // payload alone from here on.
                let payload_length = payload_length
                    .checked_sub(pn_len.len() as u64)
                    .ok_or_else(|| {
                        Error::protocol_violation("length field shorter than packet number")
                    })?;
                Header::Long {
                    ty,
                    version,
                    dcid,
                    scid,
                    token,
                    payload_length,
                    packet_number: Some(pn),
                }
            }
            Header::Short { dcid, spin, .. } => {
                if is_new_highest {
                    // Client inverts the observed spin bit, server mirrors it.
                    self.spin_bit = match self.side {
                        Side::Client => !spin,
                        Side::Server => spin,
                    };
                }
                Header::Short {
                    dcid,
                    spin,
                    key_phase: (unmasked[0] & 0x04) != 0,
                    packet_number: Some(pn),
                }
            }
            Header::VersionNegotiation { .. } => unreachable!("returned before unprotection"),
        };

        Ok(ProcessedHeader {
            header,
            payload_offset,
        })
    }

    /// Server-side version gate for long header packets.
    fn check_version(&self, header: &Header) -> Result<()> {
        if !self.side.is_server() {
            return Ok(());
        }
        let (version, ty) = match header {
            Header::Long { version, ty, .. } => (*version, *ty),
            _ => return Ok(()),
        };
        if self.supported_versions.contains(&version) {
            return Ok(());
        }
        match ty {
            // The caller answers with a Version Negotiation packet.
            LongType::Initial => Err(Error::version_negotiation("unsupported client version")),
            LongType::ZeroRtt => Err(Error::IgnorePacket("0-RTT with unsupported version")),
            _ if !self.version_pinned => {
                Err(Error::IgnorePacket("unsupported version before commitment"))
            }
            _ => Err(Error::protocol_violation(
                "unsupported version on established connection",
            )),
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
