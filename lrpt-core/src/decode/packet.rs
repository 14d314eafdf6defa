//! VCDU and CP_PDU parsing.
//!
//! Each corrected 892-byte VCDU carries an M-PDU: a two-byte header
//! whose 11-bit first-header pointer locates the first CP_PDU start in
//! the 884-byte packet zone (2047 = continuation only). CP_PDUs cross
//! VCDU boundaries, so the assembler keeps the raw byte tail of an
//! unfinished packet and, above that, per-APID groups for segmented
//! packets (first/continuation/last). Sequence-count gaps invalidate
//! whatever was in progress for that APID and are counted as drops.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::decode::framing::VCDU_LEN;

/// Meteor-M2 spacecraft identifier.
pub const SCID_METEOR_M2: u8 = 0x54;

/// First-header-pointer value meaning "no packet starts here".
pub const FHP_NO_START: u16 = 2047;

/// All-ones APID: idle filler packets.
pub const APID_IDLE: u16 = 0x7FF;

/// Telemetry APID, counted but not forwarded to the image builder.
pub const APID_TELEMETRY: u16 = 70;

/// Offset of the M-PDU packet zone inside a VCDU.
const ZONE_START: usize = 8;

/// CP_PDU primary header length.
const PACKET_HEADER_LEN: usize = 6;

/// Secondary header: day number, milliseconds, microseconds.
const TIME_HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VcduInfo {
    pub version: u8,
    pub scid: u8,
    pub vcid: u8,
    pub counter: u32,
    pub replay: bool,
}

/// Parse the six-byte VCDU primary header.
pub fn parse_vcdu_info(vcdu: &[u8]) -> VcduInfo {
    VcduInfo {
        version: vcdu[0] >> 6,
        scid: ((vcdu[0] & 0x3F) << 2) | (vcdu[1] >> 6),
        vcid: vcdu[1] & 0x3F,
        counter: u32::from(vcdu[2]) << 16 | u32::from(vcdu[3]) << 8 | u32::from(vcdu[4]),
        replay: vcdu[5] & 0x80 != 0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqFlag {
    Continuation,
    First,
    Last,
    Standalone,
}

impl SeqFlag {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => SeqFlag::Continuation,
            1 => SeqFlag::First,
            2 => SeqFlag::Last,
            _ => SeqFlag::Standalone,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PacketHeader {
    version: u8,
    has_secondary: bool,
    apid: u16,
    flag: SeqFlag,
    sequence: u16,
    /// User-data length minus one, per CCSDS.
    length_field: u16,
}

impl PacketHeader {
    fn parse(raw: &[u8]) -> Self {
        let word0 = u16::from(raw[0]) << 8 | u16::from(raw[1]);
        let word1 = u16::from(raw[2]) << 8 | u16::from(raw[3]);
        let word2 = u16::from(raw[4]) << 8 | u16::from(raw[5]);
        Self {
            version: (word0 >> 13) as u8,
            has_secondary: word0 & 0x0800 != 0,
            apid: word0 & 0x07FF,
            flag: SeqFlag::from_bits((word1 >> 14) as u8),
            sequence: word1 & 0x3FFF,
            length_field: word2,
        }
    }

    fn total_len(&self) -> usize {
        PACKET_HEADER_LEN + self.length_field as usize + 1
    }
}

/// Onboard time from the CP_PDU secondary header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketTime {
    pub day: u16,
    pub msec: u32,
    pub usec: u16,
}

/// A fully reassembled source packet.
#[derive(Debug, Clone)]
pub struct SourcePacket {
    pub apid: u16,
    pub sequence: u16,
    pub time: Option<PacketTime>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AssemblerStats {
    pub vcdus: u64,
    pub skipped_vcdus: u64,
    pub counter_gaps: u64,
    pub packets: u64,
    pub idle_packets: u64,
    pub telemetry_packets: u64,
    /// Sequence-gap events: an in-progress packet was discarded.
    pub drops: u64,
}

/// In-progress segmented packet for one APID.
struct Group {
    sequence: u16,
    time: Option<PacketTime>,
    data: Vec<u8>,
}

pub struct PacketAssembler {
    expected_scid: u8,
    last_counter: Option<u32>,
    /// Raw bytes of a CP_PDU still crossing VCDU boundaries.
    tail: Vec<u8>,
    groups: HashMap<u16, Group>,
    last_sequence: HashMap<u16, u16>,
    stats: AssemblerStats,
}

impl PacketAssembler {
    pub fn new(expected_scid: u8) -> Self {
        Self {
            expected_scid,
            last_counter: None,
            tail: Vec::new(),
            groups: HashMap::new(),
            last_sequence: HashMap::new(),
            stats: AssemblerStats::default(),
        }
    }

    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    /// Consume one corrected VCDU, appending completed packets to `out`.
    pub fn process_vcdu(&mut self, vcdu: &[u8; VCDU_LEN], out: &mut Vec<SourcePacket>) {
        let info = parse_vcdu_info(vcdu);
        if info.version != 1 || info.scid != self.expected_scid || info.vcid > 3 {
            debug!(?info, "skipping foreign VCDU");
            self.stats.skipped_vcdus += 1;
            return;
        }
        self.stats.vcdus += 1;

        // A jump in the VCDU counter means frames were lost; whatever
        // packet tail was being carried is unusable.
        if let Some(last) = self.last_counter {
            if info.counter != (last + 1) & 0x00FF_FFFF && !self.tail.is_empty() {
                self.stats.counter_gaps += 1;
                self.stats.drops += 1;
                self.tail.clear();
            }
        }
        self.last_counter = Some(info.counter);

        let fhp = (u16::from(vcdu[6]) & 0x07) << 8 | u16::from(vcdu[7]);
        let zone = &vcdu[ZONE_START..];

        if fhp == FHP_NO_START {
            // Continuation only: no packet may start in this VCDU.
            if !self.tail.is_empty() {
                self.tail.extend_from_slice(zone);
                self.drain_tail(out);
            }
            return;
        }

        let fhp = fhp as usize;
        if fhp > zone.len() {
            warn!(fhp, "first-header pointer outside packet zone");
            self.stats.skipped_vcdus += 1;
            return;
        }

        if !self.tail.is_empty() {
            // The carried packet must finish exactly where the first
            // header starts, or the stream is inconsistent.
            if self.tail.len() >= PACKET_HEADER_LEN {
                let needed = PacketHeader::parse(&self.tail).total_len() - self.tail.len();
                if needed != fhp {
                    debug!(needed, fhp, "inconsistent continuation, dropping tail");
                    self.stats.drops += 1;
                    self.tail.clear();
                } else {
                    self.tail.extend_from_slice(&zone[..fhp]);
                }
            } else {
                self.tail.extend_from_slice(&zone[..fhp]);
            }
        }
        self.tail.extend_from_slice(&zone[fhp..]);
        self.drain_tail(out);
    }

    /// Parse every complete packet sitting at the head of the tail
    /// buffer; leave the incomplete remainder for the next VCDU.
    fn drain_tail(&mut self, out: &mut Vec<SourcePacket>) {
        loop {
            if self.tail.len() < PACKET_HEADER_LEN {
                return;
            }
            let header = PacketHeader::parse(&self.tail);
            let total = header.total_len();
            if self.tail.len() < total {
                return;
            }
            let raw: Vec<u8> = self.tail.drain(..total).collect();
            self.handle_packet(header, &raw, out);
        }
    }

    fn handle_packet(&mut self, header: PacketHeader, raw: &[u8], out: &mut Vec<SourcePacket>) {
        if header.version != 0 {
            // Source packets are version 000; anything else is stream
            // corruption that slipped past the ECC.
            debug!(version = header.version, "discarding bad packet header");
            self.stats.drops += 1;
            return;
        }
        self.stats.packets += 1;

        if header.apid == APID_IDLE {
            self.stats.idle_packets += 1;
            return;
        }

        // Per-APID sequence continuity.
        if let Some(&last) = self.last_sequence.get(&header.apid) {
            let expected = (last + 1) & 0x3FFF;
            if header.sequence != expected {
                self.stats.drops += 1;
                if self.groups.remove(&header.apid).is_some() {
                    debug!(apid = header.apid, "sequence gap, group discarded");
                }
            }
        }
        self.last_sequence.insert(header.apid, header.sequence);

        if header.apid == APID_TELEMETRY {
            self.stats.telemetry_packets += 1;
            return;
        }

        let mut body = &raw[PACKET_HEADER_LEN..];
        let mut time = None;
        if header.has_secondary && body.len() >= TIME_HEADER_LEN {
            time = Some(PacketTime {
                day: u16::from(body[0]) << 8 | u16::from(body[1]),
                msec: u32::from_be_bytes([body[2], body[3], body[4], body[5]]),
                usec: u16::from(body[6]) << 8 | u16::from(body[7]),
            });
            body = &body[TIME_HEADER_LEN..];
        }

        match header.flag {
            SeqFlag::Standalone => out.push(SourcePacket {
                apid: header.apid,
                sequence: header.sequence,
                time,
                data: body.to_vec(),
            }),
            SeqFlag::First => {
                if self.groups.remove(&header.apid).is_some() {
                    self.stats.drops += 1;
                }
                self.groups.insert(
                    header.apid,
                    Group {
                        sequence: header.sequence,
                        time,
                        data: body.to_vec(),
                    },
                );
            }
            SeqFlag::Continuation => match self.groups.get_mut(&header.apid) {
                Some(group) => group.data.extend_from_slice(body),
                None => self.stats.drops += 1,
            },
            SeqFlag::Last => match self.groups.remove(&header.apid) {
                Some(mut group) => {
                    group.data.extend_from_slice(body);
                    out.push(SourcePacket {
                        apid: header.apid,
                        sequence: group.sequence,
                        time: group.time,
                        data: group.data,
                    });
                }
                None => self.stats.drops += 1,
            },
        }
    }
}
