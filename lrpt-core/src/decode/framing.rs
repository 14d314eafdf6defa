//! Frame synchronization and decode loop: correlator hit -> soft frame
//! -> Viterbi -> derandomizer -> Reed-Solomon -> VCDU.
//!
//! The soft stream is scanned one frame-length window at a time. A
//! correlation hit anchors a 16,384-symbol soft frame which is rotated
//! to canonical orientation, convolutionally decoded, exclusive-ored
//! with the CCSDS pseudo-random sequence and split into four
//! interleaved Reed-Solomon codewords. Frames with any uncorrectable
//! subframe are dropped and counted; the loop resumes at the next
//! window either way.

use tracing::{debug, trace};

use crate::decode::correlator::{Correlator, PATTERN_SIZE};
use crate::decode::rs::{self, ReedSolomon};
use crate::decode::viterbi::{Viterbi, HARD_FRAME_LEN, SOFT_FRAME_LEN};
use crate::errors::Result;

/// Corrected VCDU payload length (1024 - 4 sync - 128 parity).
pub const VCDU_LEN: usize = 892;

/// Sync-search window, in soft symbols.
const SEARCH_WINDOW: usize = SOFT_FRAME_LEN;

/// CCSDS pseudo-randomizer period, bytes.
const PRAND_LEN: usize = 255;

/// Generate the CCSDS pseudo-random sequence for h(x) =
/// x^8 + x^7 + x^5 + x^3 + 1 seeded with all ones.
fn prand_table() -> [u8; PRAND_LEN] {
    let mut bits = [0u8; PRAND_LEN * 8];
    bits[..8].fill(1);
    for n in 8..PRAND_LEN * 8 {
        bits[n] = bits[n - 1] ^ bits[n - 3] ^ bits[n - 5] ^ bits[n - 8];
    }

    let mut table = [0u8; PRAND_LEN];
    for (idx, slot) in table.iter_mut().enumerate() {
        let mut byte = 0u8;
        for bit in 0..8 {
            byte = (byte << 1) | bits[idx * 8 + bit];
        }
        *slot = byte;
    }
    table
}

/// Exclusive-or a hard frame payload with the pseudo-random sequence.
/// Used by both the decoder and the synthetic encoder.
pub fn randomize_payload(payload: &mut [u8]) {
    let table = prand_table();
    for (idx, byte) in payload.iter_mut().enumerate() {
        *byte ^= table[idx % PRAND_LEN];
    }
}

pub struct FrameDecoder {
    correlator: Correlator,
    viterbi: Viterbi,
    rs: ReedSolomon,
    prand: [u8; PRAND_LEN],
    frames_ok: u64,
    frames_total: u64,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            correlator: Correlator::new(),
            viterbi: Viterbi::new(),
            rs: ReedSolomon::new(),
            prand: prand_table(),
            frames_ok: 0,
            frames_total: 0,
        }
    }

    /// Decode every complete frame available in `soft`, appending
    /// corrected VCDUs to `vcdus`. Returns the number of soft symbols
    /// consumed; the caller drains them and feeds the remainder back
    /// with more data appended.
    pub fn process(&mut self, soft: &[i8], vcdus: &mut Vec<[u8; VCDU_LEN]>) -> usize {
        let mut pos = 0usize;

        loop {
            if soft.len() - pos < SEARCH_WINDOW {
                break;
            }

            let Some(hit) = self.correlator.find_sync(soft, pos, SEARCH_WINDOW) else {
                // Keep one pattern length of overlap for a marker that
                // straddles the window edge.
                pos += SEARCH_WINDOW - PATTERN_SIZE;
                trace!(pos, "no sync in window");
                continue;
            };

            if soft.len() - hit.position < SOFT_FRAME_LEN {
                // Marker found but the frame is not complete yet.
                pos = hit.position;
                break;
            }

            self.frames_total += 1;
            match self.decode_at(soft, hit.position, hit.pattern) {
                Ok(vcdu) => {
                    self.frames_ok += 1;
                    vcdus.push(vcdu);
                }
                Err(err) => {
                    debug!(position = hit.position, %err, "frame dropped");
                }
            }
            pos = hit.position + SOFT_FRAME_LEN;
        }

        pos
    }

    fn decode_at(&mut self, soft: &[i8], at: usize, pattern: usize) -> Result<[u8; VCDU_LEN]> {
        let mut frame = soft[at..at + SOFT_FRAME_LEN].to_vec();
        self.correlator.fix_frame(pattern, &mut frame);

        let hard = self.viterbi.decode_frame(&frame)?;
        self.ecc_decode(&hard)
    }

    /// Strip the sync bytes, derandomize and run the deinterleaved
    /// Reed-Solomon stage over a 1,024-byte hard frame.
    fn ecc_decode(&self, hard: &[u8; HARD_FRAME_LEN]) -> Result<[u8; VCDU_LEN]> {
        let mut payload = [0u8; HARD_FRAME_LEN - 4];
        payload.copy_from_slice(&hard[4..]);
        for (idx, byte) in payload.iter_mut().enumerate() {
            *byte ^= self.prand[idx % PRAND_LEN];
        }

        let mut subframes = rs::deinterleave(&payload);
        for (index, subframe) in subframes.iter_mut().enumerate() {
            self.rs.decode_dual(subframe).map_err(|_| {
                crate::errors::DecodeError::Uncorrectable { subframe: index }
            })?;
        }

        let mut vcdu = [0u8; VCDU_LEN];
        for (i, slot) in vcdu.iter_mut().enumerate() {
            *slot = subframes[i % rs::INTERLEAVE_DEPTH][i / rs::INTERLEAVE_DEPTH];
        }
        Ok(vcdu)
    }

    pub fn frames_ok(&self) -> u64 {
        self.frames_ok
    }

    pub fn frames_total(&self) -> u64 {
        self.frames_total
    }

    /// Signal quality percentage derived from the Viterbi path-metric
    /// BER estimate: 0 at random input, 100 at a clean stream.
    pub fn signal_quality(&self) -> f64 {
        let ber = self.viterbi.ber_estimate();
        ((1.0 - ber * 4.0).clamp(0.0, 1.0)) * 100.0
    }
}
