//! Sync-marker correlator.
//!
//! Searches the soft-symbol stream for the convolutionally-encoded
//! CCSDS attached sync marker 0x1ACFFC1D. The encoded marker is a
//! 64-bit pattern; the receiver may see it through any of four QPSK
//! phase rotations and with the spectrum inverted, so eight pattern
//! variants are scored. Matching is hard-decision: a 256x256 agreement
//! table maps (received soft byte, pattern byte) to 0/1 and a hit
//! needs at least 55 of 64 bits to agree. `fix_frame` then applies the
//! inverse IQ permutation so the frame reaches the Viterbi decoder in
//! canonical orientation.

use crate::decode::viterbi;

/// The CCSDS attached sync marker.
pub const SYNC_WORD: u32 = 0x1ACFFC1D;

/// Bits that must agree for a correlation hit.
pub const CORR_LIMIT: u32 = 55;

/// Pattern length in soft symbols (the encoded 32-bit marker).
pub const PATTERN_SIZE: usize = 64;

pub const PATTERN_COUNT: usize = 8;

/// A successful sync search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncHit {
    /// Offset of the marker start in the searched slice.
    pub position: usize,
    /// Index of the matching orientation (rotation | inversion << 2).
    pub pattern: usize,
    /// Number of agreeing bits, out of 64.
    pub count: u32,
}

pub struct Correlator {
    /// Target soft bytes (0x00 / 0xFF) per orientation.
    patterns: [[u8; PATTERN_SIZE]; PATTERN_COUNT],
    /// Hard-decision agreement of two offset-binary soft bytes.
    corr_table: Box<[[u8; 256]; 256]>,
}

/// Rotate every IQ bit pair of a 64-bit word by 90 degrees:
/// (i, q) -> (!q, i). Pairs sit MSB-first, I before Q.
fn rotate_iq_word(word: u64) -> u64 {
    const I_MASK: u64 = 0xAAAA_AAAA_AAAA_AAAA;
    // New I = !Q moved up one bit, new Q = I moved down one bit.
    ((!word << 1) & I_MASK) | ((word & I_MASK) >> 1)
}

/// Spectral inversion swaps the I and Q rails of every pair.
fn invert_iq_word(word: u64) -> u64 {
    const I_MASK: u64 = 0xAAAA_AAAA_AAAA_AAAA;
    const Q_MASK: u64 = 0x5555_5555_5555_5555;
    ((word & I_MASK) >> 1) | ((word & Q_MASK) << 1)
}

/// The encoded sync marker, derived once from the Viterbi polynomials
/// with a zeroed register: 32 marker bits in, 64 channel bits out.
fn encoded_sync_word() -> u64 {
    let bytes = SYNC_WORD.to_be_bytes();
    let mut state = 0u8;
    let encoded = viterbi::encode_bytes(&bytes, &mut state);
    let mut word = 0u64;
    for bit in encoded {
        word = (word << 1) | bit as u64;
    }
    word
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        let base = encoded_sync_word();
        let inverted = invert_iq_word(base);

        let mut words = [0u64; PATTERN_COUNT];
        let mut rotated = base;
        let mut rotated_inv = inverted;
        for rot in 0..4 {
            words[rot] = rotated;
            words[4 + rot] = rotated_inv;
            rotated = rotate_iq_word(rotated);
            rotated_inv = rotate_iq_word(rotated_inv);
        }

        let mut patterns = [[0u8; PATTERN_SIZE]; PATTERN_COUNT];
        for (pattern, &word) in patterns.iter_mut().zip(words.iter()) {
            for bit in 0..PATTERN_SIZE {
                pattern[bit] = if (word >> (63 - bit)) & 1 == 1 { 0xFF } else { 0x00 };
            }
        }

        let mut corr_table = Box::new([[0u8; 256]; 256]);
        for a in 0..256 {
            for b in 0..256 {
                corr_table[a][b] = u8::from((a >= 128) == (b >= 128));
            }
        }

        Self {
            patterns,
            corr_table,
        }
    }

    /// Score one orientation at one position.
    fn correlate_at(&self, data: &[i8], position: usize, pattern: usize) -> u32 {
        let patt = &self.patterns[pattern];
        let mut count = 0u32;
        for (bit, &target) in patt.iter().enumerate() {
            let soft = (data[position + bit] as u8) ^ 0x80;
            count += self.corr_table[soft as usize][target as usize] as u32;
        }
        count
    }

    /// Slide the 64-symbol window over `data[start..]` one symbol at a
    /// time, returning the first position with a pattern at or above
    /// the correlation limit. Ties prefer the lowest pattern index.
    pub fn find_sync(&self, data: &[i8], start: usize, window: usize) -> Option<SyncHit> {
        if data.len() < PATTERN_SIZE {
            return None;
        }
        let end = (start + window).min(data.len() + 1 - PATTERN_SIZE);
        for position in start..end {
            let mut best: Option<SyncHit> = None;
            for pattern in 0..PATTERN_COUNT {
                let count = self.correlate_at(data, position, pattern);
                if count >= CORR_LIMIT && best.map_or(true, |b| count > b.count) {
                    best = Some(SyncHit {
                        position,
                        pattern,
                        count,
                    });
                }
            }
            if best.is_some() {
                return best;
            }
        }
        None
    }

    /// Undo the detected orientation on a soft frame in place so the
    /// stream matches the canonical constellation mapping.
    pub fn fix_frame(&self, pattern: usize, frame: &mut [i8]) {
        let rotation = pattern & 3;
        let inverted = pattern >= 4;

        // Inverse rotation first (the channel applied rotation last).
        let undo = (4 - rotation) % 4;
        for _ in 0..undo {
            rotate_soft_pairs(frame);
        }
        if inverted {
            swap_soft_pairs(frame);
        }
    }
}

/// Apply one 90-degree rotation to soft IQ pairs: (i, q) -> (-q, i).
fn rotate_soft_pairs(frame: &mut [i8]) {
    let mut idx = 0;
    while idx + 1 < frame.len() {
        let i = frame[idx];
        let q = frame[idx + 1];
        frame[idx] = negate_soft(q);
        frame[idx + 1] = i;
        idx += 2;
    }
}

/// Swap the rails of every soft IQ pair.
fn swap_soft_pairs(frame: &mut [i8]) {
    let mut idx = 0;
    while idx + 1 < frame.len() {
        frame.swap(idx, idx + 1);
        idx += 2;
    }
}

/// Saturating negation keeps -128 representable.
fn negate_soft(value: i8) -> i8 {
    value.checked_neg().unwrap_or(i8::MAX)
}
