//! Offset-QPSK stream repair: interleaver sync, convolutional
//! de-interleaving and differential decoding.
//!
//! The satellite interleaves the DOQPSK stream over 36 branches with a
//! 2048-symbol branch delay and inserts an 8-symbol 0x27 sync marker
//! every 80 symbols (72 data + 8 sync). The sync hunt looks for a
//! repeating byte at the 80-symbol stride to depth 4, with a 128-block
//! look-ahead so a weak signal does not drop sync immediately.

use crate::errors::{DecodeError, Result};

pub const INTER_BRANCHES: usize = 36;
pub const INTER_BRANCH_DELAY: usize = 2048;
pub const INTER_BASE_LEN: usize = INTER_BRANCHES * INTER_BRANCH_DELAY;
pub const INTER_DATA_LEN: usize = 72;
pub const INTER_SYNCDATA: usize = INTER_DATA_LEN + 8;

const SYNCD_DEPTH: usize = 4;
const SYNCD_BLOCK_SIZ: usize = (SYNCD_DEPTH + 1) * INTER_SYNCDATA;
const SYNCD_BUF_STEP: usize = (SYNCD_DEPTH - 1) * INTER_SYNCDATA;
const SYNCD_BUF_MARGIN: usize = SYNCD_DEPTH * INTER_SYNCDATA;

/// Blocks scanned ahead for a re-appearing sync byte before declaring
/// sync lost.
const SYNC_LOOKAHEAD_BLOCKS: usize = 128;

/// Assemble a candidate sync byte by hard-thresholding 8 consecutive
/// soft symbols, LSB first.
fn byte_at_offset(data: &[i8]) -> u8 {
    let mut result = 0u8;
    for (idx, &sym) in data.iter().take(8).enumerate() {
        if sym >= 0 {
            result |= 1 << idx;
        }
    }
    result
}

/// Search `data` for a byte repeating at the 80-symbol stride to
/// `SYNCD_DEPTH`. Returns the offset and the byte.
fn find_sync(data: &[i8]) -> Option<(usize, u8)> {
    let limit = data
        .len()
        .saturating_sub(INTER_SYNCDATA * SYNCD_DEPTH + 8);
    for idx in 0..limit {
        let sync = byte_at_offset(&data[idx..]);
        let mut matched = true;
        for depth in 1..=SYNCD_DEPTH {
            if byte_at_offset(&data[idx + depth * INTER_SYNCDATA..]) != sync {
                matched = false;
                break;
            }
        }
        if matched {
            return Some((idx, sync));
        }
    }
    None
}

/// Strip the sync columns from a raw symbol stream, returning only the
/// 72-symbol data payloads of each synchronized 80-symbol block.
pub fn resync_stream(raw: &[i8]) -> Vec<i8> {
    let mut resynced = Vec::with_capacity(raw.len());
    let limit1 = raw.len().saturating_sub(SYNCD_BUF_MARGIN + SYNCD_BLOCK_SIZ);
    let limit2 = raw.len().saturating_sub(INTER_SYNCDATA);
    let mut posn = 0usize;

    while posn < limit1 {
        let Some((offset, sync)) = find_sync(&raw[posn..posn + SYNCD_BLOCK_SIZ]) else {
            posn += SYNCD_BUF_STEP;
            continue;
        };
        posn += offset;

        while posn < limit2 {
            // Look ahead so one corrupted sync byte does not end the run.
            let mut ok = false;
            for block in 0..SYNC_LOOKAHEAD_BLOCKS {
                let probe = posn + block * INTER_SYNCDATA;
                if probe < limit2 && byte_at_offset(&raw[probe..]) == sync {
                    ok = true;
                    break;
                }
            }
            if !ok {
                break;
            }

            resynced.extend_from_slice(&raw[posn + 8..posn + INTER_SYNCDATA]);
            posn += INTER_SYNCDATA;
        }
    }

    resynced
}

/// Invert the convolutional interleaving: `out[k] = in[k + (k mod 36) * 2048]`.
/// Positions past the end of the input stay at 0.
pub fn deinterleave(resynced: &[i8]) -> Vec<i8> {
    let mut out = vec![0i8; resynced.len()];
    for (idx, slot) in out.iter_mut().enumerate() {
        let src = idx + (idx % INTER_BRANCHES) * INTER_BRANCH_DELAY;
        if src < resynced.len() {
            *slot = resynced[src];
        }
    }
    out
}

/// Resync and de-interleave in one step; errors if the sync hunt
/// produced nothing usable.
pub fn resync_and_deinterleave(raw: &[i8]) -> Result<Vec<i8>> {
    let resynced = resync_stream(raw);
    if resynced.is_empty() {
        return Err(DecodeError::ResyncFailed { input: raw.len() }.into());
    }
    Ok(deinterleave(&resynced))
}

/// Differential decoder for the pi/2-differentially encoded OQPSK
/// stream. Stateful across buffers: the last pair of a buffer seeds
/// the first pair of the next.
#[derive(Debug, Clone)]
pub struct DeDiffcoder {
    isqrt_table: Vec<u8>,
    prev_i: i32,
    prev_q: i32,
}

impl Default for DeDiffcoder {
    fn default() -> Self {
        Self::new()
    }
}

impl DeDiffcoder {
    pub fn new() -> Self {
        // Products of two i8 soft symbols span 0..=16384; the root is
        // clamped so -128 * -128 still fits the signed soft range.
        let isqrt_table = (0..=16384u32)
            .map(|v| ((v as f64).sqrt() as u8).min(127))
            .collect();
        Self {
            isqrt_table,
            prev_i: 0,
            prev_q: 0,
        }
    }

    /// `sign(x) * floor(sqrt(|x|))` through the precomputed table.
    fn sgn_sqrt(&self, value: i32) -> i8 {
        if value >= 0 {
            self.isqrt_table[value as usize] as i8
        } else {
            -(self.isqrt_table[(-value) as usize] as i8)
        }
    }

    /// Decode a buffer of interleaved I/Q soft symbols in place.
    pub fn process(&mut self, buffer: &mut [i8]) {
        if buffer.len() < 2 {
            return;
        }

        let mut prev_i = buffer[0] as i32;
        let mut prev_q = buffer[1] as i32;

        buffer[0] = self.sgn_sqrt(buffer[0] as i32 * self.prev_i);
        buffer[1] = self.sgn_sqrt(-(buffer[1] as i32) * self.prev_q);

        let mut idx = 2;
        while idx + 1 < buffer.len() {
            let cur_i = buffer[idx] as i32;
            let cur_q = buffer[idx + 1] as i32;

            buffer[idx] = self.sgn_sqrt(cur_i * prev_i);
            buffer[idx + 1] = self.sgn_sqrt(-cur_q * prev_q);

            prev_i = cur_i;
            prev_q = cur_q;
            idx += 2;
        }

        self.prev_i = prev_i;
        self.prev_q = prev_q;
    }
}
