//! Synthetic LRPT signal generation.
//!
//! Builds deterministic test streams for the decode chain: Meteor-JPEG
//! packets from pixel blocks, VCDUs with correct M-PDU packing, CADUs
//! with Reed-Solomon parity, interleaving and randomization, and
//! finally convolutionally-encoded soft-symbol streams with optional
//! AWGN, constellation rotation and spectral inversion. The encoder
//! register is zeroed at each CADU so every frame opens with the
//! canonical encoded sync marker.

use num_complex::Complex64;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::decode::correlator::SYNC_WORD;
use crate::decode::framing::{randomize_payload, VCDU_LEN};
use crate::decode::packet::{APID_IDLE, SCID_METEOR_M2};
use crate::decode::rs::{self, ReedSolomon};
use crate::decode::viterbi;
use crate::image::jpeg::{
    scaled_quant_table, AC_CODE_LENGTHS, AC_VALUES, DC_CODE_LENGTHS, DC_VALUES, MCU_HEADER_LEN,
    ZIGZAG,
};

/// M-PDU packet zone size.
const ZONE_LEN: usize = VCDU_LEN - 8;

/// MSB-first bit writer; JPEG-style 1-bit padding on flush.
struct BitWriter {
    bytes: Vec<u8>,
    bit_count: u8,
    current: u8,
}

impl BitWriter {
    fn new() -> Self {
        Self {
            bytes: Vec::new(),
            bit_count: 0,
            current: 0,
        }
    }

    fn put_bits(&mut self, value: u32, count: u8) {
        for shift in (0..count).rev() {
            self.current = (self.current << 1) | ((value >> shift) & 1) as u8;
            self.bit_count += 1;
            if self.bit_count == 8 {
                self.bytes.push(self.current);
                self.current = 0;
                self.bit_count = 0;
            }
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.bit_count > 0 {
            let pad = 8 - self.bit_count;
            self.current = (self.current << pad) | ((1u16 << pad) - 1) as u8;
            self.bytes.push(self.current);
        }
        self.bytes
    }
}

/// Canonical Huffman encode map: value -> (code, length).
fn encode_map(code_lengths: &[u8; 16], values: &[u8]) -> Vec<Option<(u16, u8)>> {
    let mut map = vec![None; 256];
    let mut code = 0u16;
    let mut k = 0usize;
    for length in 1..=16u8 {
        for _ in 0..code_lengths[length as usize - 1] {
            map[values[k] as usize] = Some((code, length));
            code += 1;
            k += 1;
        }
        code <<= 1;
    }
    map
}

/// Magnitude category and value bits for a coefficient.
fn magnitude_bits(value: i32) -> (u8, u32) {
    let magnitude = value.unsigned_abs();
    let size = (32 - magnitude.leading_zeros()) as u8;
    let bits = if value >= 0 {
        value as u32
    } else {
        (value - 1) as u32 & ((1 << size) - 1)
    };
    (size, bits)
}

/// Meteor-JPEG encoder for test imagery.
pub struct McuEncoder {
    dc_map: Vec<Option<(u16, u8)>>,
    ac_map: Vec<Option<(u16, u8)>>,
    basis: [[f64; 8]; 8],
}

impl Default for McuEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl McuEncoder {
    pub fn new() -> Self {
        let mut basis = [[0.0f64; 8]; 8];
        for (k, row) in basis.iter_mut().enumerate() {
            let norm = if k == 0 {
                0.5 / std::f64::consts::SQRT_2
            } else {
                0.5
            };
            for (n, slot) in row.iter_mut().enumerate() {
                *slot = norm
                    * ((2.0 * n as f64 + 1.0) * k as f64 * std::f64::consts::PI / 16.0).cos();
            }
        }
        Self {
            dc_map: encode_map(&DC_CODE_LENGTHS, &DC_VALUES),
            ac_map: encode_map(&AC_CODE_LENGTHS, &AC_VALUES),
            basis,
        }
    }

    /// Forward DCT of a level-shifted spatial block, natural order.
    fn forward_dct(&self, block: &[u8; 64]) -> [f64; 64] {
        let mut shifted = [0.0f64; 64];
        for (slot, &pixel) in shifted.iter_mut().zip(block.iter()) {
            *slot = pixel as f64 - 128.0;
        }

        // tmp[u][x] = sum_y B[u][y] * s[y][x]
        let mut tmp = [[0.0f64; 8]; 8];
        for u in 0..8 {
            for x in 0..8 {
                let mut acc = 0.0;
                for y in 0..8 {
                    acc += self.basis[u][y] * shifted[y * 8 + x];
                }
                tmp[u][x] = acc;
            }
        }

        let mut coeffs = [0.0f64; 64];
        for u in 0..8 {
            for v in 0..8 {
                let mut acc = 0.0;
                for x in 0..8 {
                    acc += tmp[u][x] * self.basis[v][x];
                }
                coeffs[u * 8 + v] = acc;
            }
        }
        coeffs
    }

    /// Encode a run of 8x8 blocks into a packet body with the
    /// {MCU id, quality, packet count} header.
    pub fn encode_packet_body(
        &self,
        mcu_id: u8,
        quality: u8,
        pck_cnt: u8,
        blocks: &[[u8; 64]],
    ) -> Vec<u8> {
        let quant = scaled_quant_table(quality);
        let mut writer = BitWriter::new();
        let mut prev_dc = 0i32;

        for block in blocks {
            let coeffs = self.forward_dct(block);

            // Quantize in zig-zag order, clamped to the coefficient
            // categories the canonical tables can express.
            let mut quantized = [0i32; 64];
            for (z, &natural) in ZIGZAG.iter().enumerate() {
                let q = (coeffs[natural] / quant[natural] as f64).round() as i32;
                quantized[z] = q.clamp(-1023, 1023);
            }

            // DC difference.
            let diff = quantized[0] - prev_dc;
            prev_dc = quantized[0];
            let (size, bits) = magnitude_bits(diff);
            let (code, len) = self.dc_map[size as usize].expect("dc category in table");
            writer.put_bits(code as u32, len);
            writer.put_bits(bits, size);

            // AC run-lengths.
            let mut run = 0u32;
            for &coeff in &quantized[1..] {
                if coeff == 0 {
                    run += 1;
                    continue;
                }
                while run >= 16 {
                    let (code, len) = self.ac_map[0xF0].expect("ZRL in table");
                    writer.put_bits(code as u32, len);
                    run -= 16;
                }
                let (size, bits) = magnitude_bits(coeff);
                let symbol = ((run as u8) << 4) | size;
                let (code, len) = self.ac_map[symbol as usize].expect("ac symbol in table");
                writer.put_bits(code as u32, len);
                writer.put_bits(bits, size);
                run = 0;
            }
            if run > 0 {
                let (code, len) = self.ac_map[0x00].expect("EOB in table");
                writer.put_bits(code as u32, len);
            }
        }

        let mut body = Vec::with_capacity(MCU_HEADER_LEN + 64);
        body.push(mcu_id);
        body.push(quality);
        body.push(pck_cnt);
        body.extend(writer.finish());
        body
    }
}

/// Build a CP_PDU (standalone, no secondary header).
pub fn build_packet(apid: u16, sequence: u16, body: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(6 + body.len());
    packet.extend_from_slice(&(apid & 0x07FF).to_be_bytes());
    packet.extend_from_slice(&(0xC000u16 | (sequence & 0x3FFF)).to_be_bytes());
    packet.extend_from_slice(&((body.len() as u16).wrapping_sub(1)).to_be_bytes());
    packet.extend_from_slice(body);
    packet
}

/// Pack a packet stream into VCDUs, filling the final zone with idle
/// packets and setting each first-header pointer.
pub fn pack_vcdus(packets: &[Vec<u8>], vcid: u8, counter_start: u32) -> Vec<[u8; VCDU_LEN]> {
    // Record where each packet starts in the concatenated stream.
    let mut stream = Vec::new();
    let mut starts = Vec::new();
    for packet in packets {
        starts.push(stream.len());
        stream.extend_from_slice(packet);
    }

    // Fill to a whole number of zones with idle packets.
    while stream.len() % ZONE_LEN != 0 {
        let remaining = ZONE_LEN - stream.len() % ZONE_LEN;
        let total = if remaining >= 7 { remaining } else { remaining + ZONE_LEN };
        starts.push(stream.len());
        let idle = build_packet(APID_IDLE, 0, &vec![0u8; total - 6]);
        stream.extend_from_slice(&idle);
    }

    let mut vcdus = Vec::new();
    for (zone_index, zone) in stream.chunks_exact(ZONE_LEN).enumerate() {
        let zone_base = zone_index * ZONE_LEN;
        let fhp = starts
            .iter()
            .find(|&&s| s >= zone_base && s < zone_base + ZONE_LEN)
            .map(|&s| (s - zone_base) as u16)
            .unwrap_or(2047);

        let counter = counter_start + zone_index as u32;
        let mut vcdu = [0u8; VCDU_LEN];
        vcdu[0] = 0x40 | (SCID_METEOR_M2 >> 2);
        vcdu[1] = (SCID_METEOR_M2 << 6) | (vcid & 0x3F);
        vcdu[2] = (counter >> 16) as u8;
        vcdu[3] = (counter >> 8) as u8;
        vcdu[4] = counter as u8;
        vcdu[6] = (fhp >> 8) as u8;
        vcdu[7] = fhp as u8;
        vcdu[8..].copy_from_slice(zone);
        vcdus.push(vcdu);
    }
    vcdus
}

/// Wrap a VCDU into a 1,024-byte CADU: Reed-Solomon parity, depth-4
/// interleave, randomization and the attached sync marker.
pub fn build_cadu(rs_codec: &ReedSolomon, vcdu: &[u8; VCDU_LEN]) -> [u8; 1024] {
    let mut subframes = [[0u8; rs::BLOCK_LEN]; rs::INTERLEAVE_DEPTH];
    for (k, subframe) in subframes.iter_mut().enumerate() {
        let mut data = [0u8; rs::DATA_LEN];
        for (j, slot) in data.iter_mut().enumerate() {
            *slot = vcdu[k + rs::INTERLEAVE_DEPTH * j];
        }
        let parity = rs_codec.encode_dual(&data);
        subframe[..rs::DATA_LEN].copy_from_slice(&data);
        subframe[rs::DATA_LEN..].copy_from_slice(&parity);
    }

    let mut payload = rs::interleave(&subframes);
    randomize_payload(&mut payload);

    let mut cadu = [0u8; 1024];
    cadu[..4].copy_from_slice(&SYNC_WORD.to_be_bytes());
    cadu[4..].copy_from_slice(&payload);
    cadu
}

/// Convolutionally encode CADUs into a hard bit stream (one bit per
/// element). The encoder register restarts at zero for each CADU.
pub fn encode_cadus(cadus: &[[u8; 1024]]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(cadus.len() * 1024 * 16);
    for cadu in cadus {
        let mut state = 0u8;
        bits.extend(viterbi::encode_bytes(cadu.as_slice(), &mut state));
    }
    bits
}

/// Map channel bits to soft symbols with optional AWGN.
pub fn soft_stream<R: Rng>(
    bits: &[u8],
    amplitude: f64,
    noise_std: f64,
    rng: &mut R,
) -> Vec<i8> {
    let normal = Normal::new(0.0, noise_std.max(f64::EPSILON)).expect("valid sigma");
    bits.iter()
        .map(|&bit| {
            let polar = if bit == 1 { amplitude } else { -amplitude };
            let noisy = polar + normal.sample(rng);
            noisy.round().clamp(-128.0, 127.0) as i8
        })
        .collect()
}

/// Apply a channel constellation rotation (90-degree steps) and
/// optional spectral inversion to a soft IQ stream in place.
pub fn rotate_soft_stream(stream: &mut [i8], quarter_turns: usize, invert: bool) {
    if invert {
        let mut idx = 0;
        while idx + 1 < stream.len() {
            stream.swap(idx, idx + 1);
            idx += 2;
        }
    }
    for _ in 0..quarter_turns % 4 {
        let mut idx = 0;
        while idx + 1 < stream.len() {
            let i = stream[idx];
            let q = stream[idx + 1];
            stream[idx] = q.checked_neg().unwrap_or(i8::MAX);
            stream[idx + 1] = i;
            idx += 2;
        }
    }
}

/// Modulate a soft-bit stream as baseband QPSK with rectangular
/// pulses: `samples_per_symbol` samples per symbol, a carrier offset in
/// radians per sample, and AWGN.
pub fn modulate_qpsk<R: Rng>(
    bits: &[u8],
    samples_per_symbol: usize,
    amplitude: f64,
    freq_offset: f64,
    noise_std: f64,
    rng: &mut R,
) -> Vec<Complex64> {
    let normal = Normal::new(0.0, noise_std.max(f64::EPSILON)).expect("valid sigma");
    let mut samples = Vec::with_capacity(bits.len() / 2 * samples_per_symbol);
    let mut phase = 0.0f64;

    for pair in bits.chunks_exact(2) {
        let i = if pair[0] == 1 { 1.0 } else { -1.0 };
        let q = if pair[1] == 1 { 1.0 } else { -1.0 };
        let symbol = Complex64::new(i, q) * amplitude / std::f64::consts::SQRT_2;
        for _ in 0..samples_per_symbol {
            let rotated = symbol * Complex64::from_polar(1.0, phase);
            phase += freq_offset;
            samples.push(
                rotated + Complex64::new(normal.sample(rng), normal.sample(rng)),
            );
        }
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::jpeg::{extend, McuDecoder};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn magnitude_bits_invert_extend() {
        for value in [-255i32, -128, -7, -1, 1, 3, 64, 255] {
            let (size, bits) = magnitude_bits(value);
            assert_eq!(extend(bits as u16, size), value, "value {value}");
        }
    }

    #[test]
    fn flat_blocks_roundtrip_through_jpeg() {
        let encoder = McuEncoder::new();
        let decoder = McuDecoder::new();

        let blocks: Vec<[u8; 64]> = (0..14u8).map(|n| [40 + n * 10; 64]).collect();
        let body = encoder.encode_packet_body(0, 80, 0, &blocks);
        let run = decoder.decode_packet(&body).expect("decodable packet");

        assert_eq!(run.mcu_id, 0);
        assert_eq!(run.quality, 80);
        assert_eq!(run.blocks.len(), blocks.len());
        for (decoded, original) in run.blocks.iter().zip(blocks.iter()) {
            for (&d, &o) in decoded.iter().zip(original.iter()) {
                assert!(
                    (d as i32 - o as i32).abs() <= 3,
                    "pixel {d} far from {o}"
                );
            }
        }
    }

    #[test]
    fn textured_blocks_roundtrip_within_tolerance() {
        let encoder = McuEncoder::new();
        let decoder = McuDecoder::new();

        let mut block = [0u8; 64];
        for (idx, pixel) in block.iter_mut().enumerate() {
            *pixel = (64 + (idx % 8) * 16) as u8;
        }
        let body = encoder.encode_packet_body(14, 90, 1, &[block]);
        let run = decoder.decode_packet(&body).expect("decodable packet");

        assert_eq!(run.blocks.len(), 1);
        for (&d, &o) in run.blocks[0].iter().zip(block.iter()) {
            assert!((d as i32 - o as i32).abs() <= 12, "pixel {d} far from {o}");
        }
    }

    #[test]
    fn packed_vcdus_have_valid_pointers() {
        let packets = vec![build_packet(64, 0, &[1; 100]), build_packet(65, 1, &[2; 50])];
        let vcdus = pack_vcdus(&packets, 0, 0);
        assert!(!vcdus.is_empty());
        let fhp = (u16::from(vcdus[0][6]) & 0x07) << 8 | u16::from(vcdus[0][7]);
        assert_eq!(fhp, 0);
    }

    #[test]
    fn cadu_roundtrips_through_ecc() {
        let rs_codec = ReedSolomon::new();
        let mut vcdu = [0u8; VCDU_LEN];
        for (idx, byte) in vcdu.iter_mut().enumerate() {
            *byte = (idx % 255) as u8;
        }

        let cadu = build_cadu(&rs_codec, &vcdu);
        assert_eq!(&cadu[..4], &SYNC_WORD.to_be_bytes());

        // Undo the randomization and the interleave; RS decode must
        // find clean codewords and return the original VCDU bytes.
        let mut payload = cadu[4..].to_vec();
        randomize_payload(&mut payload);
        let mut subframes = rs::deinterleave(&payload);
        for subframe in subframes.iter_mut() {
            assert_eq!(rs_codec.decode_dual(subframe).unwrap(), 0);
        }
        for (idx, &byte) in vcdu.iter().enumerate() {
            assert_eq!(
                subframes[idx % rs::INTERLEAVE_DEPTH][idx / rs::INTERLEAVE_DEPTH],
                byte
            );
        }
    }

    #[test]
    fn soft_stream_is_polar_without_noise() {
        let mut rng = StdRng::seed_from_u64(1);
        let soft = soft_stream(&[1, 0, 1, 1], 100.0, 0.0, &mut rng);
        assert_eq!(soft.len(), 4);
        assert!(soft[0] > 90 && soft[1] < -90);
    }

    #[test]
    fn rotation_four_times_is_identity_on_signs() {
        let mut rng = StdRng::seed_from_u64(2);
        let original = soft_stream(&[1, 0, 0, 1, 1, 1], 100.0, 5.0, &mut rng);
        let mut rotated = original.clone();
        rotate_soft_stream(&mut rotated, 4, false);
        for (a, b) in rotated.iter().zip(original.iter()) {
            assert_eq!(*a >= 0, *b >= 0);
        }
    }
}
