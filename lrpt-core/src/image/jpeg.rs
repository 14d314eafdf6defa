//! Meteor-JPEG MCU decoding.
//!
//! Image packets carry a small header {MCU id, quality, packet count}
//! followed by Huffman-coded 8x8 blocks: one differential DC
//! coefficient and up to 63 run-length coded AC coefficients per
//! block, using the canonical JPEG luminance tables. Blocks are
//! dequantized with the standard luminance table scaled by the
//! in-packet quality factor, inverse-DCT'd, level-shifted and clamped.

pub const MCU_PER_LINE: usize = 196;
pub const METEOR_IMAGE_WIDTH: usize = MCU_PER_LINE * 8;
pub const MAX_WHITE: u8 = 255;

/// Packet header bytes before the entropy-coded data.
pub const MCU_HEADER_LEN: usize = 3;

/// Zig-zag scan position -> natural (row-major) position.
pub(crate) const ZIGZAG: [usize; 64] = [
    0, 1, 8, 16, 9, 2, 3, 10, //
    17, 24, 32, 25, 18, 11, 4, 5, //
    12, 19, 26, 33, 40, 48, 41, 34, //
    27, 20, 13, 6, 7, 14, 21, 28, //
    35, 42, 49, 56, 57, 50, 43, 36, //
    29, 22, 15, 23, 30, 37, 44, 51, //
    58, 59, 52, 45, 38, 31, 39, 46, //
    53, 60, 61, 54, 47, 55, 62, 63,
];

/// Standard luminance quantization table, natural order.
const QUANT_LUMA: [u16; 64] = [
    16, 11, 10, 16, 24, 40, 51, 61, //
    12, 12, 14, 19, 26, 58, 60, 55, //
    14, 13, 16, 24, 40, 57, 69, 56, //
    14, 17, 22, 29, 51, 87, 80, 62, //
    18, 22, 37, 56, 68, 109, 103, 77, //
    24, 35, 55, 64, 81, 104, 113, 92, //
    49, 64, 78, 87, 103, 121, 120, 101, //
    72, 92, 95, 98, 112, 100, 103, 99,
];

/// Canonical luminance DC table: code-length counts and categories.
pub(crate) const DC_CODE_LENGTHS: [u8; 16] = [0, 1, 5, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0];
pub(crate) const DC_VALUES: [u8; 12] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];

/// Canonical luminance AC table.
pub(crate) const AC_CODE_LENGTHS: [u8; 16] = [0, 2, 1, 3, 3, 2, 4, 3, 5, 5, 4, 4, 0, 0, 1, 125];
pub(crate) const AC_VALUES: [u8; 162] = [
    0x01, 0x02, 0x03, 0x00, 0x04, 0x11, 0x05, 0x12, 0x21, 0x31, 0x41, 0x06, 0x13, 0x51, 0x61,
    0x07, 0x22, 0x71, 0x14, 0x32, 0x81, 0x91, 0xA1, 0x08, 0x23, 0x42, 0xB1, 0xC1, 0x15, 0x52,
    0xD1, 0xF0, 0x24, 0x33, 0x62, 0x72, 0x82, 0x09, 0x0A, 0x16, 0x17, 0x18, 0x19, 0x1A, 0x25,
    0x26, 0x27, 0x28, 0x29, 0x2A, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3A, 0x43, 0x44, 0x45,
    0x46, 0x47, 0x48, 0x49, 0x4A, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58, 0x59, 0x5A, 0x63, 0x64,
    0x65, 0x66, 0x67, 0x68, 0x69, 0x6A, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78, 0x79, 0x7A, 0x83,
    0x84, 0x85, 0x86, 0x87, 0x88, 0x89, 0x8A, 0x92, 0x93, 0x94, 0x95, 0x96, 0x97, 0x98, 0x99,
    0x9A, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7, 0xA8, 0xA9, 0xAA, 0xB2, 0xB3, 0xB4, 0xB5, 0xB6,
    0xB7, 0xB8, 0xB9, 0xBA, 0xC2, 0xC3, 0xC4, 0xC5, 0xC6, 0xC7, 0xC8, 0xC9, 0xCA, 0xD2, 0xD3,
    0xD4, 0xD5, 0xD6, 0xD7, 0xD8, 0xD9, 0xDA, 0xE1, 0xE2, 0xE3, 0xE4, 0xE5, 0xE6, 0xE7, 0xE8,
    0xE9, 0xEA, 0xF1, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6, 0xF7, 0xF8, 0xF9, 0xFA,
];

/// Canonical Huffman decoder built from code-length counts.
pub(crate) struct HuffmanTable {
    mincode: [i32; 17],
    maxcode: [i32; 17],
    valptr: [usize; 17],
    values: Vec<u8>,
}

impl HuffmanTable {
    pub(crate) fn new(code_lengths: &[u8; 16], values: &[u8]) -> Self {
        let mut mincode = [0i32; 17];
        let mut maxcode = [-1i32; 17];
        let mut valptr = [0usize; 17];

        let mut code = 0i32;
        let mut k = 0usize;
        for length in 1..=16usize {
            let count = code_lengths[length - 1] as i32;
            if count > 0 {
                valptr[length] = k;
                mincode[length] = code;
                code += count;
                k += count as usize;
                maxcode[length] = code - 1;
            }
            code <<= 1;
        }

        Self {
            mincode,
            maxcode,
            valptr,
            values: values.to_vec(),
        }
    }

    /// Read one Huffman-coded value from the bit stream.
    pub(crate) fn decode(&self, reader: &mut BitReader<'_>) -> Option<u8> {
        let mut code = 0i32;
        for length in 1..=16usize {
            code = (code << 1) | reader.read_bit()? as i32;
            if self.maxcode[length] >= 0 && code <= self.maxcode[length] {
                if code < self.mincode[length] {
                    return None;
                }
                let index = self.valptr[length] + (code - self.mincode[length]) as usize;
                return self.values.get(index).copied();
            }
        }
        None
    }
}

/// MSB-first bit reader over entropy-coded packet data.
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub(crate) fn read_bit(&mut self) -> Option<u8> {
        let byte = *self.data.get(self.position / 8)?;
        let bit = (byte >> (7 - self.position % 8)) & 1;
        self.position += 1;
        Some(bit)
    }

    pub(crate) fn read_bits(&mut self, count: u8) -> Option<u16> {
        let mut value = 0u16;
        for _ in 0..count {
            value = (value << 1) | self.read_bit()? as u16;
        }
        Some(value)
    }

    pub(crate) fn remaining_bits(&self) -> usize {
        self.data.len() * 8 - self.position
    }
}

/// JPEG magnitude sign extension.
pub(crate) fn extend(value: u16, size: u8) -> i32 {
    if size == 0 {
        return 0;
    }
    if (value as i32) < (1 << (size - 1)) {
        value as i32 - (1 << size) + 1
    } else {
        value as i32
    }
}

/// Quality-scaled quantization table, natural order.
pub(crate) fn scaled_quant_table(quality: u8) -> [u16; 64] {
    let q = quality.clamp(1, 100) as u32;
    let factor = if q < 50 { 5000 / q } else { 200 - 2 * q };

    let mut table = [0u16; 64];
    for (slot, &base) in table.iter_mut().zip(QUANT_LUMA.iter()) {
        *slot = (((base as u32 * factor) + 50) / 100).clamp(1, 255) as u16;
    }
    table
}

/// A decoded packet: one run of 8x8 blocks for a channel row.
#[derive(Debug, Clone)]
pub struct McuRun {
    pub mcu_id: u8,
    pub quality: u8,
    pub pck_cnt: u8,
    pub blocks: Vec<[u8; 64]>,
}

pub struct McuDecoder {
    dc_table: HuffmanTable,
    ac_table: HuffmanTable,
    /// Separable IDCT basis: basis[k][n] = C(k)/2 cos((2n+1)k pi/16).
    basis: [[f64; 8]; 8],
}

impl Default for McuDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl McuDecoder {
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
            dc_table: HuffmanTable::new(&DC_CODE_LENGTHS, &DC_VALUES),
            ac_table: HuffmanTable::new(&AC_CODE_LENGTHS, &AC_VALUES),
            basis,
        }
    }

    /// Decode the body of one image packet. Returns None if the header
    /// is malformed or no complete block could be decoded.
    pub fn decode_packet(&self, body: &[u8]) -> Option<McuRun> {
        if body.len() <= MCU_HEADER_LEN {
            return None;
        }
        let mcu_id = body[0];
        let quality = body[1];
        let pck_cnt = body[2];
        if mcu_id as usize >= MCU_PER_LINE {
            return None;
        }

        let quant = scaled_quant_table(quality);
        let mut reader = BitReader::new(&body[MCU_HEADER_LEN..]);
        let mut prev_dc = 0i32;
        let mut blocks = Vec::new();

        while blocks.len() + (mcu_id as usize) < MCU_PER_LINE && reader.remaining_bits() >= 8 {
            match self.decode_block(&mut reader, &mut prev_dc, &quant) {
                Some(block) => blocks.push(block),
                None => break,
            }
        }

        if blocks.is_empty() {
            return None;
        }
        Some(McuRun {
            mcu_id,
            quality,
            pck_cnt,
            blocks,
        })
    }

    fn decode_block(
        &self,
        reader: &mut BitReader<'_>,
        prev_dc: &mut i32,
        quant: &[u16; 64],
    ) -> Option<[u8; 64]> {
        let mut coeffs = [0.0f64; 64];

        // Differential DC.
        let category = self.dc_table.decode(reader)?;
        if category > 11 {
            return None;
        }
        let diff = extend(reader.read_bits(category)?, category);
        let dc = *prev_dc + diff;
        *prev_dc = dc;
        coeffs[0] = dc as f64 * quant[0] as f64;

        // Run-length coded AC coefficients.
        let mut k = 1usize;
        while k < 64 {
            let run_size = self.ac_table.decode(reader)?;
            if run_size == 0 {
                break; // EOB
            }
            if run_size == 0xF0 {
                k += 16;
                continue;
            }
            let run = (run_size >> 4) as usize;
            let size = run_size & 0x0F;
            k += run;
            if k > 63 {
                return None;
            }
            let value = extend(reader.read_bits(size)?, size);
            let natural = ZIGZAG[k];
            coeffs[natural] = value as f64 * quant[natural] as f64;
            k += 1;
        }

        Some(self.idct_block(&coeffs))
    }

    /// Separable floating-point 8x8 inverse DCT with level shift.
    fn idct_block(&self, coeffs: &[f64; 64]) -> [u8; 64] {
        // Columns first: tmp[u][x] = sum_v F[u][v] * basis[v][x].
        let mut tmp = [[0.0f64; 8]; 8];
        for u in 0..8 {
            for x in 0..8 {
                let mut acc = 0.0;
                for v in 0..8 {
                    acc += coeffs[u * 8 + v] * self.basis[v][x];
                }
                tmp[u][x] = acc;
            }
        }

        let mut out = [0u8; 64];
        for y in 0..8 {
            for x in 0..8 {
                let mut acc = 0.0;
                for u in 0..8 {
                    acc += self.basis[u][y] * tmp[u][x];
                }
                out[y * 8 + x] = (acc + 128.0).round().clamp(0.0, 255.0) as u8;
            }
        }
        out
    }
}
