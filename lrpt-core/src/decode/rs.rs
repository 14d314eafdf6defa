//! Reed-Solomon (255,223) error correction with the CCSDS conventions:
//! field polynomial 0x187, first consecutive generator root 112,
//! primitive element alpha^11, data carried in Berlekamp's dual basis.
//!
//! The wire carries four codewords byte-interleaved to depth 4. Each is
//! converted to the conventional basis, decoded with Berlekamp-Massey,
//! Chien search and Forney's formula, and converted back. Up to 16
//! errors per codeword are corrected; anything beyond reports
//! uncorrectable rather than silently corrupting.

use crate::errors::{DecodeError, Result};

pub const BLOCK_LEN: usize = 255;
pub const DATA_LEN: usize = 223;
pub const PARITY_LEN: usize = 32;
pub const MAX_CORRECTIONS: usize = 16;
pub const INTERLEAVE_DEPTH: usize = 4;

/// First consecutive root of the generator polynomial.
const FCR: usize = 112;
/// The code's primitive element is alpha^PRIM.
const PRIM: usize = 11;

/// Images of the dual-basis bits in the conventional representation.
const TAL: [u8; 8] = [0x8D, 0xEF, 0xEC, 0x86, 0xFA, 0x99, 0xAF, 0x7B];

/// GF(2^8) arithmetic over the CCSDS field polynomial.
struct Gf256 {
    alpha_to: [u8; 256],
    index_of: [u8; 256],
}

impl Gf256 {
    fn new() -> Self {
        let mut alpha_to = [0u8; 256];
        let mut index_of = [0u8; 256];
        let mut x: u16 = 1;
        for i in 0..255 {
            alpha_to[i] = x as u8;
            index_of[x as usize] = i as u8;
            x <<= 1;
            if x & 0x100 != 0 {
                x ^= 0x187;
            }
        }
        index_of[0] = 0; // never consulted for zero
        Self { alpha_to, index_of }
    }

    #[inline]
    fn mul(&self, a: u8, b: u8) -> u8 {
        if a == 0 || b == 0 {
            return 0;
        }
        let idx = self.index_of[a as usize] as usize + self.index_of[b as usize] as usize;
        self.alpha_to[idx % 255]
    }

    #[inline]
    fn inv(&self, a: u8) -> u8 {
        debug_assert!(a != 0);
        let idx = self.index_of[a as usize] as usize;
        self.alpha_to[(255 - idx) % 255]
    }

    #[inline]
    fn div(&self, a: u8, b: u8) -> u8 {
        self.mul(a, self.inv(b))
    }

    /// `base` raised to a (possibly negative) power.
    fn pow(&self, base: u8, exp: i64) -> u8 {
        if base == 0 {
            return 0;
        }
        let idx = self.index_of[base as usize] as i64;
        self.alpha_to[(idx * exp).rem_euclid(255) as usize]
    }

    /// alpha^(PRIM * k): the code's primitive element raised to `k`.
    fn beta_pow(&self, k: usize) -> u8 {
        self.alpha_to[(PRIM * k) % 255]
    }
}

pub struct ReedSolomon {
    gf: Gf256,
    /// Generator polynomial coefficients, genpoly[k] = coeff of x^k;
    /// genpoly[32] = 1.
    genpoly: [u8; PARITY_LEN + 1],
    /// Conventional -> dual basis.
    taltab: [u8; 256],
    /// Dual -> conventional basis.
    tal1tab: [u8; 256],
}

impl Default for ReedSolomon {
    fn default() -> Self {
        Self::new()
    }
}

impl ReedSolomon {
    pub fn new() -> Self {
        let gf = Gf256::new();

        let mut genpoly = [0u8; PARITY_LEN + 1];
        genpoly[0] = 1;
        for i in 0..PARITY_LEN {
            let root = gf.beta_pow(FCR + i);
            // Multiply the running product by (x + root).
            for k in (1..=i + 1).rev() {
                genpoly[k] = genpoly[k - 1] ^ gf.mul(root, genpoly[k]);
            }
            genpoly[0] = gf.mul(root, genpoly[0]);
        }

        let mut taltab = [0u8; 256];
        let mut tal1tab = [0u8; 256];
        for i in 0..256usize {
            let mut image = 0u8;
            for (bit, &basis) in TAL.iter().enumerate() {
                if i & (1 << bit) != 0 {
                    image ^= basis;
                }
            }
            taltab[i] = image;
            tal1tab[image as usize] = i as u8;
        }

        Self {
            gf,
            genpoly,
            taltab,
            tal1tab,
        }
    }

    /// Systematic encode in the conventional basis: parity for 223 data
    /// bytes, data byte 0 being the highest-order coefficient.
    pub fn encode(&self, data: &[u8]) -> [u8; PARITY_LEN] {
        debug_assert_eq!(data.len(), DATA_LEN);
        let mut bb = [0u8; PARITY_LEN];
        for &d in data {
            let feedback = d ^ bb[0];
            for j in 1..PARITY_LEN {
                bb[j - 1] = bb[j] ^ self.gf.mul(feedback, self.genpoly[PARITY_LEN - j]);
            }
            bb[PARITY_LEN - 1] = self.gf.mul(feedback, self.genpoly[0]);
        }
        bb
    }

    /// Encode dual-basis data as it appears on the wire.
    pub fn encode_dual(&self, data: &[u8]) -> [u8; PARITY_LEN] {
        debug_assert_eq!(data.len(), DATA_LEN);
        let conventional: Vec<u8> = data.iter().map(|&b| self.tal1tab[b as usize]).collect();
        let parity = self.encode(&conventional);
        let mut dual = [0u8; PARITY_LEN];
        for (slot, &p) in dual.iter_mut().zip(parity.iter()) {
            *slot = self.taltab[p as usize];
        }
        dual
    }

    /// Decode one conventional-basis codeword in place. Returns the
    /// number of corrected byte errors.
    pub fn decode(&self, codeword: &mut [u8]) -> Result<usize> {
        debug_assert_eq!(codeword.len(), BLOCK_LEN);

        let syndromes = self.syndromes(codeword);
        if syndromes.iter().all(|&s| s == 0) {
            return Ok(0);
        }

        let (lambda, errors) = self.berlekamp_massey(&syndromes)?;
        let positions = self.chien_search(&lambda, errors)?;
        self.forney_correct(codeword, &syndromes, &lambda, errors, &positions)?;

        // A decode that leaves nonzero syndromes was a miscorrection.
        if self.syndromes(codeword).iter().any(|&s| s != 0) {
            return Err(DecodeError::Uncorrectable { subframe: 0 }.into());
        }
        Ok(positions.len())
    }

    /// Decode one dual-basis codeword in place.
    pub fn decode_dual(&self, codeword: &mut [u8]) -> Result<usize> {
        for byte in codeword.iter_mut() {
            *byte = self.tal1tab[*byte as usize];
        }
        let result = self.decode(codeword);
        for byte in codeword.iter_mut() {
            *byte = self.taltab[*byte as usize];
        }
        result
    }

    fn syndromes(&self, codeword: &[u8]) -> [u8; PARITY_LEN] {
        let mut syn = [0u8; PARITY_LEN];
        for (i, slot) in syn.iter_mut().enumerate() {
            let x = self.gf.beta_pow(FCR + i);
            let mut acc = 0u8;
            for &c in codeword {
                acc = self.gf.mul(acc, x) ^ c;
            }
            *slot = acc;
        }
        syn
    }

    /// Find the error-locator polynomial. Returns (lambda, error count).
    fn berlekamp_massey(&self, syn: &[u8; PARITY_LEN]) -> Result<(Vec<u8>, usize)> {
        let mut lambda = vec![0u8; PARITY_LEN + 1];
        let mut prev = vec![0u8; PARITY_LEN + 1];
        lambda[0] = 1;
        prev[0] = 1;
        let mut l = 0usize;
        let mut m = 1usize;
        let mut b = 1u8;

        for n in 0..PARITY_LEN {
            let mut delta = syn[n];
            for i in 1..=l {
                delta ^= self.gf.mul(lambda[i], syn[n - i]);
            }

            if delta == 0 {
                m += 1;
            } else {
                let scale = self.gf.div(delta, b);
                if 2 * l <= n {
                    let saved = lambda.clone();
                    for i in 0..=PARITY_LEN - m {
                        lambda[i + m] ^= self.gf.mul(scale, prev[i]);
                    }
                    l = n + 1 - l;
                    prev = saved;
                    b = delta;
                    m = 1;
                } else {
                    for i in 0..=PARITY_LEN - m {
                        lambda[i + m] ^= self.gf.mul(scale, prev[i]);
                    }
                    m += 1;
                }
            }
        }

        if l > MAX_CORRECTIONS {
            return Err(DecodeError::Uncorrectable { subframe: 0 }.into());
        }
        Ok((lambda, l))
    }

    /// Roots of lambda give the error positions (as powers of x).
    fn chien_search(&self, lambda: &[u8], errors: usize) -> Result<Vec<usize>> {
        let mut positions = Vec::with_capacity(errors);
        for p in 0..BLOCK_LEN {
            let x_inv = self.gf.inv(self.gf.beta_pow(p));
            let mut acc = 0u8;
            for i in (0..=errors).rev() {
                acc = self.gf.mul(acc, x_inv) ^ lambda[i];
            }
            if acc == 0 {
                positions.push(p);
            }
        }
        if positions.len() != errors {
            return Err(DecodeError::Uncorrectable { subframe: 0 }.into());
        }
        Ok(positions)
    }

    fn forney_correct(
        &self,
        codeword: &mut [u8],
        syn: &[u8; PARITY_LEN],
        lambda: &[u8],
        errors: usize,
        positions: &[usize],
    ) -> Result<()> {
        // Omega(x) = S(x) * Lambda(x) mod x^32.
        let mut omega = [0u8; PARITY_LEN];
        for (i, slot) in omega.iter_mut().enumerate() {
            let mut acc = 0u8;
            for j in 0..=i.min(errors) {
                acc ^= self.gf.mul(lambda[j], syn[i - j]);
            }
            *slot = acc;
        }

        for &p in positions {
            let x = self.gf.beta_pow(p);
            let x_inv = self.gf.inv(x);

            let mut omega_val = 0u8;
            for i in (0..PARITY_LEN).rev() {
                omega_val = self.gf.mul(omega_val, x_inv) ^ omega[i];
            }

            // Lambda'(x) keeps only the odd-power terms.
            let mut deriv = 0u8;
            let mut i = 1;
            while i <= errors {
                deriv ^= self.gf.mul(lambda[i], self.gf.pow(x_inv, (i - 1) as i64));
                i += 2;
            }
            if deriv == 0 {
                return Err(DecodeError::Uncorrectable { subframe: 0 }.into());
            }

            let magnitude = self.gf.mul(
                self.gf.pow(x, 1 - FCR as i64),
                self.gf.div(omega_val, deriv),
            );
            codeword[BLOCK_LEN - 1 - p] ^= magnitude;
        }
        Ok(())
    }
}

/// Split a depth-4 interleaved block into its subframes: bytes at
/// positions i, i+4, i+8, ... form subframe i.
pub fn deinterleave(data: &[u8]) -> [[u8; BLOCK_LEN]; INTERLEAVE_DEPTH] {
    debug_assert_eq!(data.len(), BLOCK_LEN * INTERLEAVE_DEPTH);
    let mut subframes = [[0u8; BLOCK_LEN]; INTERLEAVE_DEPTH];
    for (pos, &byte) in data.iter().enumerate() {
        subframes[pos % INTERLEAVE_DEPTH][pos / INTERLEAVE_DEPTH] = byte;
    }
    subframes
}

/// Reassemble a depth-4 interleaved block.
pub fn interleave(subframes: &[[u8; BLOCK_LEN]; INTERLEAVE_DEPTH]) -> Vec<u8> {
    let mut data = vec![0u8; BLOCK_LEN * INTERLEAVE_DEPTH];
    for (pos, slot) in data.iter_mut().enumerate() {
        *slot = subframes[pos % INTERLEAVE_DEPTH][pos / INTERLEAVE_DEPTH];
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_message(seed: u64) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..DATA_LEN).map(|_| rng.gen()).collect()
    }

    fn codeword_for(message: &[u8], rs: &ReedSolomon) -> Vec<u8> {
        let mut codeword = message.to_vec();
        codeword.extend_from_slice(&rs.encode(message));
        codeword
    }

    #[test]
    fn encoded_codeword_has_zero_syndromes() {
        let rs = ReedSolomon::new();
        let codeword = codeword_for(&random_message(1), &rs);
        assert!(rs.syndromes(&codeword).iter().all(|&s| s == 0));
    }

    #[test]
    fn clean_codeword_decodes_with_zero_corrections() {
        let rs = ReedSolomon::new();
        let mut codeword = codeword_for(&random_message(2), &rs);
        assert_eq!(rs.decode(&mut codeword).unwrap(), 0);
    }

    #[test]
    fn corrects_up_to_sixteen_errors() {
        let rs = ReedSolomon::new();
        let message = random_message(3);
        let clean = codeword_for(&message, &rs);

        let mut rng = StdRng::seed_from_u64(4);
        for errors in [1usize, 3, 8, 16] {
            let mut corrupted = clean.clone();
            let mut hit = std::collections::HashSet::new();
            while hit.len() < errors {
                let pos = rng.gen_range(0..BLOCK_LEN);
                if hit.insert(pos) {
                    corrupted[pos] ^= rng.gen_range(1..=255u8);
                }
            }
            let corrected = rs.decode(&mut corrupted).unwrap();
            assert_eq!(corrected, errors);
            assert_eq!(corrupted, clean);
        }
    }

    #[test]
    fn seventeen_errors_report_uncorrectable() {
        let rs = ReedSolomon::new();
        let clean = codeword_for(&random_message(5), &rs);

        let mut rng = StdRng::seed_from_u64(6);
        let mut corrupted = clean.clone();
        let mut hit = std::collections::HashSet::new();
        while hit.len() < 20 {
            let pos = rng.gen_range(0..BLOCK_LEN);
            if hit.insert(pos) {
                corrupted[pos] ^= rng.gen_range(1..=255u8);
            }
        }
        assert!(rs.decode(&mut corrupted).is_err());
    }

    #[test]
    fn dual_basis_roundtrip() {
        let rs = ReedSolomon::new();
        let message = random_message(7);

        let mut codeword: Vec<u8> = message.clone();
        codeword.extend_from_slice(&rs.encode_dual(&message));

        // Corrupt a handful of bytes on the "wire".
        let mut rng = StdRng::seed_from_u64(8);
        let mut corrupted = codeword.clone();
        for _ in 0..5 {
            let pos = rng.gen_range(0..BLOCK_LEN);
            corrupted[pos] ^= rng.gen_range(1..=255u8);
        }

        rs.decode_dual(&mut corrupted).unwrap();
        assert_eq!(corrupted, codeword);
    }

    #[test]
    fn basis_conversion_tables_are_inverse() {
        let rs = ReedSolomon::new();
        for v in 0..256usize {
            assert_eq!(rs.tal1tab[rs.taltab[v] as usize] as usize, v);
        }
    }

    #[test]
    fn interleave_roundtrip() {
        let data: Vec<u8> = (0..BLOCK_LEN * INTERLEAVE_DEPTH)
            .map(|i| (i % 251) as u8)
            .collect();
        let subframes = deinterleave(&data);
        assert_eq!(interleave(&subframes), data);
        // Subframe 1 starts at wire position 1.
        assert_eq!(subframes[1][0], data[1]);
        assert_eq!(subframes[1][1], data[5]);
    }
}
