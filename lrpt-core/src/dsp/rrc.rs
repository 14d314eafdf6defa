//! Root-raised-cosine matched filter.
//!
//! Taps are computed once per session for the interpolated rate
//! (`interp_factor` x symbol rate) and normalized to unit energy. The
//! filter is fed each front-end sample `interp_factor` times
//! (sample-and-hold upsampling); the demodulator's timing accumulator
//! picks one output per symbol. With `interp_factor = 1` this
//! degenerates to a single-sample-per-symbol FIR.

use num_complex::Complex64;
use std::f64::consts::PI;

use crate::errors::{DspError, Result};

#[derive(Debug, Clone)]
pub struct RrcFilter {
    taps: Vec<f64>,
    ring: Vec<Complex64>,
    pos: usize,
}

impl RrcFilter {
    /// `order` is the one-sided span in symbols; the tap count is
    /// `2 * order * interp + 1`.
    pub fn new(order: usize, interp: usize, osf: f64, alpha: f64) -> Result<Self> {
        let taps = rrc_taps(order, interp, osf, alpha)?;
        let len = taps.len();
        Ok(Self {
            taps,
            ring: vec![Complex64::new(0.0, 0.0); len],
            pos: 0,
        })
    }

    pub fn num_taps(&self) -> usize {
        self.taps.len()
    }

    /// Push one sample at the interpolated rate and convolve.
    pub fn feed(&mut self, input: Complex64) -> Complex64 {
        let len = self.taps.len();
        self.pos = (self.pos + 1) % len;
        self.ring[self.pos] = input;

        let mut acc = Complex64::new(0.0, 0.0);
        let mut idx = self.pos;
        for &tap in &self.taps {
            acc += self.ring[idx] * tap;
            idx = if idx == 0 { len - 1 } else { idx - 1 };
        }
        acc
    }
}

/// Root-raised-cosine tap computation at `interp` samples per input
/// sample, `osf` input samples per symbol.
fn rrc_taps(order: usize, interp: usize, osf: f64, alpha: f64) -> Result<Vec<f64>> {
    if order == 0 || interp == 0 {
        return Err(DspError::EmptyFilter(0).into());
    }
    if !(alpha > 0.0 && alpha <= 1.0) || !(osf > 0.0) {
        return Err(DspError::FilterDesignFailed {
            reason: format!("rrc alpha {alpha} / osf {osf} out of range"),
        }
        .into());
    }

    let num_taps = 2 * order * interp + 1;
    let center = (order * interp) as isize;
    let samples_per_symbol = osf * interp as f64;
    let mut taps = Vec::with_capacity(num_taps);

    for k in 0..num_taps {
        // Tap instant in symbol periods.
        let t = (k as isize - center) as f64 / samples_per_symbol;
        taps.push(rrc_impulse(t, alpha));
    }

    // Unit energy keeps the post-filter power predictable for the AGC.
    let energy: f64 = taps.iter().map(|&h| h * h).sum();
    let scale = 1.0 / energy.sqrt();
    for tap in &mut taps {
        *tap *= scale;
    }

    Ok(taps)
}

/// The RRC impulse response at `t` symbol periods, with the two
/// removable singularities handled explicitly.
fn rrc_impulse(t: f64, alpha: f64) -> f64 {
    if t.abs() < 1e-10 {
        return 1.0 - alpha + 4.0 * alpha / PI;
    }
    let quarter = 1.0 / (4.0 * alpha);
    if (t.abs() - quarter).abs() < 1e-10 {
        let arg = PI / (4.0 * alpha);
        return alpha / std::f64::consts::SQRT_2
            * ((1.0 + 2.0 / PI) * arg.sin() + (1.0 - 2.0 / PI) * arg.cos());
    }

    let four_alpha_t = 4.0 * alpha * t;
    let numerator = (PI * t * (1.0 - alpha)).sin() + four_alpha_t * (PI * t * (1.0 + alpha)).cos();
    let denominator = PI * t * (1.0 - four_alpha_t * four_alpha_t);
    numerator / denominator
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn tap_count_matches_order() {
        let filter = RrcFilter::new(32, 4, 1.0, 0.6).unwrap();
        assert_eq!(filter.num_taps(), 2 * 32 * 4 + 1);
    }

    #[test]
    fn degenerates_with_unit_interpolation() {
        let filter = RrcFilter::new(16, 1, 1.0, 0.6).unwrap();
        assert_eq!(filter.num_taps(), 33);
    }

    #[test]
    fn taps_are_symmetric() {
        let taps = rrc_taps(16, 2, 1.0, 0.35).unwrap();
        let n = taps.len();
        for k in 0..n / 2 {
            assert_relative_eq!(taps[k], taps[n - 1 - k], epsilon = 1e-12);
        }
    }

    #[test]
    fn taps_have_unit_energy() {
        let taps = rrc_taps(32, 4, 1.0, 0.6).unwrap();
        let energy: f64 = taps.iter().map(|&h| h * h).sum();
        assert_relative_eq!(energy, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn impulse_passes_through_filter() {
        let mut filter = RrcFilter::new(8, 2, 1.0, 0.5).unwrap();
        let mut seen = 0.0f64;
        let _ = filter.feed(Complex64::new(1.0, 0.0));
        for _ in 0..filter.num_taps() {
            let out = filter.feed(Complex64::new(0.0, 0.0));
            seen = seen.max(out.re.abs());
        }
        assert!(seen > 0.0);
    }

    #[test]
    fn rejects_bad_alpha() {
        assert!(RrcFilter::new(8, 2, 1.0, 0.0).is_err());
        assert!(RrcFilter::new(8, 2, 1.0, 1.5).is_err());
    }
}
