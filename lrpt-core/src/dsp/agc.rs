//! Complex-domain automatic gain control.
//!
//! Tracks an exponentially-averaged magnitude and a complex DC bias;
//! the gain drives the average magnitude toward a fixed target so the
//! soft-symbol clamp downstream sees a stable constellation size.

use num_complex::Complex64;

/// Magnitude the loop settles the average toward.
const TARGET_AMPLITUDE: f64 = 200.0;

/// Averaging window, samples.
const AVG_WINSIZE: f64 = 65536.0;

/// DC bias averaging window, samples.
const BIAS_WINSIZE: f64 = 16384.0;

const MAX_GAIN: f64 = 20.0;
const MIN_GAIN: f64 = 0.001;

#[derive(Debug, Clone)]
pub struct Agc {
    average: f64,
    gain: f64,
    bias: Complex64,
}

impl Default for Agc {
    fn default() -> Self {
        Self::new()
    }
}

impl Agc {
    pub fn new() -> Self {
        Self {
            average: TARGET_AMPLITUDE,
            gain: 1.0,
            bias: Complex64::new(0.0, 0.0),
        }
    }

    /// Apply the AGC to one sample: `(input - bias) * gain`.
    pub fn apply(&mut self, input: Complex64) -> Complex64 {
        self.bias += (input - self.bias) / BIAS_WINSIZE;
        let corrected = input - self.bias;

        self.average += (corrected.norm() - self.average) / AVG_WINSIZE;
        self.gain = (TARGET_AMPLITUDE / self.average.max(f64::EPSILON)).clamp(MIN_GAIN, MAX_GAIN);

        corrected * self.gain
    }

    /// Current gain, for status reporting.
    pub fn gain(&self) -> f64 {
        self.gain
    }

    /// Current average input magnitude, for signal-level reporting.
    pub fn average(&self) -> f64 {
        self.average
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converges_toward_target_amplitude() {
        let mut agc = Agc::new();
        let input = Complex64::new(3.0, 4.0); // magnitude 5
        let mut out = Complex64::new(0.0, 0.0);
        for _ in 0..3_000_000 {
            out = agc.apply(input);
        }
        let mag = out.norm();
        assert!(
            (mag - TARGET_AMPLITUDE).abs() < TARGET_AMPLITUDE * 0.1,
            "magnitude {mag} far from target"
        );
    }

    #[test]
    fn gain_is_clamped() {
        let mut agc = Agc::new();
        for _ in 0..100_000 {
            agc.apply(Complex64::new(1e-12, 0.0));
        }
        assert!(agc.gain() <= MAX_GAIN);
    }

    #[test]
    fn removes_dc_bias() {
        let mut agc = Agc::new();
        let mut out = Complex64::new(0.0, 0.0);
        // Alternating symbols riding on a large DC offset.
        for n in 0..500_000 {
            let sym = if n % 2 == 0 { 1.0 } else { -1.0 };
            out = agc.apply(Complex64::new(100.0 + sym, 100.0));
        }
        // After convergence the imaginary rail carries only bias residue.
        assert!(out.im.abs() < out.re.abs());
    }
}
