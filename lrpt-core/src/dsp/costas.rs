//! Costas carrier-recovery loop for (O)QPSK.
//!
//! Second-order loop, damping 0.7. Lock is tracked by an
//! exponentially-smoothed |error| with hysteresis: the loop goes locked
//! below the configured threshold and unlocked again 3% above it. Lock
//! transitions never reset the phase accumulator; they only narrow the
//! loop gains while the carrier is held.

use num_complex::Complex64;
use std::f64::consts::{PI, TAU};

/// Loop damping factor.
const DAMPING: f64 = 0.7;

/// Smoothing window for the lock detector, symbols.
const ERR_WINSIZE: f64 = 1000.0;

/// Gain narrowing applied while locked.
const LOCKED_BW_REDUCE: f64 = 4.0;

#[derive(Debug, Clone)]
pub struct Costas {
    phase: f64,
    freq: f64,
    alpha: f64,
    beta: f64,
    locked_alpha: f64,
    locked_beta: f64,
    moving_average: f64,
    locked: bool,
    locked_threshold: f64,
    unlocked_threshold: f64,
}

impl Costas {
    pub fn new(bandwidth: f64, locked_threshold: f64, unlocked_threshold: f64) -> Self {
        let (alpha, beta) = loop_gains(bandwidth);
        let (locked_alpha, locked_beta) = loop_gains(bandwidth / LOCKED_BW_REDUCE);
        Self {
            phase: 0.0,
            freq: 0.0,
            alpha,
            beta,
            locked_alpha,
            locked_beta,
            moving_average: unlocked_threshold * 2.0,
            locked: false,
            locked_threshold,
            unlocked_threshold,
        }
    }

    /// Rotate a symbol by the current carrier phase estimate.
    pub fn mix(&self, symbol: Complex64) -> Complex64 {
        symbol * Complex64::from_polar(1.0, -self.phase)
    }

    /// QPSK phase detector: `sign(Re) * Im - sign(Im) * Re`.
    pub fn detect_qpsk(symbol: Complex64) -> f64 {
        symbol.re.signum() * symbol.im - symbol.im.signum() * symbol.re
    }

    /// Advance the loop with a fresh error sample.
    pub fn advance(&mut self, error: f64) {
        // Guard the integrator against noise spikes.
        let error = error.clamp(-256.0, 256.0);

        let (alpha, beta) = if self.locked {
            (self.locked_alpha, self.locked_beta)
        } else {
            (self.alpha, self.beta)
        };

        self.freq += beta * error;
        self.phase += alpha * error + self.freq;
        while self.phase > PI {
            self.phase -= TAU;
        }
        while self.phase < -PI {
            self.phase += TAU;
        }

        self.moving_average += (error.abs() - self.moving_average) / ERR_WINSIZE;
        if self.locked {
            if self.moving_average > self.unlocked_threshold {
                self.locked = false;
            }
        } else if self.moving_average < self.locked_threshold {
            self.locked = true;
        }
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    /// Smoothed phase-error level driving the lock detector.
    pub fn average_error(&self) -> f64 {
        self.moving_average
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    /// Frequency estimate, radians per symbol.
    pub fn frequency(&self) -> f64 {
        self.freq
    }
}

/// Second-order loop filter gains for a natural bandwidth `bw`.
fn loop_gains(bw: f64) -> (f64, f64) {
    let denom = 1.0 + 2.0 * DAMPING * bw + bw * bw;
    let alpha = (4.0 * DAMPING * bw) / denom;
    let beta = (4.0 * bw * bw) / denom;
    (alpha, beta)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_loop(freq_offset: f64, symbols: usize) -> (Costas, usize) {
        // Ideal QPSK symbols with a rotating carrier; amplitude matches
        // the AGC target scale so the detector error magnitudes are
        // representative.
        let mut costas = Costas::new(0.01, 6.0, 6.0 * 1.03);
        let amp = 140.0;
        let mut carrier: f64 = 0.3;
        let mut lock_symbol = None;
        let mut locked_count = 0usize;
        let constellation = [
            Complex64::new(1.0, 1.0),
            Complex64::new(-1.0, 1.0),
            Complex64::new(-1.0, -1.0),
            Complex64::new(1.0, -1.0),
        ];
        for n in 0..symbols {
            let tx = constellation[n % 4] * amp / std::f64::consts::SQRT_2;
            let rx = tx * Complex64::from_polar(1.0, carrier);
            carrier += freq_offset;
            let mixed = costas.mix(rx);
            let err = Costas::detect_qpsk(mixed) / amp;
            costas.advance(err);
            if costas.locked() {
                if lock_symbol.is_none() {
                    lock_symbol = Some(n);
                }
                locked_count += 1;
            }
        }
        (costas, locked_count)
    }

    #[test]
    fn locks_on_static_phase_offset() {
        let (costas, locked_count) = run_loop(0.0, 5000);
        assert!(costas.locked());
        assert!(locked_count > 0);
    }

    #[test]
    fn tracks_residual_frequency_offset() {
        // 500 Hz at 72 ksym/s is ~0.0436 rad/symbol.
        let offset = TAU * 500.0 / 72_000.0;
        let (costas, locked_count) = run_loop(offset, 12_000);
        assert!(costas.locked(), "loop never locked");
        // Frequency register should have absorbed most of the offset.
        assert!(
            (costas.frequency() - offset).abs() < offset * 0.2,
            "freq estimate {} vs offset {}",
            costas.frequency(),
            offset
        );
        assert!(locked_count as f64 > 12_000.0 * 0.3);
    }

    #[test]
    fn gains_match_formula() {
        let bw = 0.01;
        let (alpha, beta) = loop_gains(bw);
        let denom = 1.0 + 2.0 * 0.7 * bw + bw * bw;
        assert!((alpha - 4.0 * 0.7 * bw / denom).abs() < 1e-15);
        assert!((beta - 4.0 * bw * bw / denom).abs() < 1e-15);
    }

    #[test]
    fn detector_is_zero_on_constellation_points() {
        let err = Costas::detect_qpsk(Complex64::new(1.0, 1.0));
        assert!(err.abs() < 1e-12);
        let err = Costas::detect_qpsk(Complex64::new(-1.0, 1.0));
        assert!(err.abs() < 1e-12);
    }
}
