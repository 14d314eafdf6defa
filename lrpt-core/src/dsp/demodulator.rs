//! Streaming demodulator: matched filter, AGC and Costas loop driven
//! by a symbol-timing accumulator.
//!
//! Front-end samples arrive at the effective (decimated) rate. Each is
//! pushed through the RRC filter `interp_factor` times; a timing
//! accumulator fires once per symbol (twice per symbol for the offset
//! modes, half a period apart) and the fired sample goes through
//! AGC -> Costas mix -> phase detector -> soft-symbol clamp. A
//! Gardner-style error from the half-period sample between consecutive
//! instants nudges the accumulator onto the symbol centers.

use num_complex::Complex64;

use crate::config::{DemodConfig, PskMode};
use crate::dsp::agc::Agc;
use crate::dsp::costas::Costas;
use crate::dsp::rrc::RrcFilter;
use crate::errors::Result;

/// Phase-detector normalization, matching the soft-symbol full scale.
const ERR_SCALE: f64 = 255.0;

/// Largest timing nudge per symbol, interpolated samples.
const MAX_TIMING_NUDGE: f64 = 2.0;

#[derive(Debug, Clone)]
pub struct Demodulator {
    mode: PskMode,
    rrc: RrcFilter,
    agc: Agc,
    costas: Costas,
    interp: usize,
    /// Interpolated samples per sampling instant (symbol period for
    /// QPSK, half period for the offset modes).
    sym_period: f64,
    resync_offset: f64,
    timing_gain: f64,
    /// Previous sampling instant and the mid-point between instants,
    /// for the timing error.
    prev: Complex64,
    middle: Complex64,
    middle_taken: bool,
    /// Pending in-phase half-symbol sample (offset modes only).
    inphase: Option<Complex64>,
}

impl Demodulator {
    pub fn new(config: &DemodConfig, effective_sample_rate: f64) -> Result<Self> {
        let interp = config.interp_factor as usize;
        let osf = effective_sample_rate / config.symbol_rate as f64;
        let rrc = RrcFilter::new(config.rrc_order as usize, interp, osf, config.rrc_alpha)?;
        let costas = Costas::new(
            config.costas_bandwidth,
            config.pll_locked_threshold,
            config.pll_unlocked_threshold(),
        );

        let full_period = effective_sample_rate * interp as f64 / config.symbol_rate as f64;
        let sym_period = if config.psk_mode.is_offset() {
            full_period / 2.0
        } else {
            full_period
        };

        Ok(Self {
            mode: config.psk_mode,
            rrc,
            agc: Agc::new(),
            costas,
            interp,
            sym_period,
            resync_offset: 0.0,
            timing_gain: sym_period / 2_000_000.0,
            prev: Complex64::new(0.0, 0.0),
            middle: Complex64::new(0.0, 0.0),
            middle_taken: false,
            inphase: None,
        })
    }

    /// Demodulate a front-end buffer, appending I/Q soft symbols to
    /// `out`. An empty input produces no output.
    pub fn process(&mut self, samples: &[Complex64], out: &mut Vec<i8>) {
        for &sample in samples {
            for _ in 0..self.interp {
                let filtered = self.rrc.feed(sample);
                self.resync_offset += 1.0;

                if self.resync_offset >= self.sym_period {
                    self.resync_offset -= self.sym_period;
                    let cur = self.costas.mix(self.agc.apply(filtered));

                    // Gardner timing error from the sample halfway
                    // between this instant and the previous one.
                    let error = (cur.re - self.prev.re) * self.middle.re
                        + (cur.im - self.prev.im) * self.middle.im;
                    self.resync_offset +=
                        (error * self.timing_gain).clamp(-MAX_TIMING_NUDGE, MAX_TIMING_NUDGE);

                    self.prev = cur;
                    self.middle_taken = false;
                    self.emit(cur, out);
                } else if !self.middle_taken && self.resync_offset >= self.sym_period / 2.0 {
                    self.middle = self.costas.mix(self.agc.apply(filtered));
                    self.middle_taken = true;
                }
            }
        }
    }

    fn emit(&mut self, cur: Complex64, out: &mut Vec<i8>) {
        match self.mode {
            PskMode::Qpsk => {
                let error = Costas::detect_qpsk(cur) / ERR_SCALE;
                self.costas.advance(error);
                out.push(clamp_soft(cur.re));
                out.push(clamp_soft(cur.im));
            }
            PskMode::Doqpsk | PskMode::Idoqpsk => {
                // Offset keying: I is decided half a symbol before Q.
                match self.inphase.take() {
                    None => self.inphase = Some(cur),
                    Some(early) => {
                        let symbol = Complex64::new(early.re, cur.im);
                        let error = Costas::detect_qpsk(symbol) / ERR_SCALE;
                        self.costas.advance(error);
                        out.push(clamp_soft(early.re));
                        out.push(clamp_soft(cur.im));
                    }
                }
            }
        }
    }

    pub fn pll_locked(&self) -> bool {
        self.costas.locked()
    }

    /// Smoothed phase-error level, the UI's PLL quality metric.
    pub fn pll_average(&self) -> f64 {
        self.costas.average_error()
    }

    /// Average input magnitude seen by the AGC.
    pub fn signal_level(&self) -> f64 {
        self.agc.average()
    }

    pub fn agc_gain(&self) -> f64 {
        self.agc.gain()
    }
}

/// Scale a recovered rail to the signed 8-bit soft range.
fn clamp_soft(value: f64) -> i8 {
    (value / 2.0).round().clamp(-128.0, 127.0) as i8
}
