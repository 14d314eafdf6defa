//! IQ sample sources.
//!
//! The session consumes any [`IqSource`]: bursts of interleaved complex
//! samples normalized to floats centered at zero. The vendor SDR
//! bindings live behind this trait; the in-tree implementation reads
//! recorded IQ files, which is also what the test suite drives.

pub mod file;

use num_complex::Complex64;

use crate::errors::Result;

pub use file::FileSource;

/// Largest decimation factor the adapter will pick.
const MAX_DECIMATION: u32 = 32;

/// A configured device descriptor, resolved against an enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub driver: String,
    pub index: u32,
    pub center_freq_hz: u32,
    pub sample_rate: u32,
    pub bandwidth_hz: u32,
    /// Gain in percent of the device range; 0 = auto.
    pub gain: u32,
    pub freq_correction_ppm: i32,
}

impl DeviceDescriptor {
    pub fn from_config(sdr: &crate::config::SdrConfig) -> Self {
        Self {
            driver: sdr.driver.clone(),
            index: sdr.device_index,
            center_freq_hz: sdr.center_freq_hz,
            sample_rate: sdr.sample_rate,
            bandwidth_hz: sdr.filter_bandwidth_hz,
            gain: sdr.tuner_gain,
            freq_correction_ppm: sdr.freq_correction_ppm,
        }
    }

    /// Auto-detect: "auto" takes the first enumerated device, anything
    /// else must match a driver key exactly.
    pub fn match_device<'a>(&self, enumerated: &'a [String]) -> Option<(usize, &'a str)> {
        if self.driver.eq_ignore_ascii_case("auto") {
            return enumerated.first().map(|d| (0, d.as_str()));
        }
        enumerated
            .iter()
            .enumerate()
            .find(|(_, driver)| driver.eq_ignore_ascii_case(&self.driver))
            .map(|(idx, driver)| (idx, driver.as_str()))
    }
}

/// A stream of IQ bursts.
pub trait IqSource: Send {
    fn start(&mut self) -> Result<()>;

    /// Stop streaming; subsequent reads return zero-length bursts.
    fn stop(&mut self);

    fn set_frequency(&mut self, hz: u32) -> Result<()>;

    /// Gain in percent of the device range; 0 selects auto mode.
    fn set_gain(&mut self, percent: u32) -> Result<()>;

    fn sample_rate(&self) -> u32;

    /// Preferred burst size, samples.
    fn mtu(&self) -> usize;

    /// Fill `burst` with up to `mtu()` samples. Ok(0) is a transient
    /// underrun and the caller retries; errors are fatal.
    fn read_burst(&mut self, burst: &mut Vec<Complex64>) -> Result<usize>;

    /// True once the source can never produce samples again (end of a
    /// recording). A live device never reports exhaustion.
    fn is_exhausted(&self) -> bool {
        false
    }

    /// Live devices cannot pause, so a burst is dropped when the
    /// consumer is behind; recordings can wait instead.
    fn is_realtime(&self) -> bool {
        true
    }
}

/// Map a 0-100 percent gain request onto a device's supported gain
/// steps (tenths of dB, ascending): scale into the device range, then
/// take the nearest available step. Percent 0 means auto mode and is
/// the caller's branch, not this helper's.
pub fn nearest_gain(percent: u32, supported: &[i32]) -> Option<i32> {
    let (&first, &last) = (supported.first()?, supported.last()?);
    let span = (last - first) as i64;
    let target = first as i64 + span * percent.min(100) as i64 / 100;

    supported
        .iter()
        .copied()
        .min_by_key(|&gain| (gain as i64 - target).abs())
}

/// Decimation factor for a sample rate against a symbol rate: the
/// nearest power of two in [1, 32] to `sample_rate / (4 * symbol_rate)`
/// when the rate is above 4x the symbol rate, else 1.
pub fn pick_decimation(sample_rate: u32, symbol_rate: u32) -> u32 {
    let target = 4 * symbol_rate;
    if sample_rate <= target {
        return 1;
    }

    let ratio = sample_rate / target;
    let mut best = 1u32;
    let mut best_diff = u32::MAX;
    let mut power = 1u32;
    while power <= MAX_DECIMATION {
        let diff = power.abs_diff(ratio);
        if diff < best_diff {
            best_diff = diff;
            best = power;
        }
        power <<= 1;
    }
    best
}

/// Decimate a burst by block summation, rescaled by the factor so the
/// signal level is independent of the decimation chosen.
pub fn decimate_burst(samples: &[Complex64], factor: u32) -> Vec<Complex64> {
    if factor <= 1 {
        return samples.to_vec();
    }
    let factor = factor as usize;
    samples
        .chunks_exact(factor)
        .map(|chunk| {
            let sum: Complex64 = chunk.iter().sum();
            sum / factor as f64
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimation_is_identity_at_low_rates() {
        assert_eq!(pick_decimation(140_000, 72_000), 1);
        assert_eq!(pick_decimation(288_000, 72_000), 1);
    }

    #[test]
    fn decimation_picks_nearest_power_of_two() {
        // 1.024 MS/s over 4*72k = 3.55 -> 4.
        assert_eq!(pick_decimation(1_024_000, 72_000), 4);
        // 2.048 MS/s -> 7.1 -> 8.
        assert_eq!(pick_decimation(2_048_000, 72_000), 8);
        // Absurd rates clamp at 32.
        assert_eq!(pick_decimation(100_000_000, 72_000), 32);
    }

    #[test]
    fn decimate_preserves_mean_level() {
        let samples = vec![Complex64::new(2.0, -4.0); 64];
        let out = decimate_burst(&samples, 4);
        assert_eq!(out.len(), 16);
        assert!((out[0].re - 2.0).abs() < 1e-12);
        assert!((out[0].im + 4.0).abs() < 1e-12);
    }

    #[test]
    fn gain_request_scales_into_device_range() {
        // R820T-style gain table, tenths of dB.
        let gains = [0, 9, 14, 27, 37, 77, 87, 125, 144, 157, 166, 197,
                     207, 229, 254, 280, 297, 328, 338, 364, 372, 386,
                     402, 421, 434, 439, 445, 480, 496];
        assert_eq!(nearest_gain(100, &gains), Some(496));
        assert_eq!(nearest_gain(0, &gains), Some(0));
        // Mid-range request lands on the closest supported step.
        let mid = nearest_gain(50, &gains).unwrap();
        assert!((mid - 248).abs() <= 26);
        assert_eq!(nearest_gain(50, &[]), None);
    }

    #[test]
    fn auto_driver_matches_first_device() {
        let devices = vec!["rtlsdr".to_string(), "airspy".to_string()];
        let mut descriptor = DeviceDescriptor::from_config(&crate::config::SdrConfig::default());
        descriptor.driver = "auto".into();
        assert_eq!(descriptor.match_device(&devices), Some((0, "rtlsdr")));

        descriptor.driver = "airspy".into();
        assert_eq!(descriptor.match_device(&devices), Some((1, "airspy")));

        descriptor.driver = "hackrf".into();
        assert_eq!(descriptor.match_device(&devices), None);
    }
}
