//! Configuration types for a receive-and-decode session.
//!
//! All options carry serde defaults so a partial TOML file works; the
//! assembled configuration is validated once with [`Config::validate`]
//! before a session starts. Invalid values are rejected there rather
//! than silently clamped.

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Roofing filter bandwidth limits, Hz.
pub const MIN_BANDWIDTH: u32 = 100_000;
pub const MAX_BANDWIDTH: u32 = 210_000;

/// Operation times beyond this are warned about (original sanity cap).
pub const MAX_OPERATION_TIME: u32 = 3600;

/// Number of APID image channels carried by the downlink.
pub const CHANNEL_IMAGE_NUM: usize = 3;

/// Transmitter PSK variant; selects the demodulator stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum PskMode {
    #[default]
    Qpsk,
    Doqpsk,
    Idoqpsk,
}

impl PskMode {
    /// The offset variants carry the interleaved, differentially coded stream.
    pub fn is_offset(self) -> bool {
        !matches!(self, PskMode::Qpsk)
    }
}

/// Geometric correction applied after normalization/CLAHE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum RectifyMode {
    #[default]
    None,
    W2rg,
    #[serde(rename = "5B4AZ")]
    Az5b4,
}

impl RectifyMode {
    /// Numeric selector used by the CLI `-r` flag. Out-of-range values
    /// are rejected, never clamped.
    pub fn from_selector(value: u8) -> Result<Self, ConfigError> {
        match value {
            0 => Ok(RectifyMode::None),
            1 => Ok(RectifyMode::W2rg),
            2 => Ok(RectifyMode::Az5b4),
            _ => Err(ConfigError::InvalidRectifyMode { value }),
        }
    }
}

/// Which composite outputs a session writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    Combo,
    Split,
    #[default]
    Both,
}

impl OutputMode {
    pub fn split(self) -> bool {
        matches!(self, OutputMode::Split | OutputMode::Both)
    }

    pub fn combo(self) -> bool {
        matches!(self, OutputMode::Combo | OutputMode::Both)
    }
}

/// On-disk image format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SaveFormat {
    Jpeg,
    #[default]
    Pgm,
    Both,
}

impl SaveFormat {
    pub fn jpeg(self) -> bool {
        matches!(self, SaveFormat::Jpeg | SaveFormat::Both)
    }

    pub fn raw_pnm(self) -> bool {
        matches!(self, SaveFormat::Pgm | SaveFormat::Both)
    }
}

/// SDR front-end settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SdrConfig {
    /// Driver key matched against enumerated devices; "auto" takes the
    /// first device found.
    pub driver: String,
    pub device_index: u32,
    /// Center frequency, Hz (137.1 MHz default for Meteor-M2).
    pub center_freq_hz: u32,
    /// ADC sample rate, S/s.
    pub sample_rate: u32,
    /// Roofing low-pass bandwidth, Hz.
    pub filter_bandwidth_hz: u32,
    /// Tuner gain as a percentage of the device range; 0 selects auto.
    pub tuner_gain: u32,
    /// Frequency correction, ppm.
    pub freq_correction_ppm: i32,
}

impl Default for SdrConfig {
    fn default() -> Self {
        Self {
            driver: "auto".to_string(),
            device_index: 0,
            center_freq_hz: 137_100_000,
            sample_rate: 1_024_000,
            filter_bandwidth_hz: 110_000,
            tuner_gain: 0,
            freq_correction_ppm: 0,
        }
    }
}

/// Demodulator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemodConfig {
    pub psk_mode: PskMode,
    /// Symbol rate, sym/s (72k for Meteor-M2 LRPT).
    pub symbol_rate: u32,
    /// One-sided RRC span in symbols; tap count is 2*order*interp + 1.
    pub rrc_order: u32,
    /// RRC roll-off factor.
    pub rrc_alpha: f64,
    /// Costas loop natural bandwidth (normalized, per symbol).
    pub costas_bandwidth: f64,
    /// Smoothed phase-error level below which the PLL declares lock.
    pub pll_locked_threshold: f64,
    /// Upsampling factor into the matched filter.
    pub interp_factor: u32,
}

impl DemodConfig {
    /// Unlock threshold sits 3% above the lock threshold (hysteresis).
    pub fn pll_unlocked_threshold(&self) -> f64 {
        self.pll_locked_threshold * 1.03
    }
}

impl Default for DemodConfig {
    fn default() -> Self {
        Self {
            psk_mode: PskMode::Qpsk,
            symbol_rate: 72_000,
            rrc_order: 32,
            rrc_alpha: 0.6,
            costas_bandwidth: 0.004,
            pll_locked_threshold: 0.80,
            interp_factor: 4,
        }
    }
}

/// Frame decoder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// APIDs feeding the red, green and blue channel images.
    pub apids: [u16; CHANNEL_IMAGE_NUM],
    /// Seconds before the session stops itself.
    pub operation_time_secs: u32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            apids: [66, 65, 64],
            operation_time_secs: 900,
        }
    }
}

/// Image post-processing and output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub normalize: bool,
    pub clahe: bool,
    /// CLAHE clip limit as a multiple of the uniform bin population.
    pub clahe_clip_limit: f64,
    pub rectify: RectifyMode,
    pub colorize: bool,
    /// Rotate output images by 180 degrees (south-to-north passes).
    pub invert: bool,
    /// Keep the un-postprocessed channel images as well.
    pub save_raw: bool,
    /// Per-channel [black, white] output range after normalization.
    pub norm_range: [[u8; 2]; CHANNEL_IMAGE_NUM],
    /// Water-area enhancement floor/ceiling for the blue channel.
    pub colorize_blue_min: u8,
    pub colorize_blue_max: u8,
    /// Blue level above which a pixel is rendered as white cloud.
    pub clouds_threshold: u8,
    pub output_mode: OutputMode,
    pub save_format: SaveFormat,
    pub jpeg_quality: u8,
    /// Output directory; resolved from XDG cache dirs when absent.
    pub images_dir: Option<std::path::PathBuf>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            normalize: true,
            clahe: true,
            clahe_clip_limit: 4.0,
            rectify: RectifyMode::W2rg,
            colorize: true,
            invert: false,
            save_raw: false,
            norm_range: [[0, 240], [0, 255], [0, 255]],
            colorize_blue_min: 60,
            colorize_blue_max: 80,
            clouds_threshold: 210,
            output_mode: OutputMode::Both,
            save_format: SaveFormat::Pgm,
            jpeg_quality: 85,
            images_dir: None,
        }
    }
}

/// Complete runtime configuration for one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sdr: SdrConfig,
    #[serde(default)]
    pub demod: DemodConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub image: ImageConfig,
}

impl Config {
    /// Validate the assembled configuration. Called once before the
    /// session starts; any error here is fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sdr.sample_rate == 0 {
            return Err(ConfigError::InvalidSampleRate {
                rate: self.sdr.sample_rate,
            });
        }
        if self.sdr.filter_bandwidth_hz < MIN_BANDWIDTH
            || self.sdr.filter_bandwidth_hz > MAX_BANDWIDTH
        {
            return Err(ConfigError::BandwidthOutOfRange {
                bandwidth: self.sdr.filter_bandwidth_hz,
                min: MIN_BANDWIDTH,
                max: MAX_BANDWIDTH,
            });
        }
        if self.demod.symbol_rate == 0 {
            return Err(ConfigError::InvalidSymbolRate {
                rate: self.demod.symbol_rate,
            });
        }
        if self.sdr.sample_rate < 2 * self.demod.symbol_rate {
            return Err(ConfigError::SampleRateTooLow {
                sample_rate: self.sdr.sample_rate,
                symbol_rate: self.demod.symbol_rate,
            });
        }
        if self.demod.rrc_order == 0 || self.demod.rrc_order > 128 {
            return Err(ConfigError::InvalidRrcOrder {
                order: self.demod.rrc_order,
                max: 128,
            });
        }
        if !(self.demod.rrc_alpha > 0.0 && self.demod.rrc_alpha <= 1.0) {
            return Err(ConfigError::InvalidRrcAlpha {
                alpha: self.demod.rrc_alpha,
            });
        }
        if !(self.demod.costas_bandwidth.is_finite() && self.demod.costas_bandwidth > 0.0) {
            return Err(ConfigError::InvalidLoopBandwidth {
                bandwidth: self.demod.costas_bandwidth,
            });
        }
        if !(self.demod.pll_locked_threshold.is_finite() && self.demod.pll_locked_threshold > 0.0)
        {
            return Err(ConfigError::InvalidLockThreshold {
                threshold: self.demod.pll_locked_threshold,
            });
        }
        if self.demod.interp_factor == 0 || self.demod.interp_factor > 16 {
            return Err(ConfigError::InvalidInterpFactor {
                factor: self.demod.interp_factor,
                max: 16,
            });
        }
        for &apid in &self.decoder.apids {
            if !(64..=69).contains(&apid) {
                return Err(ConfigError::InvalidApid { apid });
            }
        }
        if self.decoder.operation_time_secs == 0 {
            return Err(ConfigError::ZeroOperationTime);
        }
        for (channel, range) in self.image.norm_range.iter().enumerate() {
            if range[0] > range[1] {
                return Err(ConfigError::InvertedNormRange {
                    channel,
                    black: range[0],
                    white: range[1],
                });
            }
        }
        Ok(())
    }
}
