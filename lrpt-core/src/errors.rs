//! Error types for the LRPT pipeline, with granular categories.
//!
//! Only configuration, device and allocation failures are fatal for a
//! session; everything the decoder detects mid-stream (lost sync,
//! uncorrectable frames, packet gaps) is counted and consumed at the
//! stage that saw it.

use thiserror::Error;

/// Top-level error type for all LRPT operations
#[derive(Debug, Error)]
pub enum LrptError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("DSP processing error: {0}")]
    Dsp(#[from] DspError),

    #[error("Decoding error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Image error: {0}")]
    Image(#[from] ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors, all fatal at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid sample rate: {rate} S/s (must be > 0)")]
    InvalidSampleRate { rate: u32 },

    #[error("Roofing filter bandwidth {bandwidth} Hz outside {min}..={max} Hz")]
    BandwidthOutOfRange { bandwidth: u32, min: u32, max: u32 },

    #[error("Invalid symbol rate: {rate} sym/s (must be > 0)")]
    InvalidSymbolRate { rate: u32 },

    #[error("Sample rate {sample_rate} S/s below 2x symbol rate {symbol_rate} sym/s")]
    SampleRateTooLow { sample_rate: u32, symbol_rate: u32 },

    #[error("Invalid RRC filter order: {order} (must be 1..={max})")]
    InvalidRrcOrder { order: u32, max: u32 },

    #[error("RRC alpha {alpha} outside (0, 1]")]
    InvalidRrcAlpha { alpha: f64 },

    #[error("Costas loop bandwidth {bandwidth} must be finite and > 0")]
    InvalidLoopBandwidth { bandwidth: f64 },

    #[error("PLL lock threshold {threshold} must be finite and > 0")]
    InvalidLockThreshold { threshold: f64 },

    #[error("Interpolation factor {factor} outside 1..={max}")]
    InvalidInterpFactor { factor: u32, max: u32 },

    #[error("APID {apid} outside the LRPT imagery range 64..=69")]
    InvalidApid { apid: u16 },

    #[error("Normalization range inverted for channel {channel}: {black} > {white}")]
    InvertedNormRange { channel: usize, black: u8, white: u8 },

    #[error("Invalid rectification selector {value} (expected 0, 1 or 2)")]
    InvalidRectifyMode { value: u8 },

    #[error("Operation time of 0 seconds")]
    ZeroOperationTime,

    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {reason}")]
    FileParse { path: String, reason: String },
}

/// SDR / IQ source errors
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("No device matched driver key {key:?}")]
    NoDeviceMatched { key: String },

    #[error("Failed to open device {name}: {reason}")]
    OpenFailed { name: String, reason: String },

    #[error("Failed to set {parameter} to {value}")]
    TuneFailed { parameter: &'static str, value: String },

    #[error("Stream read failed after {retries} retries")]
    StreamStalled { retries: u32 },

    #[error("Unsupported IQ recording format: {details}")]
    UnsupportedFormat { details: String },
}

/// DSP stage errors
#[derive(Debug, Error)]
pub enum DspError {
    #[error("Filter design failed: {reason}")]
    FilterDesignFailed { reason: String },

    #[error("Cutoff {cutoff} outside (0, 0.5) of the sample rate")]
    InvalidCutoff { cutoff: f64 },

    #[error("Empty filter: {0} taps requested")]
    EmptyFilter(usize),
}

/// Frame/packet decoding errors
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Soft frame too short: need {required} symbols, have {available}")]
    ShortSoftFrame { required: usize, available: usize },

    #[error("Reed-Solomon subframe {subframe} uncorrectable")]
    Uncorrectable { subframe: usize },

    #[error("De-interleaver resync produced no data from {input} symbols")]
    ResyncFailed { input: usize },
}

/// Image construction and output errors
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Channel image empty, {operation} not performed")]
    EmptyImage { operation: &'static str },

    #[error("Failed to write {path}: {reason}")]
    WriteFailed { path: String, reason: String },
}

/// Result type alias for LRPT operations
pub type Result<T> = std::result::Result<T, LrptError>;
