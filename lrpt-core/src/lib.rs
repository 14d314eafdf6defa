//! Meteor-M2 LRPT receiver core.
//!
//! The signal-to-image pipeline for the 137 MHz LRPT downlink: a
//! streaming DSP front end (decimation, Chebyshev roofing filter,
//! root-raised-cosine matched filter, AGC, Costas carrier recovery),
//! the frame decoder (sync correlation, soft Viterbi, deinterleaved
//! Reed-Solomon, VCDU and source-packet parsing) and the Meteor-JPEG
//! image reconstructor with histogram normalization, CLAHE, geometric
//! rectification and pseudocolor composition.
//!
//! [`session::Session`] ties the stages together across the producer,
//! DSP and decoder threads; `synth` generates deterministic test
//! streams for the whole chain.

pub mod config;
pub mod decode;
pub mod dsp;
pub mod errors;
pub mod image;
pub mod session;
pub mod source;
pub mod synth;

pub use config::{Config, PskMode, RectifyMode};
pub use errors::{LrptError, Result};
pub use session::{CancelToken, OutputSpec, Session, SessionStatus, SessionSummary};
pub use source::{FileSource, IqSource};
