//! Streaming DSP chain: roofing filter, matched filter, AGC, carrier
//! recovery and the offset-QPSK stream repair stages.

pub mod agc;
pub mod chebyshev;
pub mod costas;
pub mod demodulator;
pub mod doqpsk;
pub mod rrc;

pub use agc::Agc;
pub use chebyshev::Chebyshev;
pub use costas::Costas;
pub use demodulator::Demodulator;
pub use rrc::RrcFilter;
