//! LRPT frame decoding: sync correlation, convolutional and
//! Reed-Solomon error correction, VCDU and source-packet parsing.

pub mod correlator;
pub mod framing;
pub mod packet;
pub mod rs;
pub mod viterbi;

pub use correlator::{Correlator, SyncHit};
pub use framing::{FrameDecoder, VCDU_LEN};
pub use packet::{PacketAssembler, SourcePacket};
pub use viterbi::Viterbi;
