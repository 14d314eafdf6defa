//! Meteor imagery reconstruction: MCU decoding, channel assembly,
//! post-processing and file output.

pub mod channel;
pub mod jpeg;
pub mod output;
pub mod postproc;

pub use channel::{ChannelImage, ImageBuilder};
pub use jpeg::{McuDecoder, MAX_WHITE, MCU_PER_LINE, METEOR_IMAGE_WIDTH};
