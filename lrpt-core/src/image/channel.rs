//! Per-APID channel images and the builder that routes decoded MCU
//! runs into them.
//!
//! Channel images are fixed-width 8-bit grayscale buffers growing in
//! 8-pixel bands as packets arrive; pixels no packet ever covered stay
//! MAX_WHITE. The builder advances a channel's row whenever the MCU id
//! wraps back below the previous packet's id.

use tracing::debug;

use crate::config::CHANNEL_IMAGE_NUM;
use crate::decode::SourcePacket;
use crate::image::jpeg::{McuDecoder, MAX_WHITE, MCU_PER_LINE, METEOR_IMAGE_WIDTH};

#[derive(Debug, Clone)]
pub struct ChannelImage {
    pub apid: u16,
    data: Vec<u8>,
    mcu_rows: usize,
}

impl ChannelImage {
    pub fn new(apid: u16) -> Self {
        Self {
            apid,
            data: Vec::new(),
            mcu_rows: 0,
        }
    }

    pub fn width(&self) -> usize {
        METEOR_IMAGE_WIDTH
    }

    pub fn height(&self) -> usize {
        self.mcu_rows * 8
    }

    pub fn is_empty(&self) -> bool {
        self.mcu_rows == 0
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.data
    }

    /// Grow the buffer to cover `rows` MCU rows, new bands white.
    pub fn ensure_mcu_rows(&mut self, rows: usize) {
        if rows > self.mcu_rows {
            self.data.resize(rows * 8 * METEOR_IMAGE_WIDTH, MAX_WHITE);
            self.mcu_rows = rows;
        }
    }

    /// Write an 8x8 block at MCU coordinates.
    pub fn put_block(&mut self, mcu_row: usize, mcu_col: usize, block: &[u8; 64]) {
        debug_assert!(mcu_col < MCU_PER_LINE);
        self.ensure_mcu_rows(mcu_row + 1);
        let top = mcu_row * 8;
        let left = mcu_col * 8;
        for row in 0..8 {
            let offset = (top + row) * METEOR_IMAGE_WIDTH + left;
            self.data[offset..offset + 8].copy_from_slice(&block[row * 8..row * 8 + 8]);
        }
    }
}

/// Per-channel packet-ordering state.
#[derive(Debug, Clone, Copy, Default)]
struct RowCursor {
    last_mcu: Option<u8>,
    mcu_row: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BuilderStats {
    pub packets: u64,
    pub bad_packets: u64,
    pub blocks: u64,
}

/// Routes decoded image packets into the three channel images.
pub struct ImageBuilder {
    decoder: McuDecoder,
    apids: [u16; CHANNEL_IMAGE_NUM],
    channels: [ChannelImage; CHANNEL_IMAGE_NUM],
    cursors: [RowCursor; CHANNEL_IMAGE_NUM],
    stats: BuilderStats,
}

impl ImageBuilder {
    pub fn new(apids: [u16; CHANNEL_IMAGE_NUM]) -> Self {
        Self {
            decoder: McuDecoder::new(),
            apids,
            channels: [
                ChannelImage::new(apids[0]),
                ChannelImage::new(apids[1]),
                ChannelImage::new(apids[2]),
            ],
            cursors: [RowCursor::default(); CHANNEL_IMAGE_NUM],
            stats: BuilderStats::default(),
        }
    }

    pub fn stats(&self) -> BuilderStats {
        self.stats
    }

    /// Consume one source packet; packets for unknown APIDs are ignored.
    pub fn process_packet(&mut self, packet: &SourcePacket) {
        let Some(channel) = self.apids.iter().position(|&apid| apid == packet.apid) else {
            return;
        };
        self.stats.packets += 1;

        let Some(run) = self.decoder.decode_packet(&packet.data) else {
            self.stats.bad_packets += 1;
            debug!(apid = packet.apid, "undecodable image packet");
            return;
        };

        let cursor = &mut self.cursors[channel];
        if let Some(last) = cursor.last_mcu {
            // MCU ids only move forward within a scan row; a wrap
            // means the next 8-pixel band started.
            if run.mcu_id <= last {
                cursor.mcu_row += 1;
            }
        }
        cursor.last_mcu = Some(run.mcu_id);

        let image = &mut self.channels[channel];
        for (index, block) in run.blocks.iter().enumerate() {
            let mcu_col = run.mcu_id as usize + index;
            if mcu_col >= MCU_PER_LINE {
                break;
            }
            image.put_block(cursor.mcu_row, mcu_col, block);
            self.stats.blocks += 1;
        }
    }

    /// MCU rows each channel accumulated so far, before any padding.
    pub fn channel_rows(&self) -> [usize; CHANNEL_IMAGE_NUM] {
        [
            self.channels[0].mcu_rows,
            self.channels[1].mcu_rows,
            self.channels[2].mcu_rows,
        ]
    }

    /// Finish the session: pad all channels to the common height so
    /// the images stay row-aligned, missing rows white.
    pub fn finalize(mut self) -> [ChannelImage; CHANNEL_IMAGE_NUM] {
        let rows = self
            .channels
            .iter()
            .map(|c| c.mcu_rows)
            .max()
            .unwrap_or(0);
        for channel in &mut self.channels {
            if channel.mcu_rows > 0 || rows > 0 {
                channel.ensure_mcu_rows(rows);
            }
        }
        self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(value: u8) -> [u8; 64] {
        [value; 64]
    }

    #[test]
    fn blocks_land_at_mcu_coordinates() {
        let mut image = ChannelImage::new(64);
        image.put_block(1, 2, &block(9));
        assert_eq!(image.height(), 16);
        // Pixel (row 8, col 16) is the block's top-left corner.
        assert_eq!(image.pixels()[8 * METEOR_IMAGE_WIDTH + 16], 9);
        // Outside the block stays white.
        assert_eq!(image.pixels()[0], MAX_WHITE);
    }

    #[test]
    fn width_is_invariant() {
        let mut image = ChannelImage::new(64);
        assert_eq!(image.width(), METEOR_IMAGE_WIDTH);
        image.ensure_mcu_rows(3);
        assert_eq!(image.pixels().len(), METEOR_IMAGE_WIDTH * 24);
    }

    #[test]
    fn finalize_aligns_channel_heights() {
        let mut builder = ImageBuilder::new([64, 65, 66]);
        builder.channels[0].ensure_mcu_rows(4);
        builder.channels[1].ensure_mcu_rows(2);

        let channels = builder.finalize();
        assert_eq!(channels[0].height(), 32);
        assert_eq!(channels[1].height(), 32);
        assert_eq!(channels[2].height(), 32);
        // Padded rows are white.
        assert!(channels[1].pixels()[METEOR_IMAGE_WIDTH * 31] == MAX_WHITE);
    }

    #[test]
    fn unknown_apid_is_ignored() {
        let mut builder = ImageBuilder::new([64, 65, 66]);
        let packet = SourcePacket {
            apid: 70,
            sequence: 0,
            time: None,
            data: vec![0, 80, 0, 0xAA],
        };
        builder.process_packet(&packet);
        assert_eq!(builder.stats().packets, 0);
    }
}
