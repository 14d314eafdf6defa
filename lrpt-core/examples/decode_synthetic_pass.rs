//! Decode a synthesized Meteor-M2 pass end to end.
//!
//! Builds a short LRPT transmission (image packets -> VCDUs -> CADUs
//! -> soft symbols), runs it through the frame decoder and image
//! builder, post-processes the channels and writes PGM/PPM files into
//! ./synthetic-pass/.
//!
//! Run with: cargo run --example decode_synthetic_pass

use rand::rngs::StdRng;
use rand::SeedableRng;

use lrpt_core::config::ImageConfig;
use lrpt_core::decode::framing::FrameDecoder;
use lrpt_core::decode::packet::{PacketAssembler, SCID_METEOR_M2};
use lrpt_core::decode::rs::ReedSolomon;
use lrpt_core::image::channel::ImageBuilder;
use lrpt_core::image::{output, postproc};
use lrpt_core::synth::{build_cadu, build_packet, encode_cadus, pack_vcdus, soft_stream, McuEncoder};

const APIDS: [u16; 3] = [66, 65, 64];

fn main() -> lrpt_core::Result<()> {
    let encoder = McuEncoder::new();
    let rs_codec = ReedSolomon::new();

    // Four MCU rows of smoothly varying imagery on all three channels.
    let mut packets = Vec::new();
    let mut sequences = [0u16; 3];
    for row in 0..4usize {
        for (channel, &apid) in APIDS.iter().enumerate() {
            for group in 0..14usize {
                let blocks: Vec<[u8; 64]> = (0..14)
                    .map(|b| {
                        let col = group * 14 + b;
                        let mut block = [0u8; 64];
                        for (idx, pixel) in block.iter_mut().enumerate() {
                            *pixel = (30
                                + channel * 40
                                + row * 12
                                + col / 8
                                + (idx % 8) * 2) as u8;
                        }
                        block
                    })
                    .collect();
                let body =
                    encoder.encode_packet_body((group * 14) as u8, 80, group as u8, &blocks);
                packets.push(build_packet(apid, sequences[channel], &body));
                sequences[channel] += 1;
            }
        }
    }

    let cadus: Vec<[u8; 1024]> = pack_vcdus(&packets, 0, 0)
        .iter()
        .map(|vcdu| build_cadu(&rs_codec, vcdu))
        .collect();
    println!("synthesized {} packets in {} frames", packets.len(), cadus.len());

    let bits = encode_cadus(&cadus);
    let mut rng = StdRng::seed_from_u64(2026);
    let soft = soft_stream(&bits, 110.0, 12.0, &mut rng);

    let mut frame_decoder = FrameDecoder::new();
    let mut vcdus = Vec::new();
    frame_decoder.process(&soft, &mut vcdus);
    println!(
        "decoded {}/{} frames, signal quality {:.1}%",
        frame_decoder.frames_ok(),
        frame_decoder.frames_total(),
        frame_decoder.signal_quality()
    );

    let mut assembler = PacketAssembler::new(SCID_METEOR_M2);
    let mut builder = ImageBuilder::new(APIDS);
    let mut decoded_packets = Vec::new();
    for vcdu in &vcdus {
        assembler.process_vcdu(vcdu, &mut decoded_packets);
    }
    for packet in &decoded_packets {
        builder.process_packet(packet);
    }

    let mut channels = builder.finalize();
    let image_config = ImageConfig {
        clahe: false,
        rectify: lrpt_core::RectifyMode::None,
        ..Default::default()
    };
    postproc::postprocess_channels(&mut channels, &image_config);

    let dir = std::path::Path::new("synthetic-pass");
    std::fs::create_dir_all(dir)?;
    for channel in &channels {
        let path = dir.join(format!("Ch{}.pgm", channel.apid));
        output::save_pgm(&path, channel.width(), channel.height(), channel.pixels())?;
        println!("wrote {}", path.display());
    }

    let combo = postproc::combo_image(&mut channels, &image_config);
    let combo_path = dir.join("Combo.ppm");
    output::save_ppm(
        &combo_path,
        channels[0].width(),
        channels[0].height(),
        &combo,
    )?;
    println!("wrote {}", combo_path.display());

    Ok(())
}
