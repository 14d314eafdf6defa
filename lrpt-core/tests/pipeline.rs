//! End-to-end decode-chain tests over synthetic LRPT streams.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use lrpt_core::config::DemodConfig;
use lrpt_core::decode::correlator::Correlator;
use lrpt_core::decode::framing::{FrameDecoder, VCDU_LEN};
use lrpt_core::decode::packet::{PacketAssembler, SCID_METEOR_M2};
use lrpt_core::decode::rs::{self, ReedSolomon};
use lrpt_core::dsp::demodulator::Demodulator;
use lrpt_core::image::channel::ImageBuilder;
use lrpt_core::image::{METEOR_IMAGE_WIDTH, MAX_WHITE};
use lrpt_core::synth::{
    build_cadu, build_packet, encode_cadus, modulate_qpsk, pack_vcdus, rotate_soft_stream,
    soft_stream, McuEncoder,
};
use lrpt_core::PskMode;

const APIDS: [u16; 3] = [66, 65, 64];

/// Flat test value for one MCU of one channel.
fn mcu_value(apid: u16, row: usize, col: usize) -> u8 {
    (40 + (apid as usize % 8) * 20 + row * 7 + col % 30) as u8
}

/// Image packets covering `mcu_rows` full rows on all three channels:
/// fourteen packets of fourteen MCUs per row per channel.
fn image_packets(mcu_rows: usize) -> Vec<Vec<u8>> {
    let encoder = McuEncoder::new();
    let mut sequences: HashMap<u16, u16> = HashMap::new();
    let mut packets = Vec::new();

    for row in 0..mcu_rows {
        for &apid in &APIDS {
            for group in 0..14usize {
                let mcu_id = (group * 14) as u8;
                let blocks: Vec<[u8; 64]> = (0..14)
                    .map(|b| [mcu_value(apid, row, group * 14 + b); 64])
                    .collect();
                let body =
                    encoder.encode_packet_body(mcu_id, 80, (row * 14 + group) as u8, &blocks);
                let seq = sequences.entry(apid).or_insert(0);
                packets.push(build_packet(apid, *seq, &body));
                *seq = (*seq + 1) & 0x3FFF;
            }
        }
    }
    packets
}

fn cadus_for(packets: &[Vec<u8>]) -> Vec<[u8; 1024]> {
    let rs_codec = ReedSolomon::new();
    pack_vcdus(packets, 0, 0)
        .iter()
        .map(|vcdu| build_cadu(&rs_codec, vcdu))
        .collect()
}

#[test]
fn soft_stream_decodes_to_row_aligned_images() {
    let mcu_rows = 2;
    let packets = image_packets(mcu_rows);
    let cadus = cadus_for(&packets);
    let bits = encode_cadus(&cadus);

    let mut rng = StdRng::seed_from_u64(42);
    let soft = soft_stream(&bits, 125.0, 4.0, &mut rng);

    let mut frame_decoder = FrameDecoder::new();
    let mut vcdus: Vec<[u8; VCDU_LEN]> = Vec::new();
    frame_decoder.process(&soft, &mut vcdus);

    assert_eq!(frame_decoder.frames_total(), cadus.len() as u64);
    assert_eq!(frame_decoder.frames_ok(), cadus.len() as u64);
    assert!(frame_decoder.signal_quality() > 80.0);

    let mut assembler = PacketAssembler::new(SCID_METEOR_M2);
    let mut builder = ImageBuilder::new(APIDS);
    let mut out = Vec::new();
    for vcdu in &vcdus {
        assembler.process_vcdu(vcdu, &mut out);
    }
    for packet in &out {
        builder.process_packet(packet);
    }
    assert_eq!(assembler.stats().drops, 0);

    let channels = builder.finalize();
    for (index, channel) in channels.iter().enumerate() {
        assert_eq!(channel.width(), METEOR_IMAGE_WIDTH);
        assert_eq!(channel.height(), mcu_rows * 8);
        assert_eq!(channel.height() % 8, 0);

        // Spot-check pixels inside a few MCUs.
        let apid = APIDS[index];
        for (row, col) in [(0usize, 0usize), (0, 97), (1, 195)] {
            let expected = mcu_value(apid, row, col) as i32;
            let pixel =
                channel.pixels()[(row * 8 + 3) * METEOR_IMAGE_WIDTH + col * 8 + 3] as i32;
            assert!(
                (pixel - expected).abs() <= 3,
                "channel {apid} mcu ({row},{col}): {pixel} vs {expected}"
            );
        }
    }
}

#[test]
fn rs_stage_corrects_three_byte_errors_in_every_subframe() {
    // One hundred frames, three random byte errors per subframe.
    let rs_codec = ReedSolomon::new();
    let mut rng = StdRng::seed_from_u64(7);

    for frame in 0..100 {
        let mut subframes = [[0u8; rs::BLOCK_LEN]; rs::INTERLEAVE_DEPTH];
        for subframe in subframes.iter_mut() {
            let mut data = [0u8; rs::DATA_LEN];
            rng.fill(&mut data[..]);
            let parity = rs_codec.encode_dual(&data);
            subframe[..rs::DATA_LEN].copy_from_slice(&data);
            subframe[rs::DATA_LEN..].copy_from_slice(&parity);
        }
        let clean = subframes;

        let mut wire = rs::interleave(&subframes);
        for k in 0..rs::INTERLEAVE_DEPTH {
            for _ in 0..3 {
                let j = rng.gen_range(0..rs::BLOCK_LEN);
                wire[k + rs::INTERLEAVE_DEPTH * j] ^= rng.gen_range(1..=255u8);
            }
        }

        let mut received = rs::deinterleave(&wire);
        for (index, subframe) in received.iter_mut().enumerate() {
            let corrected = rs_codec
                .decode_dual(subframe)
                .unwrap_or_else(|_| panic!("frame {frame} subframe {index} uncorrectable"));
            assert!(corrected <= 3);
            assert_eq!(subframe[..], clean[index][..]);
        }
    }
}

#[test]
fn sync_hunt_identifies_each_rotation() {
    let packets = image_packets(1);
    let cadus = cadus_for(&packets);
    let bits = encode_cadus(&cadus[..1]);

    let mut rng = StdRng::seed_from_u64(9);
    let clean = soft_stream(&bits, 110.0, 2.0, &mut rng);
    let correlator = Correlator::new();

    for rotation in 0..4usize {
        let mut rotated = clean.clone();
        rotate_soft_stream(&mut rotated, rotation, false);
        let hit = correlator
            .find_sync(&rotated, 0, 4096)
            .expect("sync marker found");
        assert_eq!(hit.position, 0);
        assert_eq!(hit.pattern, rotation, "wrong orientation for {rotation}");

        // The frame must also decode through the fixed orientation.
        let mut decoder = FrameDecoder::new();
        let mut vcdus = Vec::new();
        decoder.process(&rotated, &mut vcdus);
        assert_eq!(decoder.frames_ok(), 1, "rotation {rotation} frame lost");
    }

    let mut inverted = clean.clone();
    rotate_soft_stream(&mut inverted, 1, true);
    let hit = correlator.find_sync(&inverted, 0, 4096).unwrap();
    assert_eq!(hit.pattern, 5);
}

#[test]
fn packet_sequence_gap_drops_in_progress_only() {
    let encoder = McuEncoder::new();
    let blocks: Vec<[u8; 64]> = (0..14).map(|_| [90u8; 64]).collect();

    // Sequence 5 then 7: one gap event, both packets usable.
    let body_a = encoder.encode_packet_body(0, 80, 0, &blocks);
    let body_b = encoder.encode_packet_body(14, 80, 1, &blocks);
    let packets = vec![
        build_packet(APIDS[0], 5, &body_a),
        build_packet(APIDS[0], 7, &body_b),
    ];
    let cadus = cadus_for(&packets);
    let bits = encode_cadus(&cadus);
    let mut rng = StdRng::seed_from_u64(3);
    let soft = soft_stream(&bits, 110.0, 1.0, &mut rng);

    let mut frame_decoder = FrameDecoder::new();
    let mut vcdus = Vec::new();
    frame_decoder.process(&soft, &mut vcdus);

    let mut assembler = PacketAssembler::new(SCID_METEOR_M2);
    let mut builder = ImageBuilder::new(APIDS);
    let mut out = Vec::new();
    for vcdu in &vcdus {
        assembler.process_vcdu(vcdu, &mut out);
    }
    for packet in &out {
        builder.process_packet(packet);
    }

    assert_eq!(assembler.stats().drops, 1);

    let channels = builder.finalize();
    // Both packets landed in row 0; MCUs 28.. were never sent and must
    // stay white.
    let pixels = channels[0].pixels();
    assert_eq!(pixels[3 * METEOR_IMAGE_WIDTH + 3], 90);
    assert_eq!(pixels[3 * METEOR_IMAGE_WIDTH + 14 * 8 + 3], 90);
    assert_eq!(pixels[3 * METEOR_IMAGE_WIDTH + 28 * 8 + 3], MAX_WHITE);
}

#[test]
fn modulated_qpsk_roundtrip_through_the_dsp_chain() {
    let packets = image_packets(1);
    let cadus = cadus_for(&packets);
    let mut rng = StdRng::seed_from_u64(21);

    // Warmup symbols ahead of the frames so timing and carrier settle.
    let mut bits: Vec<u8> = (0..12_000).map(|_| rng.gen_range(0..2)).collect();
    bits.extend(encode_cadus(&cadus));

    let samples = modulate_qpsk(&bits, 4, 120.0, 0.001, 1.0, &mut rng);

    let config = DemodConfig {
        psk_mode: PskMode::Qpsk,
        symbol_rate: 72_000,
        rrc_order: 16,
        rrc_alpha: 0.6,
        costas_bandwidth: 0.005,
        pll_locked_threshold: 0.8,
        interp_factor: 4,
    };
    let mut demod = Demodulator::new(&config, 288_000.0).unwrap();
    let mut soft = Vec::new();
    demod.process(&samples, &mut soft);
    assert!(demod.pll_locked(), "PLL never locked");

    let mut frame_decoder = FrameDecoder::new();
    let mut vcdus = Vec::new();
    frame_decoder.process(&soft, &mut vcdus);

    assert!(
        frame_decoder.frames_ok() >= cadus.len() as u64 - 1,
        "only {}/{} frames decoded",
        frame_decoder.frames_ok(),
        cadus.len()
    );
    assert!(!vcdus.is_empty());
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Any codeword with at most 16 byte errors decodes back to
        /// the original message.
        #[test]
        fn rs_corrects_up_to_sixteen_errors(
            seed in any::<u64>(),
            errors in 0usize..=16,
        ) {
            let rs_codec = ReedSolomon::new();
            let mut rng = StdRng::seed_from_u64(seed);
            let mut message = [0u8; rs::DATA_LEN];
            rng.fill(&mut message[..]);

            let mut codeword = message.to_vec();
            codeword.extend_from_slice(&rs_codec.encode(&message));
            let clean = codeword.clone();

            let mut positions = std::collections::HashSet::new();
            while positions.len() < errors {
                positions.insert(rng.gen_range(0..rs::BLOCK_LEN));
            }
            for &pos in &positions {
                codeword[pos] ^= rng.gen_range(1..=255u8);
            }

            let corrected = rs_codec.decode(&mut codeword).expect("correctable");
            prop_assert_eq!(corrected, errors);
            prop_assert_eq!(codeword, clean);
        }
    }
}
