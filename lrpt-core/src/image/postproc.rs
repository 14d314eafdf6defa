//! Image post-processing, applied once after the decode session ends.
//! Fixed order: Normalize -> CLAHE -> Rectify -> Flip -> Pseudocolor.

use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::{ImageConfig, RectifyMode, CHANNEL_IMAGE_NUM};
use crate::image::channel::ChannelImage;
use crate::image::jpeg::MAX_WHITE;

/// Percent of pixels trimmed at each end of the histogram.
const BLACK_CUT_OFF: usize = 1;
const WHITE_CUT_OFF: usize = 1;

/// Intensities below this are ignored when hunting the black cutoff,
/// masking the black stripe artifacts the satellite sometimes sends.
const MIN_BLACK: usize = 2;

/// CLAHE region grid and histogram resolution.
const CLAHE_GRID: usize = 8;
const CLAHE_BINS: usize = 128;

/// MSU-MR cross-track scan half-angle, degrees.
const MAX_SCAN_ANGLE_DEG: f64 = 54.37;
const SAT_ALTITUDE_KM: f64 = 820.0;
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Linear histogram normalization into [range_low, range_high].
/// Returns false when the image was skipped (empty or flat).
pub fn normalize(image: &mut [u8], range_low: u8, range_high: u8) -> bool {
    if image.is_empty() {
        warn!("image buffer empty, normalization not performed");
        return false;
    }

    let mut hist = [0usize; 256];
    for &pixel in image.iter() {
        hist[pixel as usize] += 1;
    }

    let black_cutoff = image.len() * BLACK_CUT_OFF / 100;
    let white_cutoff = image.len() * WHITE_CUT_OFF / 100;

    let mut count = 0usize;
    let mut black_min_in = MIN_BLACK;
    while black_min_in < MAX_WHITE as usize {
        count += hist[black_min_in];
        if count >= black_cutoff {
            break;
        }
        black_min_in += 1;
    }

    let mut count = 0usize;
    let mut white_max_in = MAX_WHITE as usize;
    while white_max_in > 0 {
        count += hist[white_max_in];
        if count >= white_cutoff {
            break;
        }
        white_max_in -= 1;
    }

    if white_max_in <= black_min_in {
        warn!("image buffer flat, normalization not performed");
        return false;
    }

    info!(black_min_in, white_max_in, "performing histogram normalization");
    let range_in = (white_max_in - black_min_in) as u32;
    let range_out = (range_high - range_low) as u32;
    for pixel in image.iter_mut() {
        let clamped = (*pixel as usize).clamp(black_min_in, white_max_in) - black_min_in;
        *pixel = range_low + ((clamped as u32 * range_out) / range_in) as u8;
    }
    true
}

/// Contrast Limited Adaptive Histogram Equalization over an 8x8 region
/// grid with bilinear blending across region boundaries.
pub fn clahe(image: &mut [u8], width: usize, height: usize, clip_limit: f64) {
    if width == 0 || height < CLAHE_GRID || width < CLAHE_GRID {
        return;
    }
    debug_assert_eq!(image.len(), width * height);

    let region_w = width.div_ceil(CLAHE_GRID);
    let region_h = height.div_ceil(CLAHE_GRID);

    // Per-region remap tables.
    let mut luts = vec![[0u8; CLAHE_BINS]; CLAHE_GRID * CLAHE_GRID];
    for gy in 0..CLAHE_GRID {
        for gx in 0..CLAHE_GRID {
            let x0 = gx * region_w;
            let y0 = gy * region_h;
            let x1 = (x0 + region_w).min(width);
            let y1 = (y0 + region_h).min(height);

            let mut hist = [0usize; CLAHE_BINS];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[(image[y * width + x] as usize) * CLAHE_BINS / 256] += 1;
                }
            }

            let pixels = (x1 - x0) * (y1 - y0);
            if pixels == 0 {
                continue;
            }

            // Clip and redistribute the excess uniformly.
            let clip = ((clip_limit * pixels as f64 / CLAHE_BINS as f64) as usize).max(1);
            let mut excess = 0usize;
            for bin in hist.iter_mut() {
                if *bin > clip {
                    excess += *bin - clip;
                    *bin = clip;
                }
            }
            let bonus = excess / CLAHE_BINS;
            for bin in hist.iter_mut() {
                *bin += bonus;
            }

            let lut = &mut luts[gy * CLAHE_GRID + gx];
            let mut cdf = 0usize;
            for (bin, slot) in hist.iter().zip(lut.iter_mut()) {
                cdf += bin;
                *slot = ((cdf * MAX_WHITE as usize) / pixels) as u8;
            }
        }
    }

    // Region-center coordinates for the bilinear blend.
    let grid_pos = |coord: usize, region: usize| -> (usize, usize, f64) {
        let f = (coord as f64 - region as f64 / 2.0) / region as f64;
        if f < 0.0 {
            return (0, 0, 0.0);
        }
        let g0 = (f.floor() as usize).min(CLAHE_GRID - 1);
        let g1 = (g0 + 1).min(CLAHE_GRID - 1);
        (g0, g1, f - f.floor())
    };

    // Bilinear interpolation between the four surrounding region maps.
    let source = image.to_vec();
    image
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, out_row)| {
            let (gy0, gy1, wy) = grid_pos(y, region_h);
            let src_row = &source[y * width..(y + 1) * width];
            for (x, pixel) in out_row.iter_mut().enumerate() {
                let (gx0, gx1, wx) = grid_pos(x, region_w);
                let bin = (src_row[x] as usize) * CLAHE_BINS / 256;
                let tl = luts[gy0 * CLAHE_GRID + gx0][bin] as f64;
                let tr = luts[gy0 * CLAHE_GRID + gx1][bin] as f64;
                let bl = luts[gy1 * CLAHE_GRID + gx0][bin] as f64;
                let br = luts[gy1 * CLAHE_GRID + gx1][bin] as f64;
                let top = tl * (1.0 - wx) + tr * wx;
                let bottom = bl * (1.0 - wx) + br * wx;
                *pixel = (top * (1.0 - wy) + bottom * wy).round() as u8;
            }
        });
}

/// Per-output-column source column for the selected correction.
pub fn rectify_map(mode: RectifyMode, width: usize) -> Option<Vec<usize>> {
    let theta_max = MAX_SCAN_ANGLE_DEG.to_radians();
    let source_u = |u: f64| -> f64 {
        match mode {
            RectifyMode::None => u,
            // Flat-earth tangent law: equal ground steps back to equal
            // scan-angle steps.
            RectifyMode::W2rg => (u * theta_max.tan()).atan() / theta_max,
            // Spherical-earth chord law.
            RectifyMode::Az5b4 => {
                let ratio = (EARTH_RADIUS_KM + SAT_ALTITUDE_KM) / EARTH_RADIUS_KM;
                let phi_max = (ratio * theta_max.sin()).asin() - theta_max;
                let phi = u * phi_max;
                (phi.sin() / (ratio - phi.cos())).atan() / theta_max
            }
        }
    };

    if mode == RectifyMode::None {
        return None;
    }

    let half = width as f64 / 2.0;
    let map = (0..width)
        .map(|x| {
            let u = (x as f64 + 0.5 - half) / half;
            let src = half + source_u(u) * half - 0.5;
            (src.round().max(0.0) as usize).min(width - 1)
        })
        .collect();
    Some(map)
}

/// Resample every row through the column map, nearest neighbour.
pub fn rectify(image: &mut [u8], width: usize, map: &[usize]) {
    debug_assert_eq!(map.len(), width);
    let mut row_buf = vec![0u8; width];
    for row in image.chunks_exact_mut(width) {
        row_buf.copy_from_slice(row);
        for (x, pixel) in row.iter_mut().enumerate() {
            *pixel = row_buf[map[x]];
        }
    }
}

/// Rotate the image 180 degrees in place.
pub fn flip(image: &mut [u8]) {
    image.reverse();
}

/// Run the per-channel pipeline (normalize, CLAHE, rectify, flip) over
/// all three channels in parallel.
pub fn postprocess_channels(channels: &mut [ChannelImage; CHANNEL_IMAGE_NUM], config: &ImageConfig) {
    let map = rectify_map(config.rectify, crate::image::jpeg::METEOR_IMAGE_WIDTH);

    channels
        .par_iter_mut()
        .enumerate()
        .for_each(|(index, channel)| {
            if channel.is_empty() {
                return;
            }
            let width = channel.width();
            let height = channel.height();

            if config.normalize {
                let range = config.norm_range[index];
                normalize(channel.pixels_mut(), range[0], range[1]);
            }
            if config.clahe {
                clahe(channel.pixels_mut(), width, height, config.clahe_clip_limit);
            }
            if let Some(map) = map.as_ref() {
                rectify(channel.pixels_mut(), width, map);
            }
            if config.invert {
                flip(channel.pixels_mut());
            }
        });
}

/// Combine the three channels into an RGB composite. With colorize on,
/// dark blue areas are lifted (water) and bright blue pixels render as
/// white cloud; either way each channel is rescaled into its
/// configured normalization range.
pub fn combo_image(
    channels: &mut [ChannelImage; CHANNEL_IMAGE_NUM],
    config: &ImageConfig,
) -> Vec<u8> {
    let size = channels[0].pixels().len();
    debug_assert!(channels.iter().all(|c| c.pixels().len() == size));

    let ranges: Vec<(u32, u32)> = config
        .norm_range
        .iter()
        .map(|r| (r[0] as u32, (r[1] - r[0]) as u32))
        .collect();

    let mut combo = Vec::with_capacity(size * 3);

    if config.colorize {
        let blue_min = config.colorize_blue_min as u32;
        let blue_range = config
            .colorize_blue_max
            .saturating_sub(config.colorize_blue_min) as u32;
        let blue_max = config.colorize_blue_max.max(1) as u32;

        // Lift the dark watery areas of the blue channel first.
        for pixel in channels[2].pixels_mut().iter_mut() {
            if (*pixel as u32) < blue_min {
                *pixel = (blue_min + (*pixel as u32) * blue_range / blue_max) as u8;
            }
        }

        for index in 0..size {
            let red = channels[0].pixels()[index] as u32;
            let green = channels[1].pixels()[index] as u32;
            let blue = channels[2].pixels()[index] as u32;

            if blue > config.clouds_threshold as u32 {
                let b = blue as u8;
                combo.extend_from_slice(&[b, b, b]);
            } else {
                combo.push((ranges[0].0 + red * ranges[0].1 / MAX_WHITE as u32) as u8);
                combo.push((ranges[1].0 + green * ranges[1].1 / MAX_WHITE as u32) as u8);
                combo.push((ranges[2].0 + blue * ranges[2].1 / MAX_WHITE as u32) as u8);
            }
        }
    } else {
        for index in 0..size {
            for channel in 0..CHANNEL_IMAGE_NUM {
                let value = channels[channel].pixels()[index] as u32;
                combo.push((ranges[channel].0 + value * ranges[channel].1 / MAX_WHITE as u32) as u8);
            }
        }
    }

    combo
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 255 / (len - 1)) as u8).collect()
    }

    #[test]
    fn normalize_stretches_into_range() {
        // Mid-range image stretched toward the full range.
        let mut image: Vec<u8> = (0..10_000).map(|i| 80 + (i % 64) as u8).collect();
        assert!(normalize(&mut image, 0, 255));
        let min = *image.iter().min().unwrap();
        let max = *image.iter().max().unwrap();
        assert!(min < 16, "min {min} not stretched down");
        assert!(max > 240, "max {max} not stretched up");
    }

    #[test]
    fn normalize_skips_flat_image() {
        let mut image = vec![128u8; 1000];
        assert!(!normalize(&mut image, 0, 255));
        assert!(image.iter().all(|&p| p == 128));
    }

    #[test]
    fn normalize_skips_empty_image() {
        let mut image: Vec<u8> = Vec::new();
        assert!(!normalize(&mut image, 0, 255));
    }

    #[test]
    fn normalize_is_nearly_idempotent_in_range() {
        let mut image = gradient(20_000);
        normalize(&mut image, 0, 255);
        let once = image.clone();
        normalize(&mut image, 0, 255);
        let max_delta = image
            .iter()
            .zip(once.iter())
            .map(|(a, b)| (*a as i32 - *b as i32).unsigned_abs())
            .max()
            .unwrap();
        assert!(max_delta <= 8, "second pass moved pixels by {max_delta}");
    }

    #[test]
    fn flip_is_its_own_inverse() {
        let original = gradient(4096);
        let mut image = original.clone();
        flip(&mut image);
        assert_ne!(image, original);
        flip(&mut image);
        assert_eq!(image, original);
    }

    #[test]
    fn clahe_preserves_buffer_size_and_raises_contrast() {
        let width = 256;
        let height = 128;
        // Low-contrast vertical bands.
        let mut image: Vec<u8> = (0..width * height)
            .map(|i| 100 + ((i % width) / 32) as u8)
            .collect();
        let before_spread = {
            let min = *image.iter().min().unwrap() as i32;
            let max = *image.iter().max().unwrap() as i32;
            max - min
        };
        clahe(&mut image, width, height, 4.0);
        assert_eq!(image.len(), width * height);
        let min = *image.iter().min().unwrap() as i32;
        let max = *image.iter().max().unwrap() as i32;
        assert!(max - min > before_spread);
    }

    #[test]
    fn rectify_map_preserves_width_and_center() {
        for mode in [RectifyMode::W2rg, RectifyMode::Az5b4] {
            let map = rectify_map(mode, 1568).unwrap();
            assert_eq!(map.len(), 1568);
            // Monotonic, within bounds, and symmetric about center.
            assert!(map.windows(2).all(|w| w[0] <= w[1]));
            assert!(*map.last().unwrap() < 1568);
            let center_src = map[784];
            assert!((center_src as i64 - 784).abs() <= 2);
        }
        assert!(rectify_map(RectifyMode::None, 1568).is_none());
    }

    #[test]
    fn rectify_edges_compress_toward_margins() {
        // The scan compresses ground at the edges, so the edge of the
        // rectified output must sample close to the source edge.
        let map = rectify_map(RectifyMode::W2rg, 1568).unwrap();
        assert!(map[0] < 40);
        assert!(map[1567] > 1528);
    }

    #[test]
    fn combo_white_clouds_above_threshold() {
        let mut channels = [
            ChannelImage::new(64),
            ChannelImage::new(65),
            ChannelImage::new(66),
        ];
        for channel in &mut channels {
            channel.ensure_mcu_rows(1);
        }
        // First pixel: bright blue (cloud); second: dark scene pixel.
        channels[0].pixels_mut()[0] = 10;
        channels[1].pixels_mut()[0] = 20;
        channels[2].pixels_mut()[0] = 250;
        channels[0].pixels_mut()[1] = 100;
        channels[1].pixels_mut()[1] = 110;
        channels[2].pixels_mut()[1] = 120;

        let config = ImageConfig {
            colorize: true,
            clouds_threshold: 210,
            norm_range: [[0, 255], [0, 255], [0, 255]],
            ..Default::default()
        };
        let combo = combo_image(&mut channels, &config);
        assert_eq!(&combo[0..3], &[250, 250, 250]);
        assert_eq!(&combo[3..6], &[100, 110, 120]);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn flip_twice_restores_any_image(pixels in proptest::collection::vec(any::<u8>(), 64..4096)) {
                let mut flipped = pixels.clone();
                flip(&mut flipped);
                flip(&mut flipped);
                prop_assert_eq!(flipped, pixels);
            }

            #[test]
            fn normalize_output_stays_in_target_range(
                pixels in proptest::collection::vec(any::<u8>(), 2048..8192),
                low in 0u8..64,
                high in 192u8..=255,
            ) {
                let mut image = pixels;
                if normalize(&mut image, low, high) {
                    prop_assert!(image.iter().all(|&p| p >= low && p <= high));
                }
            }

            #[test]
            fn rectify_map_is_always_in_bounds(width in 64usize..4096) {
                for mode in [RectifyMode::W2rg, RectifyMode::Az5b4] {
                    let map = rectify_map(mode, width).unwrap();
                    prop_assert_eq!(map.len(), width);
                    prop_assert!(map.iter().all(|&src| src < width));
                }
            }
        }
    }

    #[test]
    fn combo_lifts_dark_water_pixels() {
        let mut channels = [
            ChannelImage::new(64),
            ChannelImage::new(65),
            ChannelImage::new(66),
        ];
        for channel in &mut channels {
            channel.ensure_mcu_rows(1);
        }
        channels[2].pixels_mut()[0] = 10; // well below colorize_blue_min

        let config = ImageConfig {
            colorize: true,
            colorize_blue_min: 60,
            colorize_blue_max: 80,
            norm_range: [[0, 255], [0, 255], [0, 255]],
            ..Default::default()
        };
        let combo = combo_image(&mut channels, &config);
        // 60 + 10 * 20 / 80 = 62
        assert_eq!(combo[2], 62);
    }
}
