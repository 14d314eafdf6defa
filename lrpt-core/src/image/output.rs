//! Image file writers: raw PGM/PPM with the classic header layout, and
//! JPEG through the `image` crate. Write failures are reported, never
//! fatal; the caller logs and moves on to the remaining outputs.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::errors::{ImageError, Result};
use crate::image::jpeg::MAX_WHITE;

fn write_pnm(
    path: &Path,
    magic: &str,
    width: usize,
    height: usize,
    pixels: &[u8],
) -> Result<()> {
    let file = File::create(path).map_err(|err| ImageError::WriteFailed {
        path: path.display().to_string(),
        reason: err.to_string(),
    })?;
    let mut writer = BufWriter::new(file);

    let io_result = write!(
        writer,
        "{magic}\n# Created by lrpt\n{width} {height}\n{MAX_WHITE}\n"
    )
    .and_then(|_| writer.write_all(pixels))
    .and_then(|_| writer.flush());

    io_result.map_err(|err| {
        ImageError::WriteFailed {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
        .into()
    })
}

/// Write an 8-bit grayscale image as binary PGM (magic "P5").
pub fn save_pgm(path: &Path, width: usize, height: usize, pixels: &[u8]) -> Result<()> {
    debug_assert_eq!(pixels.len(), width * height);
    write_pnm(path, "P5", width, height, pixels)
}

/// Write an RGB image as binary PPM (magic "P6").
pub fn save_ppm(path: &Path, width: usize, height: usize, pixels: &[u8]) -> Result<()> {
    debug_assert_eq!(pixels.len(), 3 * width * height);
    write_pnm(path, "P6", width, height, pixels)
}

fn save_jpeg(
    path: &Path,
    width: usize,
    height: usize,
    pixels: &[u8],
    color: ExtendedColorType,
    quality: u8,
) -> Result<()> {
    let file = File::create(path).map_err(|err| ImageError::WriteFailed {
        path: path.display().to_string(),
        reason: err.to_string(),
    })?;
    let writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(writer, quality.clamp(1, 100))
        .encode(pixels, width as u32, height as u32, color)
        .map_err(|err| {
            ImageError::WriteFailed {
                path: path.display().to_string(),
                reason: err.to_string(),
            }
            .into()
        })
}

/// Write an 8-bit grayscale image as JPEG.
pub fn save_jpeg_gray(
    path: &Path,
    width: usize,
    height: usize,
    pixels: &[u8],
    quality: u8,
) -> Result<()> {
    save_jpeg(path, width, height, pixels, ExtendedColorType::L8, quality)
}

/// Write an RGB image as JPEG.
pub fn save_jpeg_rgb(
    path: &Path,
    width: usize,
    height: usize,
    pixels: &[u8],
    quality: u8,
) -> Result<()> {
    save_jpeg(path, width, height, pixels, ExtendedColorType::Rgb8, quality)
}
