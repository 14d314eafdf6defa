//! IQ recording playback source.
//!
//! Reads two-channel WAV files (integer or float, channel 0 = I,
//! channel 1 = Q) through `hound`, or raw interleaved files: unsigned
//! 8-bit (RTL-SDR convention, offset 127) and little-endian signed
//! 16-bit. Samples come out as floats centered at zero, burst by
//! burst, and the source reports exhaustion at end of file so a
//! session can finish early instead of idling out its timer.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use num_complex::Complex64;
use tracing::info;

use crate::errors::{DeviceError, Result};
use crate::source::IqSource;

/// Default burst size, samples.
const DEFAULT_MTU: usize = 32_768;

/// Scale applied to 8-bit samples, matching the RTL-SDR front end.
const U8_SCALE: f64 = 4.0;

enum Reader {
    WavFloat(Box<hound::WavIntoSamples<BufReader<File>, f32>>),
    WavInt(Box<hound::WavIntoSamples<BufReader<File>, i16>>),
    RawU8(BufReader<File>),
    RawI16(BufReader<File>),
}

/// Raw sample layouts supported alongside WAV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawFormat {
    Unsigned8,
    Signed16,
}

pub struct FileSource {
    path: PathBuf,
    reader: Option<Reader>,
    sample_rate: u32,
    mtu: usize,
    streaming: bool,
    exhausted: bool,
}

impl FileSource {
    /// Open a 2-channel WAV IQ recording; the sample rate comes from
    /// the WAV header.
    pub fn open_wav(path: &Path) -> Result<Self> {
        let reader = hound::WavReader::open(path).map_err(|err| DeviceError::OpenFailed {
            name: path.display().to_string(),
            reason: err.to_string(),
        })?;
        let spec = reader.spec();
        if spec.channels != 2 {
            return Err(DeviceError::UnsupportedFormat {
                details: format!("{} channels, need 2 (I/Q)", spec.channels),
            }
            .into());
        }
        let wav_reader = match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Float, 32) => Reader::WavFloat(Box::new(reader.into_samples())),
            (hound::SampleFormat::Int, 16) => Reader::WavInt(Box::new(reader.into_samples())),
            (format, bits) => {
                return Err(DeviceError::UnsupportedFormat {
                    details: format!("{bits}-bit {format:?} WAV, need 16-bit int or 32-bit float"),
                }
                .into());
            }
        };
        info!(
            path = %path.display(),
            sample_rate = spec.sample_rate,
            bits = spec.bits_per_sample,
            "opened WAV IQ recording"
        );

        Ok(Self {
            path: path.to_path_buf(),
            reader: Some(wav_reader),
            sample_rate: spec.sample_rate,
            mtu: DEFAULT_MTU,
            streaming: false,
            exhausted: false,
        })
    }

    /// Open a raw interleaved IQ recording at a known sample rate.
    pub fn open_raw(path: &Path, format: RawFormat, sample_rate: u32) -> Result<Self> {
        let file = File::open(path).map_err(|err| DeviceError::OpenFailed {
            name: path.display().to_string(),
            reason: err.to_string(),
        })?;
        let reader = BufReader::new(file);
        info!(path = %path.display(), ?format, sample_rate, "opened raw IQ recording");

        Ok(Self {
            path: path.to_path_buf(),
            reader: Some(match format {
                RawFormat::Unsigned8 => Reader::RawU8(reader),
                RawFormat::Signed16 => Reader::RawI16(reader),
            }),
            sample_rate,
            mtu: DEFAULT_MTU,
            streaming: false,
            exhausted: false,
        })
    }

    /// Pick the reader from the file extension: `.wav` or raw `.s`/
    /// `.raw`/`.iq` (8-bit unsigned by default).
    pub fn open(path: &Path, sample_rate: u32) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("wav") => Self::open_wav(path),
            _ => Self::open_raw(path, RawFormat::Unsigned8, sample_rate),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_wav_float(
        samples: &mut hound::WavIntoSamples<BufReader<File>, f32>,
        burst: &mut Vec<Complex64>,
        mtu: usize,
    ) -> usize {
        while burst.len() < mtu {
            let i = match samples.next() {
                Some(Ok(v)) => v as f64,
                _ => break,
            };
            let q = match samples.next() {
                Some(Ok(v)) => v as f64,
                _ => break,
            };
            // Match the scale of the 8-bit path so the AGC sees
            // comparable levels whatever the recording format.
            burst.push(Complex64::new(i, q) * 512.0);
        }
        burst.len()
    }

    fn read_wav_int(
        samples: &mut hound::WavIntoSamples<BufReader<File>, i16>,
        burst: &mut Vec<Complex64>,
        mtu: usize,
    ) -> usize {
        while burst.len() < mtu {
            let i = match samples.next() {
                Some(Ok(v)) => v as f64,
                _ => break,
            };
            let q = match samples.next() {
                Some(Ok(v)) => v as f64,
                _ => break,
            };
            burst.push(Complex64::new(i, q) / 64.0);
        }
        burst.len()
    }

    fn read_raw_u8(reader: &mut BufReader<File>, burst: &mut Vec<Complex64>, mtu: usize) -> usize {
        let mut chunk = vec![0u8; mtu * 2];
        let mut filled = 0usize;
        while filled < chunk.len() {
            match reader.read(&mut chunk[filled..]) {
                Ok(0) | Err(_) => break,
                Ok(n) => filled += n,
            }
        }
        for pair in chunk[..filled - filled % 2].chunks_exact(2) {
            burst.push(Complex64::new(
                (pair[0] as f64 - 127.0) * U8_SCALE,
                (pair[1] as f64 - 127.0) * U8_SCALE,
            ));
        }
        burst.len()
    }

    fn read_raw_i16(reader: &mut BufReader<File>, burst: &mut Vec<Complex64>, mtu: usize) -> usize {
        let mut chunk = vec![0u8; mtu * 4];
        let mut filled = 0usize;
        while filled < chunk.len() {
            match reader.read(&mut chunk[filled..]) {
                Ok(0) | Err(_) => break,
                Ok(n) => filled += n,
            }
        }
        for quad in chunk[..filled - filled % 4].chunks_exact(4) {
            let i = i16::from_le_bytes([quad[0], quad[1]]) as f64;
            let q = i16::from_le_bytes([quad[2], quad[3]]) as f64;
            burst.push(Complex64::new(i, q) / 64.0);
        }
        burst.len()
    }
}

impl IqSource for FileSource {
    fn start(&mut self) -> Result<()> {
        self.streaming = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.streaming = false;
    }

    fn set_frequency(&mut self, _hz: u32) -> Result<()> {
        // Recordings are already at their center frequency.
        Ok(())
    }

    fn set_gain(&mut self, _percent: u32) -> Result<()> {
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn read_burst(&mut self, burst: &mut Vec<Complex64>) -> Result<usize> {
        burst.clear();
        if !self.streaming || self.exhausted {
            return Ok(0);
        }
        let mtu = self.mtu;
        let got = match self.reader.as_mut() {
            Some(Reader::WavFloat(samples)) => Self::read_wav_float(samples, burst, mtu),
            Some(Reader::WavInt(samples)) => Self::read_wav_int(samples, burst, mtu),
            Some(Reader::RawU8(reader)) => Self::read_raw_u8(reader, burst, mtu),
            Some(Reader::RawI16(reader)) => Self::read_raw_i16(reader, burst, mtu),
            None => 0,
        };
        if got == 0 {
            self.exhausted = true;
        }
        Ok(got)
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn is_realtime(&self) -> bool {
        false
    }
}
