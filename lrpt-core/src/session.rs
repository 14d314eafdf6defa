//! A receive-and-decode session.
//!
//! Three cooperating threads plus the caller's: the producer owns the
//! IQ source and hands bursts through a capacity-1 channel (dropping a
//! burst when the consumer is behind, which bounds memory exactly like
//! a double buffer), the DSP thread runs decimation, roofing filter
//! and demodulation, and the decoder chain runs on the calling thread.
//! A timer task and the caller's signal handler share one cancellation
//! token; every stage polls it at its blocking point. All threads are
//! joined before single-threaded post-processing and file output.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use atomic_float::AtomicF64;
use crossbeam::channel::{bounded, RecvTimeoutError, TrySendError};
use num_complex::Complex64;
use tracing::{debug, error, info, warn};

use crate::config::{Config, PskMode};
use crate::decode::framing::{FrameDecoder, VCDU_LEN};
use crate::decode::packet::{PacketAssembler, SourcePacket, SCID_METEOR_M2};
use crate::dsp::chebyshev::{Chebyshev, FILTER_POLES, FILTER_RIPPLE};
use crate::dsp::demodulator::Demodulator;
use crate::dsp::doqpsk::{self, DeDiffcoder, INTER_BASE_LEN};
use crate::errors::Result;
use crate::image::channel::ImageBuilder;
use crate::image::postproc;
use crate::image::{output, ChannelImage};
use crate::source::{decimate_burst, pick_decimation, IqSource};

/// Soft symbols accumulated before an offset-mode block is resynced
/// and de-interleaved.
const OQPSK_BLOCK: usize = 3 * INTER_BASE_LEN;

/// Cooperative cancellation token shared by all session threads.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Live gauges shared with the status reporter.
#[derive(Default)]
pub struct SessionStatus {
    pub pll_locked: AtomicBool,
    pub pll_average: AtomicF64,
    pub signal_level: AtomicF64,
    pub agc_gain: AtomicF64,
    pub signal_quality: AtomicF64,
    pub frames_ok: AtomicU64,
    pub frames_total: AtomicU64,
    pub packets: AtomicU64,
}

/// Where and under what name output files land.
#[derive(Debug, Clone)]
pub struct OutputSpec {
    pub directory: PathBuf,
    /// Filename stem, typically the UTC timestamp `DDmonYYYY-HHMM`.
    pub stem: String,
}

impl OutputSpec {
    pub fn channel_path(&self, apid: u16, suffix: &str, ext: &str) -> PathBuf {
        self.directory
            .join(format!("{}-Ch{}{}.{}", self.stem, apid, suffix, ext))
    }

    pub fn combo_path(&self, ext: &str) -> PathBuf {
        self.directory.join(format!("{}-Combo.{}", self.stem, ext))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionSummary {
    pub frames_ok: u64,
    pub frames_total: u64,
    pub signal_quality: f64,
    pub packets: u64,
    pub packet_drops: u64,
    pub files: Vec<PathBuf>,
}

pub struct Session {
    config: Config,
    status: Arc<SessionStatus>,
    cancel: CancelToken,
}

impl Session {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            status: Arc::new(SessionStatus::default()),
            cancel: CancelToken::new(),
        })
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn status(&self) -> Arc<SessionStatus> {
        Arc::clone(&self.status)
    }

    /// Run the session to completion: stream, demodulate and decode
    /// until the timer fires, the token is cancelled or the source is
    /// exhausted; then post-process and write the images.
    pub fn run(
        &mut self,
        mut source: Box<dyn IqSource>,
        output_spec: &OutputSpec,
    ) -> Result<SessionSummary> {
        let sample_rate = source.sample_rate();
        let symbol_rate = self.config.demod.symbol_rate;
        let decimation = pick_decimation(sample_rate, symbol_rate);
        let effective_rate = sample_rate as f64 / decimation as f64;
        let cutoff =
            (self.config.sdr.filter_bandwidth_hz as f64 / 2.0 / effective_rate).min(0.45);

        info!(
            sample_rate,
            decimation, effective_rate, "starting receive session"
        );

        let mut chebyshev_i = Chebyshev::lowpass(cutoff, FILTER_RIPPLE, FILTER_POLES)?;
        let mut chebyshev_q = Chebyshev::lowpass(cutoff, FILTER_RIPPLE, FILTER_POLES)?;
        let mut demodulator = Demodulator::new(&self.config.demod, effective_rate)?;

        source.start()?;

        let (burst_tx, burst_rx) = bounded::<Vec<Complex64>>(1);
        let (recycle_tx, recycle_rx) = bounded::<Vec<Complex64>>(2);
        let (soft_tx, soft_rx) = bounded::<Vec<i8>>(8);

        let cancel = self.cancel.clone();
        let status = Arc::clone(&self.status);
        let operation_time = Duration::from_secs(self.config.decoder.operation_time_secs as u64);

        let mut decoded = DecoderState::new(&self.config);

        std::thread::scope(|scope| {
            // Timer task: sets the shared token when the operation
            // window closes.
            let timer_cancel = cancel.clone();
            scope.spawn(move || {
                let deadline = Instant::now() + operation_time;
                while !timer_cancel.is_cancelled() {
                    if Instant::now() >= deadline {
                        info!("operation timer expired");
                        timer_cancel.cancel();
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            });

            // Producer: single writer of the IQ burst pair.
            let producer_cancel = cancel.clone();
            scope.spawn(move || {
                let realtime = source.is_realtime();
                let mut spare: Option<Vec<Complex64>> = None;
                loop {
                    if producer_cancel.is_cancelled() {
                        break;
                    }
                    let mut burst = spare
                        .take()
                        .or_else(|| recycle_rx.try_recv().ok())
                        .unwrap_or_default();
                    match source.read_burst(&mut burst) {
                        Ok(0) => {
                            if source.is_exhausted() {
                                info!("IQ source exhausted");
                                producer_cancel.cancel();
                                break;
                            }
                            spare = Some(burst);
                            std::thread::sleep(Duration::from_millis(1));
                        }
                        Ok(_) if realtime => match burst_tx.try_send(burst) {
                            Ok(()) => {}
                            // Consumer is behind: skip this burst.
                            Err(TrySendError::Full(burst)) => spare = Some(burst),
                            Err(TrySendError::Disconnected(_)) => break,
                        },
                        // Recordings pace themselves to the consumer.
                        Ok(_) => {
                            if burst_tx.send(burst).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            error!(%err, "IQ stream failed, stopping session");
                            producer_cancel.cancel();
                            break;
                        }
                    }
                }
                source.stop();
            });

            // DSP thread: decimate, roofing filter, demodulate.
            let dsp_cancel = cancel.clone();
            scope.spawn(move || {
                loop {
                    match burst_rx.recv_timeout(Duration::from_millis(100)) {
                        Ok(burst) => {
                            let decimated = decimate_burst(&burst, decimation);
                            let _ = recycle_tx.try_send(burst);

                            let filtered: Vec<Complex64> = decimated
                                .iter()
                                .map(|s| {
                                    Complex64::new(
                                        chebyshev_i.process(s.re),
                                        chebyshev_q.process(s.im),
                                    )
                                })
                                .collect();

                            let mut soft = Vec::new();
                            demodulator.process(&filtered, &mut soft);

                            status
                                .pll_locked
                                .store(demodulator.pll_locked(), Ordering::Relaxed);
                            status
                                .pll_average
                                .store(demodulator.pll_average(), Ordering::Relaxed);
                            status
                                .signal_level
                                .store(demodulator.signal_level(), Ordering::Relaxed);
                            status
                                .agc_gain
                                .store(demodulator.agc_gain(), Ordering::Relaxed);

                            if !soft.is_empty() && soft_tx.send(soft).is_err() {
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            if dsp_cancel.is_cancelled() {
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            });

            // Decoder chain on this thread. Cancellation propagates as
            // channel disconnects: the producer and DSP threads exit on
            // the token, their senders drop, and the decoder drains
            // whatever is already queued before finishing.
            loop {
                match soft_rx.recv_timeout(Duration::from_millis(100)) {
                    Ok(chunk) => decoded.feed(&chunk, &self.status),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            drop(soft_rx);
            self.cancel.cancel();
        });

        decoded.finish(&self.status);
        self.finalize(decoded, output_spec)
    }

    /// Post-process the channel images and write the configured files.
    fn finalize(
        &self,
        decoded: DecoderState,
        output_spec: &OutputSpec,
    ) -> Result<SessionSummary> {
        let image_config = &self.config.image;
        let frames_ok = decoded.frame_decoder.frames_ok();
        let frames_total = decoded.frame_decoder.frames_total();
        let signal_quality = decoded.frame_decoder.signal_quality();
        let assembler_stats = decoded.assembler.stats();

        let rows = decoded.builder.channel_rows();
        let mut channels = decoded.builder.finalize();

        let mut summary = SessionSummary {
            frames_ok,
            frames_total,
            signal_quality,
            packets: assembler_stats.packets,
            packet_drops: assembler_stats.drops,
            files: Vec::new(),
        };

        if rows.iter().all(|&r| r == 0) {
            info!("no image rows decoded, no output files written");
            return Ok(summary);
        }

        if image_config.save_raw && image_config.output_mode.split() {
            for (channel, &row_count) in channels.iter().zip(rows.iter()) {
                if row_count > 0 {
                    self.write_channel(channel, "-raw", output_spec, &mut summary.files);
                }
            }
        }

        postproc::postprocess_channels(&mut channels, image_config);

        if image_config.output_mode.split() {
            for (channel, &row_count) in channels.iter().zip(rows.iter()) {
                if row_count > 0 {
                    self.write_channel(channel, "", output_spec, &mut summary.files);
                }
            }
        }

        if image_config.output_mode.combo() {
            let combo = postproc::combo_image(&mut channels, image_config);
            let width = channels[0].width();
            let height = channels[0].height();

            if image_config.save_format.raw_pnm() {
                let path = output_spec.combo_path("ppm");
                match output::save_ppm(&path, width, height, &combo) {
                    Ok(()) => summary.files.push(path),
                    Err(err) => warn!(%err, "combo PPM write failed"),
                }
            }
            if image_config.save_format.jpeg() {
                let path = output_spec.combo_path("jpg");
                match output::save_jpeg_rgb(&path, width, height, &combo, image_config.jpeg_quality)
                {
                    Ok(()) => summary.files.push(path),
                    Err(err) => warn!(%err, "combo JPEG write failed"),
                }
            }
        }

        info!(
            frames_ok,
            frames_total,
            signal_quality,
            files = summary.files.len(),
            "session finished"
        );
        Ok(summary)
    }

    fn write_channel(
        &self,
        channel: &ChannelImage,
        suffix: &str,
        output_spec: &OutputSpec,
        files: &mut Vec<PathBuf>,
    ) {
        let image_config = &self.config.image;
        let width = channel.width();
        let height = channel.height();

        if image_config.save_format.raw_pnm() {
            let path = output_spec.channel_path(channel.apid, suffix, "pgm");
            match output::save_pgm(&path, width, height, channel.pixels()) {
                Ok(()) => files.push(path),
                Err(err) => warn!(%err, apid = channel.apid, "channel PGM write failed"),
            }
        }
        if image_config.save_format.jpeg() {
            let path = output_spec.channel_path(channel.apid, suffix, "jpg");
            match output::save_jpeg_gray(
                &path,
                width,
                height,
                channel.pixels(),
                image_config.jpeg_quality,
            ) {
                Ok(()) => files.push(path),
                Err(err) => warn!(%err, apid = channel.apid, "channel JPEG write failed"),
            }
        }
    }
}

/// The decode chain and its stream buffers.
struct DecoderState {
    mode: PskMode,
    frame_decoder: FrameDecoder,
    assembler: PacketAssembler,
    builder: ImageBuilder,
    dediff: DeDiffcoder,
    /// Canonical-orientation soft stream feeding the correlator.
    stream: Vec<i8>,
    /// Raw demodulated symbols awaiting resync (offset modes).
    raw: Vec<i8>,
    vcdus: Vec<[u8; VCDU_LEN]>,
    packets: Vec<SourcePacket>,
}

impl DecoderState {
    fn new(config: &Config) -> Self {
        Self {
            mode: config.demod.psk_mode,
            frame_decoder: FrameDecoder::new(),
            assembler: PacketAssembler::new(SCID_METEOR_M2),
            builder: ImageBuilder::new(config.decoder.apids),
            dediff: DeDiffcoder::new(),
            stream: Vec::new(),
            raw: Vec::new(),
            vcdus: Vec::new(),
            packets: Vec::new(),
        }
    }

    fn feed(&mut self, chunk: &[i8], status: &SessionStatus) {
        match self.mode {
            PskMode::Qpsk => self.stream.extend_from_slice(chunk),
            PskMode::Doqpsk => {
                self.raw.extend_from_slice(chunk);
                if self.raw.len() >= OQPSK_BLOCK {
                    self.repair_offset_block();
                }
            }
            // IDOQPSK accumulates until the session is stopped.
            PskMode::Idoqpsk => {
                self.raw.extend_from_slice(chunk);
                return;
            }
        }
        self.decode_pass(status);
    }

    /// Resync, de-interleave and de-differentially decode whatever raw
    /// symbols have accumulated.
    fn repair_offset_block(&mut self) {
        let raw = std::mem::take(&mut self.raw);
        match doqpsk::resync_and_deinterleave(&raw) {
            Ok(mut repaired) => {
                self.dediff.process(&mut repaired);
                self.stream.extend_from_slice(&repaired);
            }
            Err(err) => debug!(%err, symbols = raw.len(), "offset-mode resync failed"),
        }
    }

    fn decode_pass(&mut self, status: &SessionStatus) {
        let consumed = self.frame_decoder.process(&self.stream, &mut self.vcdus);
        if consumed > 0 {
            self.stream.drain(..consumed);
        }

        for vcdu in self.vcdus.drain(..) {
            self.assembler.process_vcdu(&vcdu, &mut self.packets);
        }
        for packet in self.packets.drain(..) {
            self.builder.process_packet(&packet);
        }

        status
            .frames_ok
            .store(self.frame_decoder.frames_ok(), Ordering::Relaxed);
        status
            .frames_total
            .store(self.frame_decoder.frames_total(), Ordering::Relaxed);
        status
            .signal_quality
            .store(self.frame_decoder.signal_quality(), Ordering::Relaxed);
        status
            .packets
            .store(self.assembler.stats().packets, Ordering::Relaxed);
    }

    /// Drain everything still buffered once streaming has stopped.
    fn finish(&mut self, status: &SessionStatus) {
        if self.mode.is_offset() && !self.raw.is_empty() {
            self.repair_offset_block();
        }
        self.decode_pass(status);
    }
}
