//! Capture pipeline: microphone blocks → fixed-size frames → wire chunks.
//!
//! The microphone delivers blocks at its native rate and channel count.
//! The pipeline downmixes to mono, resamples to 16kHz, cuts exact
//! 4096-sample frames and encodes each one as a base64 PCM16 chunk.

use crate::audio::codec::{self, INPUT_MIME_TYPE, LinearResampler};
use crate::error::Result;
use crate::transport::OutboundChunk;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A block of raw samples as delivered by the input device.
#[derive(Debug, Clone)]
pub struct RawAudio {
    /// Interleaved f32 samples.
    pub samples: Vec<f32>,
    /// Native sample rate in Hz.
    pub sample_rate: u32,
    /// Native channel count.
    pub channels: u16,
}

/// A live microphone stream.
///
/// Acquiring one is the permission step; dropping or stopping it must
/// release the hardware device.
pub trait Microphone: Send {
    /// Begin delivering raw blocks on `tx`.
    ///
    /// # Errors
    ///
    /// Returns an error if the device stream cannot be started.
    fn start(&mut self, tx: mpsc::UnboundedSender<RawAudio>) -> Result<()>;

    /// Stop every track of the stream and release the device.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform refuses to release the device.
    fn stop(&mut self) -> Result<()>;
}

/// Accumulates mono samples at the target rate and yields complete frames.
#[derive(Debug)]
pub struct FrameAssembler {
    target_rate: u32,
    frame_samples: usize,
    resampler: Option<LinearResampler>,
    pending: Vec<f32>,
}

impl FrameAssembler {
    /// Create an assembler producing `frame_samples`-long frames at `target_rate`.
    pub fn new(target_rate: u32, frame_samples: usize) -> Self {
        Self {
            target_rate,
            frame_samples: frame_samples.max(1),
            resampler: None,
            pending: Vec::with_capacity(frame_samples * 2),
        }
    }

    /// Push a raw block, returning every frame it completes, oldest first.
    pub fn push(&mut self, raw: &RawAudio) -> Vec<Vec<f32>> {
        let mono = codec::to_mono(&raw.samples, raw.channels);
        if self
            .resampler
            .as_ref()
            .is_some_and(|r| r.src_rate() != raw.sample_rate)
        {
            self.resampler = None;
        }
        let target_rate = self.target_rate;
        let resampler = self
            .resampler
            .get_or_insert_with(|| LinearResampler::new(raw.sample_rate, target_rate));
        self.pending.extend(resampler.process(&mono));

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_samples {
            let rest = self.pending.split_off(self.frame_samples);
            frames.push(std::mem::replace(&mut self.pending, rest));
        }
        frames
    }

    /// Number of samples waiting for the next frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Owns the microphone while a session is active and turns its output
/// into ordered [`OutboundChunk`]s.
pub struct CapturePipeline {
    mic: Box<dyn Microphone>,
    rx: mpsc::UnboundedReceiver<RawAudio>,
    assembler: FrameAssembler,
    ready: VecDeque<OutboundChunk>,
    next_seq: u64,
    running: bool,
}

impl CapturePipeline {
    /// Attach to `mic` and start producing frames.
    ///
    /// # Errors
    ///
    /// Returns an error if the microphone stream fails to start; the
    /// microphone is released before returning.
    pub fn start(mut mic: Box<dyn Microphone>, target_rate: u32, frame_samples: usize) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Err(e) = mic.start(tx) {
            if let Err(release) = mic.stop() {
                warn!("failed to release microphone after start error: {release}");
            }
            return Err(e);
        }
        info!("capture started: {frame_samples}-sample frames at {target_rate}Hz");
        Ok(Self {
            mic,
            rx,
            assembler: FrameAssembler::new(target_rate, frame_samples),
            ready: VecDeque::new(),
            next_seq: 0,
            running: true,
        })
    }

    /// Wait for the next encoded frame.
    ///
    /// Cancel-safe: frames completed by a block are buffered before the
    /// next await. Returns `None` once stopped or when the device ends.
    pub async fn next_chunk(&mut self) -> Option<OutboundChunk> {
        loop {
            if !self.running {
                return None;
            }
            if let Some(chunk) = self.ready.pop_front() {
                return Some(chunk);
            }
            let raw = self.rx.recv().await?;
            for frame in self.assembler.push(&raw) {
                let chunk = OutboundChunk {
                    seq: self.next_seq,
                    data: codec::encode_pcm_frame(&frame),
                    mime_type: INPUT_MIME_TYPE.to_owned(),
                };
                debug!(seq = chunk.seq, "capture frame encoded");
                self.next_seq += 1;
                self.ready.push_back(chunk);
            }
        }
    }

    /// Disconnect processing and release the microphone.
    ///
    /// Idempotent. Release failures are logged and swallowed so teardown
    /// always completes.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.ready.clear();
        self.rx.close();
        if let Err(e) = self.mic.stop() {
            warn!("microphone release failed: {e}");
        }
        info!(frames = self.next_seq, "capture stopped");
    }

    /// Whether the pipeline is still attached to the microphone.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Number of frames produced so far.
    pub fn frames_produced(&self) -> u64 {
        self.next_seq
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::audio::codec::{bytes_to_pcm16, decode_base64};
    use crate::test_utils::FakeMicrophone;

    fn raw(samples: Vec<f32>, sample_rate: u32, channels: u16) -> RawAudio {
        RawAudio {
            samples,
            sample_rate,
            channels,
        }
    }

    #[test]
    fn assembler_emits_exact_frames_and_keeps_tail() {
        let mut assembler = FrameAssembler::new(16_000, 4);
        let frames = assembler.push(&raw((0..10).map(|i| i as f32 / 100.0).collect(), 16_000, 1));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], vec![0.0, 0.01, 0.02, 0.03]);
        assert_eq!(frames[1], vec![0.04, 0.05, 0.06, 0.07]);
        assert_eq!(assembler.pending_len(), 2);

        let frames = assembler.push(&raw(vec![0.5, 0.5], 16_000, 1));
        assert_eq!(frames, vec![vec![0.08, 0.09, 0.5, 0.5]]);
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn assembler_downmixes_and_resamples() {
        let mut assembler = FrameAssembler::new(16_000, 4096);
        // 48kHz stereo, 3 * 4096 frames of audio → one 16kHz frame.
        let block = vec![0.25_f32; 3 * 4096 * 2];
        let frames = assembler.push(&raw(block, 48_000, 2));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 4096);
        assert!(frames[0].iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn assembler_keeps_fractional_samples_across_device_blocks() {
        // 861 blocks of 512 samples at 44.1kHz, a common device setup.
        let mut assembler = FrameAssembler::new(16_000, 4096);
        let mut out: Vec<f32> = Vec::new();
        for block in 0..861_usize {
            let samples = (0..512)
                .map(|i| ((block * 512 + i) as f32) * 1e-6)
                .collect();
            for frame in assembler.push(&raw(samples, 44_100, 1)) {
                out.extend(frame);
            }
        }

        let produced = out.len() + assembler.pending_len();
        assert!(produced.abs_diff(159_939) <= 1, "produced {produced}");

        // Consecutive samples stay one input step apart across block edges.
        let step = 44_100.0 / 16_000.0 * 1e-6;
        for pair in out.windows(2) {
            assert!((f64::from(pair[1] - pair[0]) - step).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn pipeline_yields_frames_in_capture_order() {
        let (mic, feeder) = FakeMicrophone::new();
        let mut capture = CapturePipeline::start(Box::new(mic), 16_000, 4).unwrap();

        for block in 0..5_i16 {
            let samples = (0..6).map(|i| f32::from(block * 6 + i) / 32768.0).collect();
            feeder.push(raw(samples, 16_000, 1));
        }

        // 30 samples → 7 complete frames of 4.
        let mut expected_sample = 0_i16;
        for seq in 0..7 {
            let chunk = capture.next_chunk().await.unwrap();
            assert_eq!(chunk.seq, seq);
            assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
            let pcm = bytes_to_pcm16(&decode_base64(&chunk.data).unwrap()).unwrap();
            let expected: Vec<i16> = (expected_sample..expected_sample + 4).collect();
            assert_eq!(pcm, expected);
            expected_sample += 4;
        }
        assert_eq!(capture.frames_produced(), 7);
    }

    #[tokio::test]
    async fn stop_releases_microphone_once() {
        let (mic, feeder) = FakeMicrophone::new();
        let mut capture = CapturePipeline::start(Box::new(mic), 16_000, 4).unwrap();
        assert!(feeder.is_live());

        capture.stop();
        capture.stop();
        assert!(!feeder.is_live());
        assert_eq!(feeder.stop_calls(), 1);
        assert!(capture.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn release_failure_is_swallowed() {
        let (mic, feeder) = FakeMicrophone::new();
        let mic = mic.failing_release();
        let mut capture = CapturePipeline::start(Box::new(mic), 16_000, 4).unwrap();
        capture.stop();
        assert!(!capture.is_running());
        assert_eq!(feeder.stop_calls(), 1);
    }

    #[test]
    fn start_failure_releases_device() {
        let (mic, feeder) = FakeMicrophone::new();
        let mic = mic.failing_start();
        let result = CapturePipeline::start(Box::new(mic), 16_000, 4);
        assert!(result.is_err());
        assert_eq!(feeder.stop_calls(), 1);
    }
}
