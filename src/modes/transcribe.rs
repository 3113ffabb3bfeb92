//! Record a clip from the microphone and transcribe it.

use crate::audio::capture::{Microphone, RawAudio};
use crate::audio::codec::{self, LinearResampler, encode_base64};
use crate::config::YukiConfig;
use crate::error::{Result, YukiError};
use crate::modes::client::{GenerateContentRequest, GenerativeClient, Part};
use std::future::Future;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Fixed instruction sent with every transcription request.
pub const TRANSCRIBE_PROMPT: &str = "Transcribe this audio perfectly. Do not add any filler text.";

/// Reply used when the model returns no text.
pub const NO_SPEECH: &str = "No speech detected.";

/// Sample rate recorded clips are stored at.
pub const CLIP_SAMPLE_RATE: u32 = 16_000;

/// An encoded audio recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl AudioClip {
    /// Pack mono float samples as a 16-bit PCM WAV file.
    ///
    /// # Errors
    ///
    /// Returns [`YukiError::Audio`] if the WAV writer fails.
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Result<Self> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer =
                hound::WavWriter::new(&mut cursor, spec).map_err(|e| YukiError::Audio(e.to_string()))?;
            for sample in codec::float_to_pcm16(samples) {
                writer
                    .write_sample(sample)
                    .map_err(|e| YukiError::Audio(e.to_string()))?;
            }
            writer.finalize().map_err(|e| YukiError::Audio(e.to_string()))?;
        }

        Ok(Self {
            data: cursor.into_inner(),
            mime_type: "audio/wav".to_owned(),
        })
    }

    /// Read an audio file, inferring its MIME type from the extension.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or
    /// [`YukiError::Config`] for an unsupported extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let mime_type = match ext.as_str() {
            "wav" => "audio/wav",
            "mp3" => "audio/mp3",
            "ogg" => "audio/ogg",
            "webm" => "audio/webm",
            "flac" => "audio/flac",
            "m4a" | "aac" => "audio/aac",
            _ => {
                return Err(YukiError::Config(format!(
                    "unsupported audio type: {}",
                    path.display()
                )));
            }
        };
        Ok(Self {
            data: std::fs::read(path)?,
            mime_type: mime_type.to_owned(),
        })
    }
}

/// Record from `mic` until `until` resolves, then release the device.
///
/// Blocks are downmixed and resampled to [`CLIP_SAMPLE_RATE`].
///
/// # Errors
///
/// Returns the microphone error if the stream cannot start, or
/// [`YukiError::Audio`] if nothing was recorded.
pub async fn record_clip<F>(mut mic: Box<dyn Microphone>, until: F) -> Result<AudioClip>
where
    F: Future<Output = ()>,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<RawAudio>();
    if let Err(e) = mic.start(tx) {
        if let Err(release) = mic.stop() {
            warn!("failed to release microphone after start error: {release}");
        }
        return Err(e);
    }
    info!("recording");

    let mut clip = ClipBuffer::default();
    tokio::pin!(until);
    loop {
        tokio::select! {
            () = &mut until => break,
            raw = rx.recv() => {
                let Some(raw) = raw else { break };
                clip.append(&raw);
            }
        }
    }

    if let Err(e) = mic.stop() {
        warn!("microphone release failed: {e}");
    }
    while let Ok(raw) = rx.try_recv() {
        clip.append(&raw);
    }

    let samples = clip.samples;
    if samples.is_empty() {
        return Err(YukiError::Audio("no audio was recorded".into()));
    }
    info!(
        seconds = samples.len() as f64 / f64::from(CLIP_SAMPLE_RATE),
        "recording finished"
    );
    AudioClip::from_samples(&samples, CLIP_SAMPLE_RATE)
}

/// Mono samples at [`CLIP_SAMPLE_RATE`], resampled as one continuous stream.
#[derive(Default)]
struct ClipBuffer {
    resampler: Option<LinearResampler>,
    samples: Vec<f32>,
}

impl ClipBuffer {
    fn append(&mut self, raw: &RawAudio) {
        let mono = codec::to_mono(&raw.samples, raw.channels);
        let resampler = self
            .resampler
            .get_or_insert_with(|| LinearResampler::new(raw.sample_rate, CLIP_SAMPLE_RATE));
        self.samples.extend(resampler.process(&mono));
    }
}

/// Sends clips to the transcription model.
#[derive(Debug, Clone)]
pub struct TranscribeMode {
    client: GenerativeClient,
    model: String,
}

impl TranscribeMode {
    pub fn new(client: GenerativeClient, config: &YukiConfig) -> Self {
        Self {
            client,
            model: config.backend.transcribe_model.clone(),
        }
    }

    /// Transcribe `clip` verbatim.
    ///
    /// # Errors
    ///
    /// Returns the backend or credential error of the request.
    pub async fn transcribe(&self, clip: &AudioClip) -> Result<String> {
        let request = GenerateContentRequest::user(vec![
            Part::inline(&clip.mime_type, encode_base64(&clip.data)),
            Part::text(TRANSCRIBE_PROMPT),
        ]);
        let response = self.client.generate_content(&self.model, &request).await?;
        Ok(response.text().unwrap_or_else(|| NO_SPEECH.to_owned()))
    }
}
