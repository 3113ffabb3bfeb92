//! cpal-backed microphone and output device.
//!
//! cpal streams are not `Send` on every platform, so each stream lives on a
//! dedicated thread that holds it until told to stop. Stopping joins the
//! thread, which makes device release synchronous.

use crate::audio::AudioBackend;
use crate::audio::capture::{Microphone, RawAudio};
use crate::audio::codec::PlayableBuffer;
use crate::audio::playback::{OutputDevice, PlaybackEvent, SourceId};
use crate::config::AudioConfig;
use crate::error::{Result, YukiError};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, bounded};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Audio backend using the system's default cpal host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    /// List available input devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_input_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| YukiError::Audio(format!("cannot enumerate devices: {e}")))?;
        Ok(devices.filter_map(|d| device_name(&d)).collect())
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| YukiError::Audio(format!("cannot enumerate devices: {e}")))?;
        Ok(devices.filter_map(|d| device_name(&d)).collect())
    }
}

impl AudioBackend for CpalBackend {
    fn open_microphone(&self, config: &AudioConfig) -> Result<Box<dyn Microphone>> {
        Ok(Box::new(CpalMicrophone::new(config)?))
    }

    fn open_output(
        &self,
        config: &AudioConfig,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Result<Box<dyn OutputDevice>> {
        Ok(Box::new(CpalOutput::new(config, events)?))
    }
}

fn device_name(device: &cpal::Device) -> Option<String> {
    device.description().ok().map(|desc| desc.name().to_owned())
}

/// A stream thread and the channel that tells it to finish.
struct StreamWorker {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl StreamWorker {
    /// Spawn a thread that builds a stream with `build`, reports whether it
    /// started, and keeps it alive until [`StreamWorker::stop`].
    fn spawn<F>(name: &str, build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<cpal::Stream> + Send + 'static,
    {
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let (stop_tx, stop_rx): (Sender<()>, Receiver<()>) = bounded(1);

        let handle = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(YukiError::Audio(format!(
                        "failed to start stream: {e}"
                    ))));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // Hold the stream until asked to stop or the owner goes away.
                let _ = stop_rx.recv();
                drop(stream);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { stop_tx, handle }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(YukiError::Audio(format!("{name} thread exited early")))
            }
        }
    }

    fn stop(self) -> Result<()> {
        let _ = self.stop_tx.send(());
        self.handle
            .join()
            .map_err(|_| YukiError::Audio("audio thread panicked".into()))
    }
}

/// Hand-off point between the input callback and the capture side.
///
/// The stream runs from the moment the microphone is opened. Blocks only
/// flow once a capture attaches; until then they are not captured.
#[derive(Clone, Default)]
struct CaptureSink {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<RawAudio>>>>,
}

impl CaptureSink {
    fn attach(&self, tx: mpsc::UnboundedSender<RawAudio>) -> Result<()> {
        let mut slot = self
            .tx
            .lock()
            .map_err(|e| YukiError::Audio(format!("capture sink poisoned: {e}")))?;
        *slot = Some(tx);
        Ok(())
    }

    fn detach(&self) {
        if let Ok(mut slot) = self.tx.lock() {
            *slot = None;
        }
    }

    /// Forward one callback block. Returns whether a capture received it.
    fn deliver(&self, samples: &[f32], sample_rate: u32, channels: u16) -> bool {
        let Ok(slot) = self.tx.lock() else {
            return false;
        };
        match slot.as_ref() {
            Some(tx) => tx
                .send(RawAudio {
                    samples: samples.to_vec(),
                    sample_rate,
                    channels,
                })
                .is_ok(),
            None => false,
        }
    }
}

/// Microphone input via cpal at the device's native rate and channels.
pub struct CpalMicrophone {
    sink: CaptureSink,
    worker: Option<StreamWorker>,
}

impl CpalMicrophone {
    /// Open the configured (or default) input device and start its stream.
    ///
    /// The device is held from here on, so a refused microphone fails now
    /// rather than when capture begins.
    ///
    /// # Errors
    ///
    /// Returns [`YukiError::PermissionDenied`] when no input device can be
    /// opened, which is how refused microphone access surfaces on most hosts.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.input_device {
            host.input_devices()
                .map_err(|e| YukiError::Audio(format!("cannot enumerate devices: {e}")))?
                .find(|d| device_name(d).as_deref() == Some(name.as_str()))
                .ok_or_else(|| YukiError::Audio(format!("input device '{name}' not found")))?
        } else {
            host.default_input_device()
                .ok_or_else(|| YukiError::PermissionDenied("no input device available".into()))?
        };

        let default_config = device
            .default_input_config()
            .map_err(|e| YukiError::PermissionDenied(format!("cannot open input device: {e}")))?;

        let stream_config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };
        let sample_rate = stream_config.sample_rate;
        let channels = stream_config.channels;

        info!(
            "using input device {}: {}Hz, {} channels",
            device_name(&device).unwrap_or_else(|| "<unknown>".into()),
            sample_rate,
            channels
        );

        let sink = CaptureSink::default();
        let callback_sink = sink.clone();
        let worker = StreamWorker::spawn("yuki-capture", move || {
            device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                        callback_sink.deliver(data, sample_rate, channels);
                    },
                    move |err| {
                        error!("audio input stream error: {err}");
                    },
                    None,
                )
                .map_err(|e| match e {
                    cpal::BuildStreamError::DeviceNotAvailable => {
                        YukiError::PermissionDenied("input device not available".into())
                    }
                    other => YukiError::Audio(format!("failed to build input stream: {other}")),
                })
        })?;
        debug!("microphone stream running");

        Ok(Self {
            sink,
            worker: Some(worker),
        })
    }
}

impl Microphone for CpalMicrophone {
    fn start(&mut self, tx: mpsc::UnboundedSender<RawAudio>) -> Result<()> {
        if self.worker.is_none() {
            return Err(YukiError::Audio("microphone already released".into()));
        }
        self.sink.attach(tx)
    }

    fn stop(&mut self) -> Result<()> {
        self.sink.detach();
        match self.worker.take() {
            Some(worker) => {
                worker.stop()?;
                info!("microphone released");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// A buffer placed on the mixer timeline.
struct MixerSource {
    id: SourceId,
    start_frame: u64,
    samples: Vec<f32>,
    position: usize,
    /// Frame after the last sample was rendered.
    ended_at: Option<u64>,
}

impl MixerSource {
    fn new(id: SourceId, start_frame: u64, samples: Vec<f32>) -> Self {
        Self {
            id,
            start_frame,
            samples,
            position: 0,
            ended_at: None,
        }
    }
}

/// State shared between the output callback and the scheduler side.
struct Mixer {
    /// Frames rendered so far; this is the device clock.
    frame: u64,
    /// Frames between rendering a sample and hearing it.
    latency_frames: u64,
    sources: Vec<MixerSource>,
    /// Finished sources and the frame at which their tail is audible.
    ending: Vec<(SourceId, u64)>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
}

impl Mixer {
    fn new(events: mpsc::UnboundedSender<PlaybackEvent>) -> Self {
        Self {
            frame: 0,
            latency_frames: 0,
            sources: Vec::new(),
            ending: Vec::new(),
            events,
        }
    }

    fn render(&mut self, data: &mut [f32], channels: usize) {
        for out in data.chunks_mut(channels.max(1)) {
            let mut value = 0.0_f32;
            for source in &mut self.sources {
                if source.start_frame <= self.frame && source.position < source.samples.len() {
                    value += source.samples[source.position];
                    source.position += 1;
                    if source.position == source.samples.len() {
                        source.ended_at = Some(self.frame + 1);
                    }
                }
            }
            out.fill(value.clamp(-1.0, 1.0));
            self.frame += 1;
        }

        let now = self.frame;
        let latency = self.latency_frames;
        let ending = &mut self.ending;
        self.sources.retain(|source| {
            let done = source.position >= source.samples.len();
            if done {
                ending.push((source.id, source.ended_at.unwrap_or(now) + latency));
            }
            !done
        });

        // Ended fires once the tail has left the speaker, not the buffer.
        let events = &self.events;
        self.ending.retain(|&(id, heard_at)| {
            let heard = heard_at <= now;
            if heard {
                let _ = events.send(PlaybackEvent::Ended(id));
            }
            !heard
        });
    }

    /// Drop a source without reporting its end.
    fn remove(&mut self, id: SourceId) {
        self.sources.retain(|source| source.id != id);
        self.ending.retain(|&(ending, _)| ending != id);
    }

    fn clear(&mut self) {
        self.sources.clear();
        self.ending.clear();
    }
}

/// Output device mixing scheduled sources onto one cpal stream.
pub struct CpalOutput {
    mixer: Arc<Mutex<Mixer>>,
    sample_rate: u32,
    worker: Option<StreamWorker>,
}

impl CpalOutput {
    /// Open the configured (or default) output device and start its clock.
    ///
    /// # Errors
    ///
    /// Returns an error if no output device is available or the stream
    /// cannot be started.
    pub fn new(config: &AudioConfig, events: mpsc::UnboundedSender<PlaybackEvent>) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.output_device {
            host.output_devices()
                .map_err(|e| YukiError::Audio(format!("cannot enumerate devices: {e}")))?
                .find(|d| device_name(d).as_deref() == Some(name.as_str()))
                .ok_or_else(|| YukiError::Audio(format!("output device '{name}' not found")))?
        } else {
            host.default_output_device()
                .ok_or_else(|| YukiError::Audio("no default output device".into()))?
        };

        let default_config = device
            .default_output_config()
            .map_err(|e| YukiError::Audio(format!("no default output config: {e}")))?;
        let stream_config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };
        let sample_rate = stream_config.sample_rate;
        let channels = usize::from(stream_config.channels);

        info!(
            "using output device {}: {}Hz, {} channels",
            device_name(&device).unwrap_or_else(|| "<unknown>".into()),
            sample_rate,
            channels
        );

        let mixer = Arc::new(Mutex::new(Mixer::new(events)));
        let callback_mixer = Arc::clone(&mixer);

        let worker = StreamWorker::spawn("yuki-playback", move || {
            device
                .build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
                        let timestamp = info.timestamp();
                        let latency = timestamp
                            .playback
                            .duration_since(&timestamp.callback)
                            .unwrap_or_default();
                        match callback_mixer.lock() {
                            Ok(mut mixer) => {
                                mixer.latency_frames =
                                    (latency.as_secs_f64() * f64::from(sample_rate)).round() as u64;
                                mixer.render(data, channels);
                            }
                            Err(_) => data.fill(0.0),
                        }
                    },
                    move |err| {
                        error!("audio output stream error: {err}");
                    },
                    None,
                )
                .map_err(|e| YukiError::Audio(format!("failed to build output stream: {e}")))
        })?;

        Ok(Self {
            mixer,
            sample_rate,
            worker: Some(worker),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Mixer>> {
        self.mixer
            .lock()
            .map_err(|e| YukiError::Audio(format!("mixer lock poisoned: {e}")))
    }
}

impl OutputDevice for CpalOutput {
    fn now(&self) -> f64 {
        match self.mixer.lock() {
            Ok(mixer) => mixer.frame as f64 / f64::from(self.sample_rate),
            Err(_) => 0.0,
        }
    }

    fn schedule(&mut self, id: SourceId, buffer: PlayableBuffer, start_at: f64) -> Result<()> {
        let buffer = buffer.resampled(self.sample_rate);
        let start_frame = (start_at.max(0.0) * f64::from(self.sample_rate)).round() as u64;
        self.lock()?
            .sources
            .push(MixerSource::new(id, start_frame, buffer.samples));
        Ok(())
    }

    fn stop(&mut self, id: SourceId) -> Result<()> {
        self.lock()?.remove(id);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.clear();
        }
        match self.worker.take() {
            Some(worker) => {
                worker.stop()?;
                info!("output device closed");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
