//! In-memory fakes for the audio and transport capabilities.
//!
//! Each fake comes with a cloneable probe so tests can drive it and
//! inspect what the code under test did after handing the fake over.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::audio::AudioBackend;
use crate::audio::capture::{Microphone, RawAudio};
use crate::audio::codec::PlayableBuffer;
use crate::audio::playback::{OutputDevice, PlaybackEvent, SourceId};
use crate::config::AudioConfig;
use crate::error::{Result, YukiError};
use crate::transport::{Connector, LiveConnectConfig, OutboundChunk, TransportEndpoint, TransportEvent, TransportHandle};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Microphone
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MicState {
    tx: Option<mpsc::UnboundedSender<RawAudio>>,
    stop_calls: usize,
}

/// Microphone whose blocks are pushed by a [`MicFeeder`].
pub struct FakeMicrophone {
    state: Arc<Mutex<MicState>>,
    fail_start: bool,
    fail_release: bool,
}

/// Test-side handle of a [`FakeMicrophone`].
#[derive(Clone)]
pub struct MicFeeder {
    state: Arc<Mutex<MicState>>,
}

impl FakeMicrophone {
    pub fn new() -> (Self, MicFeeder) {
        let state = Arc::new(Mutex::new(MicState::default()));
        (
            Self {
                state: Arc::clone(&state),
                fail_start: false,
                fail_release: false,
            },
            MicFeeder { state },
        )
    }

    /// `start` fails.
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// `stop` releases the device but reports an error.
    pub fn failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }
}

impl Microphone for FakeMicrophone {
    fn start(&mut self, tx: mpsc::UnboundedSender<RawAudio>) -> Result<()> {
        if self.fail_start {
            return Err(YukiError::Audio("fake microphone refused to start".into()));
        }
        self.state.lock().unwrap().tx = Some(tx);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.stop_calls += 1;
        state.tx = None;
        if self.fail_release {
            return Err(YukiError::Audio("fake track refused to stop".into()));
        }
        Ok(())
    }
}

impl MicFeeder {
    /// Deliver a block as if the device produced it.
    pub fn push(&self, raw: RawAudio) {
        if let Some(tx) = &self.state.lock().unwrap().tx {
            let _ = tx.send(raw);
        }
    }

    /// Whether the microphone is started and not yet released.
    pub fn is_live(&self) -> bool {
        self.state.lock().unwrap().tx.is_some()
    }

    /// Number of `stop` calls, successful or not.
    pub fn stop_calls(&self) -> usize {
        self.state.lock().unwrap().stop_calls
    }
}

// ---------------------------------------------------------------------------
// Output device
// ---------------------------------------------------------------------------

#[derive(Default)]
struct OutputState {
    now: f64,
    scheduled: Vec<(SourceId, f64, f64)>,
    sounding: BTreeSet<SourceId>,
    stopped: Vec<SourceId>,
    close_calls: usize,
    events: Option<mpsc::UnboundedSender<PlaybackEvent>>,
}

/// Output device with a manually advanced clock.
pub struct FakeOutput {
    state: Arc<Mutex<OutputState>>,
    fail_stop: bool,
}

/// Test-side handle of a [`FakeOutput`].
#[derive(Clone)]
pub struct OutputProbe {
    state: Arc<Mutex<OutputState>>,
}

impl FakeOutput {
    pub fn new() -> (Self, OutputProbe) {
        let state = Arc::new(Mutex::new(OutputState::default()));
        (
            Self {
                state: Arc::clone(&state),
                fail_stop: false,
            },
            OutputProbe { state },
        )
    }

    /// A device that reports finished sources on `events`.
    pub fn with_events(events: mpsc::UnboundedSender<PlaybackEvent>) -> (Self, OutputProbe) {
        let (output, probe) = Self::new();
        output.state.lock().unwrap().events = Some(events);
        (output, probe)
    }

    /// `stop` silences the source but reports an error.
    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }
}

impl OutputDevice for FakeOutput {
    fn now(&self) -> f64 {
        self.state.lock().unwrap().now
    }

    fn schedule(&mut self, id: SourceId, buffer: PlayableBuffer, start_at: f64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.scheduled.push((id, start_at, buffer.duration_secs()));
        state.sounding.insert(id);
        Ok(())
    }

    fn stop(&mut self, id: SourceId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.sounding.remove(&id);
        state.stopped.push(id);
        if self.fail_stop {
            return Err(YukiError::Audio("fake source refused to stop".into()));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.close_calls += 1;
        state.sounding.clear();
        Ok(())
    }
}

impl OutputProbe {
    pub fn set_now(&self, now: f64) {
        self.state.lock().unwrap().now = now;
    }

    /// `(id, start_at, duration)` of every scheduled source, in order.
    pub fn scheduled(&self) -> Vec<(SourceId, f64, f64)> {
        self.state.lock().unwrap().scheduled.clone()
    }

    pub fn scheduled_ids(&self) -> Vec<SourceId> {
        self.scheduled().into_iter().map(|(id, _, _)| id).collect()
    }

    /// Sources scheduled and neither stopped nor finished.
    pub fn sounding(&self) -> Vec<SourceId> {
        self.state.lock().unwrap().sounding.iter().copied().collect()
    }

    pub fn stopped(&self) -> Vec<SourceId> {
        self.state.lock().unwrap().stopped.clone()
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().unwrap().close_calls
    }

    pub fn is_closed(&self) -> bool {
        self.close_calls() > 0
    }

    /// Let `id` play to completion.
    pub fn finish(&self, id: SourceId) {
        let mut state = self.state.lock().unwrap();
        if state.sounding.remove(&id)
            && let Some(events) = &state.events
        {
            let _ = events.send(PlaybackEvent::Ended(id));
        }
    }

    /// Let every sounding source play to completion, oldest first.
    pub fn finish_all(&self) {
        for id in self.sounding() {
            self.finish(id);
        }
    }
}

// ---------------------------------------------------------------------------
// Audio backend
// ---------------------------------------------------------------------------

#[derive(Default)]
struct BackendState {
    deny_microphone: bool,
    fail_output: bool,
    mic_opens: usize,
    output_opens: usize,
    microphone: Option<MicFeeder>,
    output: Option<OutputProbe>,
}

/// Hands out fake devices and remembers the most recent ones.
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<BackendState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse microphone access.
    pub fn deny_microphone(&self) {
        self.state.lock().unwrap().deny_microphone = true;
    }

    /// Fail to open the output device.
    pub fn fail_output(&self) {
        self.state.lock().unwrap().fail_output = true;
    }

    pub fn mic_opens(&self) -> usize {
        self.state.lock().unwrap().mic_opens
    }

    pub fn output_opens(&self) -> usize {
        self.state.lock().unwrap().output_opens
    }

    /// Feeder of the most recently opened microphone.
    pub fn microphone(&self) -> Option<MicFeeder> {
        self.state.lock().unwrap().microphone.clone()
    }

    /// Probe of the most recently opened output device.
    pub fn output(&self) -> Option<OutputProbe> {
        self.state.lock().unwrap().output.clone()
    }
}

impl AudioBackend for FakeBackend {
    fn open_microphone(&self, _config: &AudioConfig) -> Result<Box<dyn Microphone>> {
        let mut state = self.state.lock().unwrap();
        state.mic_opens += 1;
        if state.deny_microphone {
            return Err(YukiError::PermissionDenied("user denied microphone access".into()));
        }
        let (mic, feeder) = FakeMicrophone::new();
        state.microphone = Some(feeder);
        Ok(Box::new(mic))
    }

    fn open_output(
        &self,
        _config: &AudioConfig,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Result<Box<dyn OutputDevice>> {
        let mut state = self.state.lock().unwrap();
        state.output_opens += 1;
        if state.fail_output {
            return Err(YukiError::Audio("no output device".into()));
        }
        let (output, probe) = FakeOutput::with_events(events);
        state.output = Some(probe);
        Ok(Box::new(output))
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ConnectorState {
    configs: Vec<LiveConnectConfig>,
    endpoint: Option<TransportEndpoint>,
}

/// Connector that keeps the remote end of the latest session for the test.
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().configs.len()
    }

    pub fn last_config(&self) -> Option<LiveConnectConfig> {
        self.state.lock().unwrap().configs.last().cloned()
    }

    /// Deliver an event on the latest session.
    pub fn emit(&self, event: TransportEvent) {
        let state = self.state.lock().unwrap();
        let endpoint = state.endpoint.as_ref().expect("no session opened");
        endpoint.events.send(event).expect("session handle dropped");
    }

    /// Drain the chunks the latest session has sent so far.
    pub fn sent(&self) -> Vec<OutboundChunk> {
        let mut state = self.state.lock().unwrap();
        let mut out = Vec::new();
        if let Some(endpoint) = state.endpoint.as_mut() {
            while let Ok(chunk) = endpoint.outbound.try_recv() {
                out.push(chunk);
            }
        }
        out
    }

    /// Whether the latest session was closed by its owner.
    pub fn is_cancelled(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .endpoint
            .as_ref()
            .is_some_and(|endpoint| endpoint.cancel.is_cancelled())
    }
}

impl Connector for FakeConnector {
    fn open(&self, config: LiveConnectConfig) -> TransportHandle {
        let (handle, endpoint) = TransportHandle::pair();
        let mut state = self.state.lock().unwrap();
        state.configs.push(config);
        state.endpoint = Some(endpoint);
        handle
    }
}
