//! Orchestrates one live voice session at a time.
//!
//! The controller is a single task: capture frames, transport events and
//! playback notifications all arrive as [`SessionEvent`]s and are handled
//! one at a time, so no two handlers ever touch the devices concurrently.
//! Every per-session resource lives in a [`LiveSession`] that is created by
//! [`SessionController::start`] and dropped by teardown.

use crate::audio::AudioBackend;
use crate::audio::capture::{CapturePipeline, Microphone};
use crate::audio::playback::{PlaybackEvent, PlaybackScheduler};
use crate::config::YukiConfig;
use crate::credentials::{self, CredentialProvider};
use crate::error::Result;
use crate::runtime::RuntimeEvent;
use crate::session::state::{Emotion, SessionState};
use crate::transport::{Connector, LiveConnectConfig, OutboundChunk, TransportEvent, TransportHandle};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// User-initiated control of the live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Start,
    Stop,
    /// Start when idle, stop otherwise.
    Toggle,
}

/// Everything the session loop reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A capture frame is ready to send.
    Capture(OutboundChunk),
    /// The microphone stream ended without being stopped.
    CaptureEnded,
    /// Something happened on the transport.
    Transport(TransportEvent),
    /// The transport's connection task is gone.
    TransportEnded,
    /// The output device finished a source.
    Playback(PlaybackEvent),
}

/// Resources owned by the currently running session.
struct LiveSession {
    id: Uuid,
    transport: TransportHandle,
    /// Held until the transport opens, then moved into `capture`.
    mic: Option<Box<dyn Microphone>>,
    capture: Option<CapturePipeline>,
    playback: PlaybackScheduler,
    playback_events: mpsc::UnboundedReceiver<PlaybackEvent>,
}

impl LiveSession {
    async fn next_event(&mut self) -> SessionEvent {
        tokio::select! {
            biased;
            Some(event) = self.playback_events.recv() => SessionEvent::Playback(event),
            event = self.transport.next_event() => match event {
                Some(event) => SessionEvent::Transport(event),
                None => SessionEvent::TransportEnded,
            },
            chunk = next_capture(self.capture.as_mut()) => match chunk {
                Some(chunk) => SessionEvent::Capture(chunk),
                None => SessionEvent::CaptureEnded,
            },
        }
    }

    /// Stop capture, close the transport, silence and release the output.
    fn teardown(mut self) {
        debug!(session = %self.id, "tearing down live session");
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        if let Some(mut mic) = self.mic.take()
            && let Err(e) = mic.stop()
        {
            warn!("microphone release failed: {e}");
        }
        self.transport.close();
        self.playback.close();
    }
}

async fn next_capture(capture: Option<&mut CapturePipeline>) -> Option<OutboundChunk> {
    match capture {
        Some(capture) => capture.next_chunk().await,
        None => std::future::pending().await,
    }
}

/// Drives the live session state machine.
pub struct SessionController {
    config: YukiConfig,
    backend: Arc<dyn AudioBackend>,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialProvider>,
    runtime_tx: Option<broadcast::Sender<RuntimeEvent>>,
    state: SessionState,
    emotion: Emotion,
    last_error: Option<String>,
    session: Option<LiveSession>,
}

impl SessionController {
    /// Create an idle controller.
    pub fn new(
        config: YukiConfig,
        backend: Arc<dyn AudioBackend>,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            config,
            backend,
            connector,
            credentials,
            runtime_tx: None,
            state: SessionState::Idle,
            emotion: Emotion::Happy,
            last_error: None,
            session: None,
        }
    }

    /// Attach a runtime event broadcaster for the presentation layer.
    pub fn with_runtime_events(mut self, tx: broadcast::Sender<RuntimeEvent>) -> Self {
        self.runtime_tx = Some(tx);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn emotion(&self) -> Emotion {
        self.emotion
    }

    /// The last error surfaced to the user, until the next start clears it.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Playback cursor of the running session.
    pub fn playback_cursor(&self) -> Option<f64> {
        self.session.as_ref().map(|s| s.playback.cursor())
    }

    /// Number of scheduled, unfinished playback sources.
    pub fn queued_sources(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.playback.active_len())
    }

    /// Begin a session: check the credential, acquire the microphone, open
    /// the output device and open the transport.
    ///
    /// A no-op unless idle. On failure the error is surfaced, every device
    /// acquired so far is released and the controller stays idle.
    ///
    /// # Errors
    ///
    /// Returns the credential, permission or device error that prevented
    /// the session from starting.
    pub fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            debug!(state = %self.state, "start ignored: session already running");
            return Ok(());
        }
        self.clear_error();

        if let Err(e) = credentials::ensure_credential(self.credentials.as_ref()) {
            self.surface_error(&e.to_string());
            return Err(e);
        }

        let mut mic = match self.backend.open_microphone(&self.config.audio) {
            Ok(mic) => mic,
            Err(e) => {
                warn!("microphone unavailable: {e}");
                self.surface_error(&e.to_string());
                return Err(e);
            }
        };

        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        let output = match self.backend.open_output(&self.config.audio, playback_tx) {
            Ok(output) => output,
            Err(e) => {
                if let Err(release) = mic.stop() {
                    warn!("microphone release failed: {release}");
                }
                self.surface_error(&e.to_string());
                return Err(e);
            }
        };

        self.set_state(SessionState::Connecting);
        self.set_emotion(Emotion::Thinking);

        let id = Uuid::new_v4();
        let transport = self.connector.open(LiveConnectConfig::from_config(&self.config));
        info!(session = %id, model = %self.config.live.model, "live session connecting");

        self.session = Some(LiveSession {
            id,
            transport,
            mic: Some(mic),
            capture: None,
            playback: PlaybackScheduler::new(output, self.config.audio.output_sample_rate),
            playback_events: playback_rx,
        });
        Ok(())
    }

    /// End the session. Capture is torn down and the microphone released
    /// before this returns.
    ///
    /// Calling it while idle does nothing.
    pub fn stop(&mut self) {
        if self.session.is_none() {
            return;
        }
        info!("live session stopping");
        self.close_session();
    }

    /// Wait for the next event of the running session.
    ///
    /// Pends forever while idle. Cancel-safe.
    pub async fn next_session_event(&mut self) -> SessionEvent {
        match self.session.as_mut() {
            Some(session) => session.next_event().await,
            None => std::future::pending().await,
        }
    }

    /// Apply one event to the state machine.
    pub fn handle_session_event(&mut self, event: SessionEvent) {
        let Some(session) = self.session.as_mut() else {
            debug!(?event, "event after teardown ignored");
            return;
        };

        match event {
            SessionEvent::Capture(chunk) => {
                if let Err(e) = session.transport.send(chunk) {
                    warn!("dropping capture frame: {e}");
                }
            }
            SessionEvent::CaptureEnded => {
                self.fail("microphone stream ended unexpectedly");
            }
            SessionEvent::Transport(TransportEvent::Opened) => {
                if self.state != SessionState::Connecting {
                    return;
                }
                let Some(mic) = session.mic.take() else {
                    return;
                };
                let audio = &self.config.audio;
                match CapturePipeline::start(mic, audio.input_sample_rate, audio.frame_samples) {
                    Ok(capture) => {
                        session.capture = Some(capture);
                        info!("live session active");
                        self.set_state(SessionState::Active);
                        self.set_emotion(Emotion::Happy);
                    }
                    Err(e) => self.fail(&e.to_string()),
                }
            }
            SessionEvent::Transport(TransportEvent::Audio(chunk)) => {
                match session.playback.enqueue(&chunk) {
                    Ok(_) => self.set_emotion(Emotion::Speaking),
                    Err(e) => warn!("dropping undecodable audio chunk: {e}"),
                }
            }
            SessionEvent::Transport(TransportEvent::Interrupted) => {
                session.playback.interrupt();
                self.set_emotion(Emotion::Happy);
            }
            SessionEvent::Transport(TransportEvent::TurnComplete) => {
                debug!("assistant turn complete");
            }
            SessionEvent::Transport(TransportEvent::Error(message)) => {
                self.fail(&message);
            }
            SessionEvent::Transport(TransportEvent::Closed) | SessionEvent::TransportEnded => {
                if self.state == SessionState::Connecting {
                    self.fail("connection closed before the session opened");
                } else {
                    info!("live session closed by remote");
                    self.close_session();
                }
            }
            SessionEvent::Playback(PlaybackEvent::Ended(id)) => {
                if session.playback.on_source_ended(id) {
                    self.set_emotion(Emotion::Happy);
                }
            }
        }
    }

    /// Process commands and session events until `cancel` fires or the
    /// command channel closes. Any running session is stopped on exit.
    ///
    /// # Errors
    ///
    /// Currently never fails; start errors are surfaced as runtime events.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        cancel: CancellationToken,
    ) -> Result<()> {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    self.apply_command(command);
                }
                event = self.next_session_event() => self.handle_session_event(event),
            }
        }
        self.stop();
        info!("session controller shut down");
        Ok(())
    }

    fn apply_command(&mut self, command: SessionCommand) {
        let start = match command {
            SessionCommand::Start => true,
            SessionCommand::Stop => false,
            SessionCommand::Toggle => self.state == SessionState::Idle,
        };
        if start {
            if let Err(e) = self.start() {
                warn!("live session did not start: {e}");
            }
        } else {
            self.stop();
        }
    }

    fn close_session(&mut self) {
        self.set_state(SessionState::Closing);
        if let Some(session) = self.session.take() {
            session.teardown();
        }
        self.set_emotion(Emotion::Happy);
        self.set_state(SessionState::Idle);
    }

    fn fail(&mut self, message: &str) {
        error!("live session error: {message}");
        self.set_state(SessionState::Errored);
        self.surface_error(message);
        if let Some(session) = self.session.take() {
            session.teardown();
        }
        self.set_emotion(Emotion::Happy);
        self.set_state(SessionState::Idle);
    }

    fn surface_error(&mut self, message: &str) {
        self.last_error = Some(message.to_owned());
        self.emit(RuntimeEvent::Error(message.to_owned()));
    }

    fn clear_error(&mut self) {
        if self.last_error.take().is_some() {
            self.emit(RuntimeEvent::ErrorCleared);
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        debug!(from = %self.state, to = %state, "session state");
        self.state = state;
        self.emit(RuntimeEvent::StateChanged(state));
    }

    fn set_emotion(&mut self, emotion: Emotion) {
        if self.emotion == emotion {
            return;
        }
        self.emotion = emotion;
        self.emit(RuntimeEvent::EmotionChanged(emotion));
    }

    fn emit(&self, event: RuntimeEvent) {
        if let Some(tx) = &self.runtime_tx {
            let _ = tx.send(event);
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::audio::codec::{encode_base64, pcm16_to_bytes};
    use crate::audio::capture::RawAudio;
    use crate::credentials::StaticCredential;
    use crate::error::YukiError;
    use crate::test_utils::{FakeBackend, FakeConnector};
    use crate::transport::InboundChunk;
    use std::time::Duration;

    struct Harness {
        controller: SessionController,
        backend: FakeBackend,
        connector: FakeConnector,
        events: broadcast::Receiver<RuntimeEvent>,
    }

    fn harness() -> Harness {
        harness_with(FakeBackend::new(), StaticCredential::new("test-key"))
    }

    fn harness_with(backend: FakeBackend, credential: StaticCredential) -> Harness {
        let connector = FakeConnector::new();
        let (tx, events) = crate::runtime::channel();
        let controller = SessionController::new(
            YukiConfig::default(),
            Arc::new(backend.clone()),
            Arc::new(connector.clone()),
            Arc::new(credential),
        )
        .with_runtime_events(tx);
        Harness {
            controller,
            backend,
            connector,
            events,
        }
    }

    impl Harness {
        async fn pump(&mut self) -> SessionEvent {
            let event = tokio::time::timeout(Duration::from_secs(1), self.controller.next_session_event())
                .await
                .expect("session event");
            self.controller.handle_session_event(event.clone());
            event
        }

        async fn activate(&mut self) {
            self.controller.start().unwrap();
            self.connector.emit(TransportEvent::Opened);
            assert_eq!(self.pump().await, SessionEvent::Transport(TransportEvent::Opened));
            assert_eq!(self.controller.state(), SessionState::Active);
        }

        fn drain_events(&mut self) -> Vec<RuntimeEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }
    }

    fn speech(samples: usize) -> TransportEvent {
        TransportEvent::Audio(InboundChunk {
            data: encode_base64(&pcm16_to_bytes(&vec![2000_i16; samples])),
            mime_type: Some("audio/pcm;rate=24000".into()),
        })
    }

    fn mic_block(samples: usize) -> RawAudio {
        RawAudio {
            samples: vec![0.1; samples],
            sample_rate: 16_000,
            channels: 1,
        }
    }

    #[tokio::test]
    async fn happy_path_speaks_then_returns_to_happy() {
        let mut h = harness();
        h.controller.start().unwrap();
        assert_eq!(h.controller.state(), SessionState::Connecting);
        assert_eq!(h.controller.emotion(), Emotion::Thinking);
        assert_eq!(h.connector.open_count(), 1);
        let connect = h.connector.last_config().unwrap();
        assert_eq!(connect.system_instruction, YukiConfig::default().persona.live_instruction);

        h.connector.emit(TransportEvent::Opened);
        h.pump().await;
        assert_eq!(h.controller.state(), SessionState::Active);
        assert_eq!(h.controller.emotion(), Emotion::Happy);
        assert!(h.backend.microphone().unwrap().is_live());

        h.connector.emit(speech(2400));
        h.pump().await;
        assert_eq!(h.controller.emotion(), Emotion::Speaking);
        assert_eq!(h.controller.queued_sources(), 1);

        h.backend.output().unwrap().finish_all();
        assert!(matches!(h.pump().await, SessionEvent::Playback(PlaybackEvent::Ended(_))));
        assert_eq!(h.controller.emotion(), Emotion::Happy);

        let events = h.drain_events();
        assert_eq!(
            events,
            vec![
                RuntimeEvent::StateChanged(SessionState::Connecting),
                RuntimeEvent::EmotionChanged(Emotion::Thinking),
                RuntimeEvent::StateChanged(SessionState::Active),
                RuntimeEvent::EmotionChanged(Emotion::Happy),
                RuntimeEvent::EmotionChanged(Emotion::Speaking),
                RuntimeEvent::EmotionChanged(Emotion::Happy),
            ]
        );
    }

    #[tokio::test]
    async fn emotion_stays_speaking_until_last_source_ends() {
        let mut h = harness();
        h.activate().await;
        h.connector.emit(speech(2400));
        h.pump().await;
        h.connector.emit(speech(2400));
        h.pump().await;

        let output = h.backend.output().unwrap();
        let ids = output.scheduled_ids();
        output.finish(ids[0]);
        h.pump().await;
        assert_eq!(h.controller.emotion(), Emotion::Speaking);
        output.finish(ids[1]);
        h.pump().await;
        assert_eq!(h.controller.emotion(), Emotion::Happy);
    }

    #[tokio::test]
    async fn inbound_chunks_are_scheduled_gaplessly() {
        let mut h = harness();
        h.activate().await;
        for samples in [2400, 4800, 1200] {
            h.connector.emit(speech(samples));
            h.pump().await;
        }
        let scheduled = h.backend.output().unwrap().scheduled();
        assert_eq!(scheduled.len(), 3);
        for pair in scheduled.windows(2) {
            let (_, start, duration) = pair[0];
            let (_, next_start, _) = pair[1];
            assert!((next_start - (start + duration)).abs() < 1e-12);
        }
    }

    #[tokio::test]
    async fn barge_in_empties_queue_and_zeroes_cursor() {
        let mut h = harness();
        h.activate().await;
        h.connector.emit(speech(24_000));
        h.pump().await;
        h.connector.emit(speech(24_000));
        h.pump().await;
        assert_eq!(h.controller.queued_sources(), 2);

        h.connector.emit(TransportEvent::Interrupted);
        h.pump().await;

        assert_eq!(h.controller.queued_sources(), 0);
        assert_eq!(h.controller.playback_cursor(), Some(0.0));
        assert!(h.backend.output().unwrap().sounding().is_empty());
        assert_eq!(h.controller.emotion(), Emotion::Happy);
        assert_eq!(h.controller.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn permission_denied_stays_idle_without_opening_transport() {
        let backend = FakeBackend::new();
        backend.deny_microphone();
        let mut h = harness_with(backend, StaticCredential::new("test-key"));

        let err = h.controller.start().unwrap_err();
        assert!(matches!(err, YukiError::PermissionDenied(_)));
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert!(h.controller.last_error().is_some());
        assert_eq!(h.connector.open_count(), 0);
        assert_eq!(h.backend.output_opens(), 0);

        let events = h.drain_events();
        assert!(matches!(events.as_slice(), [RuntimeEvent::Error(_)]));
    }

    #[tokio::test]
    async fn missing_credential_stays_idle() {
        let mut h = harness_with(FakeBackend::new(), StaticCredential::missing());
        assert!(matches!(h.controller.start(), Err(YukiError::Credential(_))));
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.backend.mic_opens(), 0);
        assert_eq!(h.connector.open_count(), 0);
    }

    #[tokio::test]
    async fn output_failure_releases_microphone() {
        let backend = FakeBackend::new();
        backend.fail_output();
        let mut h = harness_with(backend, StaticCredential::new("test-key"));
        assert!(h.controller.start().is_err());
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.backend.microphone().unwrap().stop_calls(), 1);
        assert_eq!(h.connector.open_count(), 0);
    }

    #[tokio::test]
    async fn remote_close_tears_everything_down() {
        let mut h = harness();
        h.activate().await;
        h.connector.emit(speech(24_000));
        h.pump().await;
        h.drain_events();

        h.connector.emit(TransportEvent::Closed);
        h.pump().await;

        let mic = h.backend.microphone().unwrap();
        assert!(!mic.is_live());
        assert_eq!(mic.stop_calls(), 1);
        assert!(h.backend.output().unwrap().is_closed());
        assert!(h.connector.is_cancelled());
        assert_eq!(h.controller.emotion(), Emotion::Happy);
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(
            h.drain_events(),
            vec![
                RuntimeEvent::StateChanged(SessionState::Closing),
                RuntimeEvent::EmotionChanged(Emotion::Happy),
                RuntimeEvent::StateChanged(SessionState::Idle),
            ]
        );
    }

    #[tokio::test]
    async fn transport_error_while_connecting_settles_idle() {
        let mut h = harness();
        h.controller.start().unwrap();
        h.drain_events();

        h.connector.emit(TransportEvent::Error("connection refused".into()));
        h.pump().await;

        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.controller.last_error(), Some("connection refused"));
        assert_eq!(h.backend.microphone().unwrap().stop_calls(), 1);
        assert_eq!(
            h.drain_events(),
            vec![
                RuntimeEvent::StateChanged(SessionState::Errored),
                RuntimeEvent::Error("connection refused".into()),
                RuntimeEvent::EmotionChanged(Emotion::Happy),
                RuntimeEvent::StateChanged(SessionState::Idle),
            ]
        );

        // Retrying clears the error.
        h.controller.start().unwrap();
        assert_eq!(h.controller.last_error(), None);
        assert_eq!(h.drain_events()[0], RuntimeEvent::ErrorCleared);
        assert_eq!(h.connector.open_count(), 2);
    }

    #[tokio::test]
    async fn close_before_open_is_a_connection_failure() {
        let mut h = harness();
        h.controller.start().unwrap();
        h.connector.emit(TransportEvent::Closed);
        h.pump().await;

        assert_eq!(h.controller.state(), SessionState::Idle);
        assert!(h.controller.last_error().is_some());
        assert_eq!(h.backend.microphone().unwrap().stop_calls(), 1);
        assert!(
            h.drain_events()
                .contains(&RuntimeEvent::StateChanged(SessionState::Errored))
        );
    }

    #[tokio::test]
    async fn capture_frames_are_sent_in_order() {
        let mut h = harness();
        h.activate().await;
        let mic = h.backend.microphone().unwrap();
        mic.push(mic_block(3 * 4096 + 100));
        mic.push(mic_block(4096));

        for _ in 0..4 {
            assert!(matches!(h.pump().await, SessionEvent::Capture(_)));
        }
        let sent: Vec<u64> = h.connector.sent().iter().map(|c| c.seq).collect();
        assert_eq!(sent, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn malformed_chunk_is_dropped_and_session_continues() {
        let mut h = harness();
        h.activate().await;
        h.connector.emit(TransportEvent::Audio(InboundChunk {
            data: "!!!".into(),
            mime_type: None,
        }));
        h.pump().await;
        assert_eq!(h.controller.state(), SessionState::Active);
        assert_eq!(h.controller.queued_sources(), 0);
        assert_eq!(h.controller.emotion(), Emotion::Happy);

        h.connector.emit(speech(2400));
        h.pump().await;
        assert_eq!(h.controller.queued_sources(), 1);
    }

    #[tokio::test]
    async fn stop_on_idle_touches_nothing() {
        let mut h = harness();
        h.controller.stop();
        h.controller.stop();
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.backend.mic_opens(), 0);
        assert_eq!(h.backend.output_opens(), 0);
        assert!(h.drain_events().is_empty());
    }

    #[tokio::test]
    async fn user_stop_releases_microphone_synchronously() {
        let mut h = harness();
        h.activate().await;
        h.controller.stop();
        assert!(!h.backend.microphone().unwrap().is_live());
        assert!(h.connector.is_cancelled());
        assert_eq!(h.controller.state(), SessionState::Idle);
        h.controller.stop();
        assert_eq!(h.backend.microphone().unwrap().stop_calls(), 1);
    }

    #[tokio::test]
    async fn start_while_running_is_a_no_op() {
        let mut h = harness();
        h.activate().await;
        h.controller.start().unwrap();
        assert_eq!(h.connector.open_count(), 1);
        assert_eq!(h.backend.mic_opens(), 1);
    }

    #[tokio::test]
    async fn run_loop_follows_commands() {
        let h = harness();
        let Harness {
            controller,
            backend,
            connector,
            mut events,
        } = h;
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(controller.run(rx, cancel.clone()));

        async fn wait_for(events: &mut broadcast::Receiver<RuntimeEvent>, want: RuntimeEvent) {
            tokio::time::timeout(Duration::from_secs(1), async {
                loop {
                    if events.recv().await.unwrap() == want {
                        return;
                    }
                }
            })
            .await
            .expect("runtime event");
        }

        tx.send(SessionCommand::Toggle).unwrap();
        wait_for(&mut events, RuntimeEvent::StateChanged(SessionState::Connecting)).await;
        connector.emit(TransportEvent::Opened);
        wait_for(&mut events, RuntimeEvent::StateChanged(SessionState::Active)).await;

        tx.send(SessionCommand::Toggle).unwrap();
        wait_for(&mut events, RuntimeEvent::StateChanged(SessionState::Idle)).await;
        assert!(!backend.microphone().unwrap().is_live());

        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}
