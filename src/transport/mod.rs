//! Streaming transport to the remote inference service.
//!
//! A [`Connector`] opens a duplex session and immediately returns a
//! [`TransportHandle`]. Outbound chunks submitted through the handle are
//! queued until the session is open and then sent in submission order.
//! Everything the remote side does arrives as a typed [`TransportEvent`].

pub mod gemini;
pub mod wire;

use crate::config::YukiConfig;
use crate::error::{Result, YukiError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One encoded capture frame on its way to the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundChunk {
    /// Capture order, starting at 0 for each session.
    pub seq: u64,
    /// Base64 little-endian PCM16.
    pub data: String,
    /// MIME type, e.g. `audio/pcm;rate=16000`.
    pub mime_type: String,
}

/// One segment of assistant speech as received from the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundChunk {
    /// Base64 little-endian PCM16.
    pub data: String,
    /// MIME type reported by the server, if any.
    pub mime_type: Option<String>,
}

/// Events delivered by a transport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The session is ready to accept audio.
    Opened,
    /// An assistant audio chunk.
    Audio(InboundChunk),
    /// The user started speaking over the assistant.
    Interrupted,
    /// The assistant finished its turn.
    TurnComplete,
    /// The connection failed or the server reported an error.
    Error(String),
    /// The remote side closed the session.
    Closed,
}

/// Parameters for opening a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveConnectConfig {
    /// Model identifier.
    pub model: String,
    /// Prebuilt voice name.
    pub voice: String,
    /// Persona system instruction.
    pub system_instruction: String,
    /// WebSocket endpoint.
    pub endpoint: String,
}

impl LiveConnectConfig {
    /// Build the connect parameters from the application config.
    pub fn from_config(config: &YukiConfig) -> Self {
        Self {
            model: config.live.model.clone(),
            voice: config.live.voice.clone(),
            system_instruction: config.persona.live_instruction.clone(),
            endpoint: config.live.endpoint.clone(),
        }
    }
}

/// Opens transport sessions.
pub trait Connector: Send + Sync {
    /// Start opening a session. Returns at once; progress arrives as events.
    fn open(&self, config: LiveConnectConfig) -> TransportHandle;
}

/// The caller's side of a transport session.
#[derive(Debug)]
pub struct TransportHandle {
    outbound: mpsc::UnboundedSender<OutboundChunk>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    cancel: CancellationToken,
    closed: bool,
}

/// The connection side of a transport session, handed to the task that
/// owns the socket.
#[derive(Debug)]
pub struct TransportEndpoint {
    /// Chunks submitted by the caller, in submission order.
    pub outbound: mpsc::UnboundedReceiver<OutboundChunk>,
    /// Events for the caller.
    pub events: mpsc::UnboundedSender<TransportEvent>,
    /// Cancelled when the caller closes the session.
    pub cancel: CancellationToken,
}

impl TransportHandle {
    /// Create a connected handle/endpoint pair.
    pub fn pair() -> (Self, TransportEndpoint) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = Self {
            outbound: outbound_tx,
            events: events_rx,
            cancel: cancel.clone(),
            closed: false,
        };
        let endpoint = TransportEndpoint {
            outbound: outbound_rx,
            events: events_tx,
            cancel,
        };
        (handle, endpoint)
    }

    /// Queue one chunk for transmission. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`YukiError::Transport`] if the session is closed, or
    /// [`YukiError::Channel`] if the connection task is gone.
    pub fn send(&self, chunk: OutboundChunk) -> Result<()> {
        if self.closed {
            return Err(YukiError::Transport("session closed".into()));
        }
        self.outbound
            .send(chunk)
            .map_err(|_| YukiError::Channel("connection task has exited".into()))
    }

    /// Wait for the next inbound event. Cancel-safe.
    ///
    /// Returns `None` once the connection task has exited and every event
    /// has been drained.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Terminate the session. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel.cancel();
        self.events.close();
        debug!("transport handle closed");
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        self.close();
    }
}
