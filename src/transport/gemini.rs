//! Live session over the BidiGenerateContent WebSocket.
//!
//! One task per session owns the socket. Chunks sent before the server
//! acknowledges the setup message stay in the handle's queue and are
//! flushed in order once it does.

use crate::credentials::CredentialProvider;
use crate::error::{Result, YukiError};
use crate::transport::wire::{self, ClientMessage};
use crate::transport::{Connector, LiveConnectConfig, TransportEndpoint, TransportEvent, TransportHandle};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Opens live sessions against the Gemini Live API.
#[derive(Clone)]
pub struct GeminiLiveConnector {
    credentials: Arc<dyn CredentialProvider>,
}

impl GeminiLiveConnector {
    /// Create a connector that authenticates with `credentials`.
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        Self { credentials }
    }
}

impl Connector for GeminiLiveConnector {
    fn open(&self, config: LiveConnectConfig) -> TransportHandle {
        let (handle, endpoint) = TransportHandle::pair();
        match self.credentials.api_key() {
            Ok(key) => {
                tokio::spawn(run_session(config, key, endpoint));
            }
            Err(e) => {
                let _ = endpoint.events.send(TransportEvent::Error(e.to_string()));
            }
        }
        handle
    }
}

/// Build the socket URL with the key as a query parameter.
///
/// # Errors
///
/// Returns [`YukiError::Config`] if the endpoint is not a valid URL.
pub fn session_url(endpoint: &str, api_key: &str) -> Result<url::Url> {
    let mut url = url::Url::parse(endpoint)
        .map_err(|e| YukiError::Config(format!("invalid live endpoint '{endpoint}': {e}")))?;
    url.query_pairs_mut().append_pair("key", api_key);
    Ok(url)
}

async fn run_session(config: LiveConnectConfig, api_key: String, mut endpoint: TransportEndpoint) {
    let events = endpoint.events.clone();
    match drive(&config, &api_key, &mut endpoint).await {
        Ok(Ending::Cancelled) => debug!("live session closed locally"),
        Ok(Ending::RemoteClosed) => {
            info!("live session closed by server");
            let _ = events.send(TransportEvent::Closed);
        }
        Err(e) => {
            warn!("live session failed: {e}");
            let _ = events.send(TransportEvent::Error(e.to_string()));
        }
    }
}

enum Ending {
    Cancelled,
    RemoteClosed,
}

async fn drive(
    config: &LiveConnectConfig,
    api_key: &str,
    endpoint: &mut TransportEndpoint,
) -> Result<Ending> {
    let url = session_url(&config.endpoint, api_key)?;

    let (ws_stream, _) = tokio::select! {
        _ = endpoint.cancel.cancelled() => return Ok(Ending::Cancelled),
        result = connect_async(url.as_str()) => {
            result.map_err(|e| YukiError::Transport(format!("connect: {e}")))?
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let setup = ClientMessage::setup(config).to_json()?;
    write
        .send(Message::Text(setup))
        .await
        .map_err(|e| YukiError::Transport(format!("send setup: {e}")))?;
    info!(model = %config.model, voice = %config.voice, "live setup sent");

    let mut opened = false;
    let mut sent: u64 = 0;

    loop {
        tokio::select! {
            _ = endpoint.cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                debug!(sent, "live socket closed");
                return Ok(Ending::Cancelled);
            }
            msg = read.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            debug!("ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(frame) = frame
                            && frame.code != tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::Normal
                        {
                            return Err(YukiError::Transport(format!(
                                "closed by server: {} {}",
                                frame.code, frame.reason
                            )));
                        }
                        return Ok(Ending::RemoteClosed);
                    }
                    None => return Ok(Ending::RemoteClosed),
                    Some(Err(e)) => return Err(YukiError::Transport(format!("read: {e}"))),
                    Some(Ok(_)) => continue,
                };
                let parsed = match wire::parse_server_message(&text) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        debug!("ignoring unparseable server message: {e}");
                        continue;
                    }
                };
                for event in parsed {
                    if event == TransportEvent::Opened {
                        if opened {
                            continue;
                        }
                        opened = true;
                        info!("live session open");
                    }
                    if endpoint.events.send(event).is_err() {
                        // Nobody is listening any more.
                        return Ok(Ending::Cancelled);
                    }
                }
            }
            Some(chunk) = endpoint.outbound.recv(), if opened => {
                let json = ClientMessage::audio(&chunk).to_json()?;
                write
                    .send(Message::Text(json))
                    .await
                    .map_err(|e| YukiError::Transport(format!("send: {e}")))?;
                sent += 1;
            }
        }
    }
}
