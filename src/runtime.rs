//! Runtime events emitted by the live session for the presentation layer.
//!
//! Events are small and sent over a broadcast channel so the session loop
//! never waits on a slow or absent listener.

use crate::session::state::{Emotion, SessionState};
use tokio::sync::broadcast;

/// Capacity of the runtime event channel created by [`channel`].
pub const RUNTIME_EVENT_CAPACITY: usize = 64;

/// What the live session is doing "right now".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// Lifecycle state changed.
    StateChanged(SessionState),
    /// Derived persona emotion changed.
    EmotionChanged(Emotion),
    /// A user-visible, dismissible error message.
    Error(String),
    /// The previous error message no longer applies.
    ErrorCleared,
}

/// Create a runtime event channel.
pub fn channel() -> (broadcast::Sender<RuntimeEvent>, broadcast::Receiver<RuntimeEvent>) {
    broadcast::channel(RUNTIME_EVENT_CAPACITY)
}
