//! Session lifecycle states and the persona emotion derived from them.

use std::fmt;

/// Lifecycle of a live session.
///
/// `Idle → Connecting → Active → Closing → Idle`, with `Errored` reachable
/// from `Connecting` or `Active` and always settling back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Active,
    Closing,
    Errored,
}

impl SessionState {
    /// Whether a session currently owns devices and a transport.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Active)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Persona emotion shown by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Emotion {
    #[default]
    Happy,
    Thinking,
    Speaking,
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Happy => "happy",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
        };
        f.write_str(name)
    }
}
