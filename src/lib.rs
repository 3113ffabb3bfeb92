//! Yuki: a live voice companion backed by a generative-AI persona.
//!
//! The centre of the crate is the live session, a bidirectional audio
//! stream over a WebSocket:
//! Microphone → frames → transport → model → audio chunks → Speaker
//!
//! # Architecture
//!
//! - **Audio capture**: Records from the microphone via `cpal` and cuts
//!   fixed-size 16 kHz PCM frames
//! - **Transport**: Streams frames to the live model and surfaces its audio,
//!   interruption and turn events
//! - **Playback**: Schedules returned audio back to back on the output clock
//!   and drops everything on barge-in
//! - **Session**: A single task that owns all of the above and drives the
//!   Idle → Connecting → Active → Closing state machine
//!
//! Next to the live session sit the one-shot [`modes`]: grounded chat, image
//! generation, editing and analysis, and transcription.

pub mod audio;
pub mod config;
pub mod credentials;
pub mod error;
pub mod modes;
pub mod runtime;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::YukiConfig;
pub use error::{Result, YukiError};
pub use modes::AppMode;
pub use runtime::RuntimeEvent;
pub use session::{Emotion, SessionCommand, SessionController, SessionState};
