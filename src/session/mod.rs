//! Live voice session lifecycle.

pub mod controller;
pub mod state;

pub use controller::{SessionCommand, SessionController, SessionEvent};
pub use state::{Emotion, SessionState};
