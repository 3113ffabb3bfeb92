//! The one-shot modes next to the live voice session.
//!
//! Each is a single request/response against the same backend; none of them
//! stream, schedule, or run concurrently with anything else.

pub mod chat;
pub mod client;
pub mod image;
pub mod transcribe;

pub use chat::{ChatMode, ChatReply, GroundingLink};
pub use client::GenerativeClient;
pub use image::{ImageInput, ImageMode, ImageResult, ImageSize};
pub use transcribe::{AudioClip, TranscribeMode};

use std::fmt;

/// The six ways of talking to the persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AppMode {
    #[default]
    Live,
    Chat,
    ImageGen,
    ImageEdit,
    Analyze,
    Transcript,
}

impl AppMode {
    pub const ALL: [AppMode; 6] = [
        AppMode::Live,
        AppMode::Chat,
        AppMode::ImageGen,
        AppMode::ImageEdit,
        AppMode::Analyze,
        AppMode::Transcript,
    ];

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Live => "Live voice",
            Self::Chat => "Chat",
            Self::ImageGen => "Image generation",
            Self::ImageEdit => "Image editing",
            Self::Analyze => "Image analysis",
            Self::Transcript => "Transcription",
        }
    }

    /// Only the live mode streams.
    pub fn is_streaming(self) -> bool {
        self == Self::Live
    }
}

impl fmt::Display for AppMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
