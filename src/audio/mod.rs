//! Audio capture, playback scheduling and the codec between them.

pub mod capture;
pub mod codec;
pub mod device;
pub mod playback;

use crate::config::AudioConfig;
use crate::error::Result;
use capture::Microphone;
use playback::{OutputDevice, PlaybackEvent};
use tokio::sync::mpsc;

/// Platform capability that hands out the devices a session owns.
pub trait AudioBackend: Send + Sync {
    /// Acquire the microphone. This is the permission step.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::YukiError::PermissionDenied`] when access is
    /// refused or no input device exists.
    fn open_microphone(&self, config: &AudioConfig) -> Result<Box<dyn Microphone>>;

    /// Open the output device; end-of-source notifications go to `events`.
    ///
    /// # Errors
    ///
    /// Returns an error if no output device can be opened.
    fn open_output(
        &self,
        config: &AudioConfig,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Result<Box<dyn OutputDevice>>;
}
