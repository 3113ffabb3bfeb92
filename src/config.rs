//! Configuration types for the live session and the one-shot modes.

use crate::audio::codec::{CAPTURE_FRAME_SAMPLES, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct YukiConfig {
    /// Audio capture/playback settings.
    pub audio: AudioConfig,
    /// Live (streaming voice) session settings.
    pub live: LiveConfig,
    /// Persona instructions shared by every mode.
    pub persona: PersonaConfig,
    /// One-shot generateContent backend settings.
    pub backend: BackendConfig,
}

/// Audio I/O configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate of outbound microphone chunks in Hz.
    pub input_sample_rate: u32,
    /// Sample rate of inbound assistant audio in Hz.
    pub output_sample_rate: u32,
    /// Samples per outbound capture frame.
    pub frame_samples: usize,
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: INPUT_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            frame_samples: CAPTURE_FRAME_SAMPLES,
            input_device: None,
            output_device: None,
        }
    }
}

/// Live session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Model identifier for the bidirectional audio session.
    pub model: String,
    /// Prebuilt voice used for assistant speech.
    pub voice: String,
    /// WebSocket endpoint of the BidiGenerateContent service.
    pub endpoint: String,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash-native-audio-preview-12-2025".to_owned(),
            voice: "Kore".to_owned(),
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_owned(),
        }
    }
}

/// Persona configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    /// Display name of the assistant.
    pub name: String,
    /// System instruction for the live voice session.
    pub live_instruction: String,
    /// System instruction for text chat.
    pub chat_instruction: String,
    /// System instruction for image analysis.
    pub analyze_instruction: String,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: "Yuki".to_owned(),
            live_instruction: "You are Yuki, a cheerful and helpful anime girl voice assistant. \
                Be concise, expressive, and use occasional Japanese honorifics like -kun or -chan \
                appropriately. Always remain in character."
                .to_owned(),
            chat_instruction: "You are Yuki, a helpful anime assistant. Use occasional Japanese \
                suffixes. If search results are provided, cite them."
                .to_owned(),
            analyze_instruction: "You are Yuki, a visual expert. Describe images with \
                enthusiasm and detail."
                .to_owned(),
        }
    }
}

/// Settings for the one-shot (non-streaming) modes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the REST API (no trailing slash).
    pub base_url: String,
    /// Model used for grounded text chat.
    pub chat_model: String,
    /// Model used for text-to-image generation.
    pub image_model: String,
    /// Model used for image editing.
    pub edit_model: String,
    /// Model used for image analysis.
    pub analyze_model: String,
    /// Model used for audio transcription.
    pub transcribe_model: String,
    /// Thinking budget (tokens) when deep-thinking chat is requested.
    pub thinking_budget: u32,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_owned(),
            chat_model: "gemini-3-pro-preview".to_owned(),
            image_model: "gemini-3-pro-image-preview".to_owned(),
            edit_model: "gemini-2.5-flash-image".to_owned(),
            analyze_model: "gemini-3-pro-preview".to_owned(),
            transcribe_model: "gemini-3-flash-preview".to_owned(),
            thinking_budget: 32_768,
            timeout_secs: 120,
        }
    }
}

impl YukiConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::YukiError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::YukiError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/yuki/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("yuki")
            .join("config.toml")
    }
}
