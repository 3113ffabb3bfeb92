//! API key capability used by the live session and the one-shot modes.
//!
//! The session only asks two things of a provider: whether a key is
//! available, and to obtain one if not. Network adapters additionally read
//! the key itself.
//!
//! - [`StaticCredential`]: a key supplied up front (tests, `--api-key`)
//! - [`EnvCredential`]: `GEMINI_API_KEY`, then `API_KEY`
//! - [`KeyringCredential`]: the platform credential store, with an
//!   interactive prompt when empty

mod keystore;

pub use keystore::KeyringCredential;

use crate::error::{Result, YukiError};

/// Environment variables consulted by [`EnvCredential`], in order.
pub const API_KEY_ENV_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

/// Source of the backend API key.
pub trait CredentialProvider: Send + Sync {
    /// Whether a key is available without user interaction.
    fn has_credential(&self) -> bool;

    /// Ask the user (or platform) to provide a key.
    ///
    /// # Errors
    ///
    /// Returns [`YukiError::Credential`] if no key could be obtained.
    fn request_credential(&self) -> Result<()>;

    /// The key to send with requests.
    ///
    /// # Errors
    ///
    /// Returns [`YukiError::Credential`] if no key is available.
    fn api_key(&self) -> Result<String>;
}

/// Make sure `provider` holds a key, prompting once if it does not.
///
/// # Errors
///
/// Returns [`YukiError::Credential`] if the prompt does not yield a key.
pub fn ensure_credential(provider: &dyn CredentialProvider) -> Result<()> {
    if provider.has_credential() {
        return Ok(());
    }
    provider.request_credential()?;
    if provider.has_credential() {
        Ok(())
    } else {
        Err(YukiError::Credential("no API key was provided".into()))
    }
}

/// A fixed key.
#[derive(Debug, Clone)]
pub struct StaticCredential {
    key: Option<String>,
}

impl StaticCredential {
    /// Wrap an explicit key.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
        }
    }

    /// A provider that never has a key.
    pub fn missing() -> Self {
        Self { key: None }
    }
}

impl CredentialProvider for StaticCredential {
    fn has_credential(&self) -> bool {
        self.key.as_deref().is_some_and(|k| !k.is_empty())
    }

    fn request_credential(&self) -> Result<()> {
        if self.has_credential() {
            Ok(())
        } else {
            Err(YukiError::Credential("no API key configured".into()))
        }
    }

    fn api_key(&self) -> Result<String> {
        self.key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| YukiError::Credential("no API key configured".into()))
    }
}

/// Reads the key from the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvCredential;

impl EnvCredential {
    fn lookup() -> Option<String> {
        API_KEY_ENV_VARS
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .find(|value| !value.trim().is_empty())
    }
}

impl CredentialProvider for EnvCredential {
    fn has_credential(&self) -> bool {
        Self::lookup().is_some()
    }

    fn request_credential(&self) -> Result<()> {
        if self.has_credential() {
            Ok(())
        } else {
            Err(YukiError::Credential(format!(
                "set {} to your API key",
                API_KEY_ENV_VARS[0]
            )))
        }
    }

    fn api_key(&self) -> Result<String> {
        Self::lookup().ok_or_else(|| {
            YukiError::Credential(format!("{} is not set", API_KEY_ENV_VARS.join(" or ")))
        })
    }
}
