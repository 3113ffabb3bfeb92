//! API key stored in the platform credential store via `keyring`.
//!
//! - **macOS**: Keychain
//! - **Linux**: Secret Service (GNOME Keyring, KWallet)
//! - **Windows**: Credential Manager

use super::{CredentialProvider, EnvCredential};
use crate::error::{Result, YukiError};
use std::sync::Mutex;
use tracing::info;

/// Service name for yuki entries in the platform credential store.
const SERVICE_NAME: &str = "yuki-credentials";

/// Account name under which the backend key is stored.
const ACCOUNT: &str = "gemini.api_key";

/// Key from the environment if set, else from the platform keyring.
///
/// [`request_credential`](CredentialProvider::request_credential) prompts on
/// the terminal and stores the answer.
pub struct KeyringCredential {
    account: String,
    cached: Mutex<Option<String>>,
}

impl KeyringCredential {
    /// Provider for the default account.
    #[must_use]
    pub fn new() -> Self {
        Self::with_account(ACCOUNT)
    }

    /// Provider for a specific account name.
    #[must_use]
    pub fn with_account(account: &str) -> Self {
        Self {
            account: account.to_owned(),
            cached: Mutex::new(None),
        }
    }

    fn entry(&self) -> Result<keyring::Entry> {
        keyring::Entry::new(SERVICE_NAME, &self.account)
            .map_err(|e| YukiError::Credential(format!("failed to create keyring entry: {e}")))
    }

    /// Store `value` in the keyring.
    ///
    /// # Errors
    ///
    /// Returns [`YukiError::Credential`] if the platform store fails.
    pub fn store(&self, value: &str) -> Result<()> {
        self.entry()?
            .set_password(value)
            .map_err(|e| YukiError::Credential(format!("failed to store credential: {e}")))?;
        if let Ok(mut cached) = self.cached.lock() {
            *cached = Some(value.to_owned());
        }
        info!("API key stored in platform keyring");
        Ok(())
    }

    /// Remove the stored key. Deleting a missing entry succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`YukiError::Credential`] if the platform store fails.
    pub fn delete(&self) -> Result<()> {
        if let Ok(mut cached) = self.cached.lock() {
            *cached = None;
        }
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(YukiError::Credential(format!(
                "failed to delete credential: {e}"
            ))),
        }
    }

    fn lookup(&self) -> Result<Option<String>> {
        if let Ok(cached) = self.cached.lock()
            && let Some(key) = cached.as_ref()
        {
            return Ok(Some(key.clone()));
        }
        if let Ok(key) = EnvCredential.api_key() {
            return Ok(Some(key));
        }
        match self.entry()?.get_password() {
            Ok(key) => {
                if let Ok(mut cached) = self.cached.lock() {
                    *cached = Some(key.clone());
                }
                Ok(Some(key))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(YukiError::Credential(format!(
                "failed to retrieve credential: {e}"
            ))),
        }
    }
}

impl Default for KeyringCredential {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialProvider for KeyringCredential {
    fn has_credential(&self) -> bool {
        matches!(self.lookup(), Ok(Some(_)))
    }

    fn request_credential(&self) -> Result<()> {
        let key: String = dialoguer::Password::new()
            .with_prompt("Gemini API key")
            .interact()
            .map_err(|e| YukiError::Credential(format!("prompt failed: {e}")))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(YukiError::Credential("empty API key".into()));
        }
        self.store(key)
    }

    fn api_key(&self) -> Result<String> {
        self.lookup()?
            .ok_or_else(|| YukiError::Credential("no API key stored; run `yuki key`".into()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn cached_key_is_used_first() {
        let cred = KeyringCredential::with_account("yuki.test.cached");
        *cred.cached.lock().unwrap() = Some("cached-key".into());
        assert!(cred.has_credential());
        assert_eq!(cred.api_key().unwrap(), "cached-key");
    }

    // Requires platform credential store access.
    #[test]
    #[ignore]
    fn store_retrieve_delete_integration() {
        let cred = KeyringCredential::with_account("yuki.test.integration");
        let _ = cred.delete();

        cred.store("test-secret-12345").expect("store");
        let fresh = KeyringCredential::with_account("yuki.test.integration");
        assert_eq!(fresh.lookup().expect("lookup"), Some("test-secret-12345".into()));

        fresh.delete().expect("delete");
        fresh.delete().expect("delete twice");
    }
}
