//! Credential storage for provider tokens.
//!
//! Tokens never touch the database. In production they live in the OS
//! keychain (Keychain on macOS, Credential Manager on Windows, Secret Service
//! on Linux); tests use the in-memory store.

use std::collections::HashMap;
use std::sync::Mutex;

use keyring::Entry;

use crate::error::AppError;
use crate::models::settings::normalize_url;

/// Service name used in the keychain.
const SERVICE_NAME: &str = "pr-beacon";

/// Token storage keyed by provider base URL.
pub trait CredentialStore: Send + Sync {
    /// Store a token for a provider endpoint, replacing any previous one.
    fn store_token(&self, base_url: &str, token: &str) -> Result<(), AppError>;

    /// Retrieve the token for a provider endpoint.
    ///
    /// Fails with `NotFound` when nothing is stored.
    fn get_token(&self, base_url: &str) -> Result<String, AppError>;

    /// Delete the token. Deleting a missing token is not an error.
    fn delete_token(&self, base_url: &str) -> Result<(), AppError>;

    /// Whether a token is stored.
    fn has_token(&self, base_url: &str) -> Result<bool, AppError> {
        match self.get_token(base_url) {
            Ok(_) => Ok(true),
            Err(AppError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// OS keychain backed store.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringCredentialStore;

impl KeyringCredentialStore {
    fn entry(base_url: &str) -> Result<Entry, AppError> {
        Entry::new(SERVICE_NAME, &account_for(base_url)).map_err(|e| {
            AppError::credential_storage(format!("Failed to create keyring entry: {}", e))
        })
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn store_token(&self, base_url: &str, token: &str) -> Result<(), AppError> {
        Self::entry(base_url)?
            .set_password(token)
            .map_err(|e| AppError::credential_storage(format!("Failed to store token: {}", e)))
    }

    fn get_token(&self, base_url: &str) -> Result<String, AppError> {
        Self::entry(base_url)?.get_password().map_err(|e| match e {
            keyring::Error::NoEntry => AppError::not_found_with_id("credential", base_url),
            _ => AppError::credential_storage(format!("Failed to retrieve token: {}", e)),
        })
    }

    fn delete_token(&self, base_url: &str) -> Result<(), AppError> {
        match Self::entry(base_url)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(AppError::credential_storage(format!(
                "Failed to delete token: {}",
                e
            ))),
        }
    }
}

/// Process-local store for tests and headless runs.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    tokens: Mutex<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, AppError> {
        self.tokens
            .lock()
            .map_err(|_| AppError::credential_storage("Credential store poisoned"))
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn store_token(&self, base_url: &str, token: &str) -> Result<(), AppError> {
        self.lock()?
            .insert(account_for(base_url), token.to_string());
        Ok(())
    }

    fn get_token(&self, base_url: &str) -> Result<String, AppError> {
        self.lock()?
            .get(&account_for(base_url))
            .cloned()
            .ok_or_else(|| AppError::not_found_with_id("credential", base_url))
    }

    fn delete_token(&self, base_url: &str) -> Result<(), AppError> {
        self.lock()?.remove(&account_for(base_url));
        Ok(())
    }
}

/// Account identifier for a base URL: trailing slashes dropped, lowercased.
fn account_for(base_url: &str) -> String {
    normalize_url(base_url).to_lowercase()
}
