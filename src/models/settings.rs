//! Polling preferences and provider configuration.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::pull_request::ProviderKind;
use super::snapshot::PinnedTab;

/// Default polling interval in minutes.
pub const DEFAULT_INTERVAL_MINUTES: u32 = 5;

/// Shortest allowed polling interval in minutes.
pub const MIN_INTERVAL_MINUTES: u32 = 1;

/// User display preferences that affect polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollingSettings {
    /// Minutes between polling cycles.
    pub interval_minutes: u32,

    /// List whose size is shown on the badge.
    pub pinned_tab: PinnedTab,
}

impl PollingSettings {
    /// Interval with the one-minute floor applied.
    pub fn effective_interval_minutes(&self) -> u32 {
        self.interval_minutes.max(MIN_INTERVAL_MINUTES)
    }

    /// Interval as a duration.
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.effective_interval_minutes()) * 60)
    }
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            pinned_tab: PinnedTab::MyPrs,
        }
    }
}

/// Credential input handed over by onboarding.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub kind: ProviderKind,

    /// API base URL (e.g., `https://api.github.com`).
    pub base_url: String,

    /// Opaque bearer token.
    pub token: String,
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind, base_url: Option<&str>, token: impl Into<String>) -> Self {
        let base_url = base_url
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .unwrap_or(kind.default_base_url());

        Self {
            kind,
            base_url: normalize_url(base_url),
            token: token.into(),
        }
    }
}

// Keeps the token out of logs.
impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Provider configuration row as persisted (no token).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StoredProviderConfig {
    /// Provider tag (`github`, `gitlab`).
    pub provider_kind: String,

    /// Normalized API base URL.
    pub base_url: String,

    /// Cached identity, refreshed every cycle.
    pub authenticated_login: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,

    /// Unix timestamp of the last update.
    pub updated_at: i64,
}

impl StoredProviderConfig {
    /// Parsed provider kind.
    pub fn kind(&self) -> Result<ProviderKind, crate::error::AppError> {
        self.provider_kind.parse()
    }

    /// Cached identity, if a cycle or onboarding has authenticated.
    pub fn identity(&self) -> Option<crate::models::User> {
        let login = self.authenticated_login.clone()?;
        Some(crate::models::User::new(
            login,
            self.display_name.clone(),
            self.avatar_url.clone(),
        ))
    }

    /// Rebuild the runtime configuration with a token from the credential store.
    pub fn with_token(&self, token: impl Into<String>) -> Result<ProviderConfig, crate::error::AppError> {
        Ok(ProviderConfig::new(self.kind()?, Some(self.base_url.as_str()), token))
    }
}

/// Normalize a URL by removing trailing slashes.
pub fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
