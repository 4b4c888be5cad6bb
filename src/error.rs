//! Application error types.
//!
//! Errors are serializable so the presentation layer can render them
//! without string matching. The variants fall into four families:
//! authentication failures (fatal to a polling cycle), transient fetch
//! failures (recovered per pull request), configuration problems (polling
//! stays disarmed) and cycle failures (the cycle is abandoned and the
//! previous snapshot kept).

use serde::Serialize;
use thiserror::Error;

/// Application-level errors.
///
/// All variants serialize to a structured JSON object for frontend consumption.
#[derive(Debug, Clone, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {message}")]
    Database { message: String },

    /// Provider API answered with a non-success status.
    #[error("Provider API error: {message}")]
    ProviderApi {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },

    /// Network request failed.
    #[error("Network error: {message}")]
    Network { message: String },

    /// Credential rejected or malformed.
    #[error("Authentication error: {message}")]
    Authentication { message: String },

    /// Credential expired or revoked - requires reconnecting.
    #[error("Token expired: {message}")]
    AuthenticationExpired {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        base_url: Option<String>,
    },

    /// Credential storage operation failed.
    #[error("Credential storage error: {message}")]
    CredentialStorage { message: String },

    /// Provider configuration missing or invalid.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A polling cycle was abandoned.
    #[error("Polling cycle failed: {message}")]
    Cycle { message: String },

    /// Requested resource not found.
    #[error("Not found: {resource}")]
    NotFound {
        resource: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// Invalid input provided.
    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },

    /// Internal application error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create a provider API error.
    pub fn provider_api(message: impl Into<String>) -> Self {
        Self::ProviderApi {
            message: message.into(),
            status_code: None,
            endpoint: None,
        }
    }

    /// Create a provider API error with status code and endpoint.
    pub fn provider_api_full(
        message: impl Into<String>,
        status_code: u16,
        endpoint: impl Into<String>,
    ) -> Self {
        Self::ProviderApi {
            message: message.into(),
            status_code: Some(status_code),
            endpoint: Some(endpoint.into()),
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create an authentication expired error.
    pub fn authentication_expired(message: impl Into<String>) -> Self {
        Self::AuthenticationExpired {
            message: message.into(),
            base_url: None,
        }
    }

    /// Create an authentication expired error naming the provider endpoint.
    pub fn authentication_expired_for(
        message: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self::AuthenticationExpired {
            message: message.into(),
            base_url: Some(base_url.into()),
        }
    }

    /// Create a credential storage error.
    pub fn credential_storage(message: impl Into<String>) -> Self {
        Self::CredentialStorage {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a cycle error.
    pub fn cycle(message: impl Into<String>) -> Self {
        Self::Cycle {
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: None,
        }
    }

    /// Create a not found error with ID.
    pub fn not_found_with_id(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: Some(id.into()),
        }
    }

    /// Create an invalid input error with field name.
    pub fn invalid_input_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the credential was rejected. Such errors end the whole cycle
    /// and are never retried automatically.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::AuthenticationExpired { .. }
        )
    }

    /// Whether this is a network or upstream failure worth degrading over.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::ProviderApi { .. })
    }

    /// Whether polling should stay disarmed because of this error.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// HTTP status code, if the provider returned one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ProviderApi { status_code, .. } => *status_code,
            _ => None,
        }
    }
}

// Conversions from common error types

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::database(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::network("Request timed out")
        } else if err.is_connect() {
            Self::network("Failed to connect to server")
        } else if err.is_status() {
            Self::provider_api(format!("HTTP error: {}", err))
        } else {
            Self::network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("JSON error: {}", err))
    }
}

impl From<crate::db::DbError> for AppError {
    fn from(err: crate::db::DbError) -> Self {
        Self::database(err.to_string())
    }
}
