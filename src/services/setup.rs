//! Onboarding boundary.
//!
//! Validates a credential against the provider, then stores the token in the
//! credential store and the rest of the configuration in the database. The
//! caller signals the scheduler afterwards.

use crate::db::{self, pool::DbPool};
use crate::error::AppError;
use crate::models::{ProviderConfig, User};
use crate::services::credentials::CredentialStore;
use crate::services::registry::ProviderRegistry;

/// Connect a provider account.
///
/// Authenticates first so an invalid token never replaces a working one.
/// Switching to a different provider or endpoint drops the old token and
/// the old snapshot.
pub async fn connect_provider(
    pool: &DbPool,
    registry: &ProviderRegistry,
    credentials: &dyn CredentialStore,
    config: ProviderConfig,
) -> Result<User, AppError> {
    let token = config.token.trim();
    if token.is_empty() {
        return Err(AppError::invalid_input_field("Token is required", "token"));
    }
    if !config.base_url.trim().is_empty()
        && !config.base_url.trim().starts_with("https://")
        && !config.base_url.trim().starts_with("http://")
    {
        return Err(AppError::invalid_input_field(
            "Base URL must start with http:// or https://",
            "base_url",
        ));
    }

    let config = ProviderConfig::new(config.kind, Some(config.base_url.as_str()), token);
    log::info!("[setup] Validating {} credential for {}", config.kind, config.base_url);

    let provider = registry.create(&config)?;
    let user = provider.authenticate().await?;

    let previous = db::settings::get_provider_config(pool).await?;

    // The new config goes in first; a cycle still polling the old endpoint
    // can no longer store anything once it is there.
    credentials.store_token(&config.base_url, &config.token)?;
    db::settings::save_provider_config(pool, config.kind, &config.base_url, Some(&user)).await?;

    if let Some(previous) = previous {
        let same_endpoint =
            previous.provider_kind == config.kind.tag() && previous.base_url == config.base_url;
        if !same_endpoint {
            if previous.base_url != config.base_url {
                credentials.delete_token(&previous.base_url)?;
            }
            db::snapshot::clear_snapshot(pool).await?;
        }
    }

    log::info!("[setup] Connected {} as {}", config.kind, user.login);
    Ok(user)
}

/// Forget the connected account: token, configuration and snapshot.
/// Idempotent.
pub async fn disconnect_provider(
    pool: &DbPool,
    credentials: &dyn CredentialStore,
) -> Result<(), AppError> {
    if let Some(previous) = db::settings::get_provider_config(pool).await? {
        credentials.delete_token(&previous.base_url)?;
        log::info!("[setup] Disconnected {}", previous.base_url);
    }

    db::settings::delete_provider_config(pool).await?;
    db::snapshot::clear_snapshot(pool).await?;
    Ok(())
}
