//! Queries for polling preferences and the provider configuration.
//!
//! Both tables follow the single-row pattern (id=1).

use chrono::Utc;

use super::pool::DbPool;
use super::DbError;
use crate::models::{PinnedTab, PollingSettings, ProviderKind, StoredProviderConfig, User};
use crate::models::settings::MIN_INTERVAL_MINUTES;

/// Get the polling preferences.
pub async fn get_polling_settings(pool: &DbPool) -> Result<PollingSettings, DbError> {
    let row: Option<(i64, String)> =
        sqlx::query_as("SELECT interval_minutes, pinned_tab FROM polling_settings WHERE id = 1")
            .fetch_optional(pool)
            .await?;

    Ok(match row {
        Some((interval_minutes, pinned_tab)) => PollingSettings {
            interval_minutes: u32::try_from(interval_minutes)
                .unwrap_or(MIN_INTERVAL_MINUTES)
                .max(MIN_INTERVAL_MINUTES),
            pinned_tab: PinnedTab::from(pinned_tab.as_str()),
        },
        None => PollingSettings::default(),
    })
}

/// Persist the polling interval. Values below the floor are raised to it.
pub async fn set_polling_interval(pool: &DbPool, minutes: u32) -> Result<u32, DbError> {
    let minutes = minutes.max(MIN_INTERVAL_MINUTES);
    sqlx::query(
        r#"
        INSERT INTO polling_settings (id, interval_minutes) VALUES (1, ?)
        ON CONFLICT(id) DO UPDATE SET interval_minutes = excluded.interval_minutes
        "#,
    )
    .bind(i64::from(minutes))
    .execute(pool)
    .await?;

    Ok(minutes)
}

/// Persist the pinned tab.
pub async fn set_pinned_tab(pool: &DbPool, tab: PinnedTab) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO polling_settings (id, pinned_tab) VALUES (1, ?)
        ON CONFLICT(id) DO UPDATE SET pinned_tab = excluded.pinned_tab
        "#,
    )
    .bind(tab.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Get the stored provider configuration, if onboarding completed.
pub async fn get_provider_config(pool: &DbPool) -> Result<Option<StoredProviderConfig>, DbError> {
    let config = sqlx::query_as::<_, StoredProviderConfig>(
        r#"
        SELECT provider_kind, base_url, authenticated_login, display_name, avatar_url, updated_at
        FROM provider_config
        WHERE id = 1
        "#,
    )
    .fetch_optional(pool)
    .await?;

    Ok(config)
}

/// Save the provider configuration, replacing any previous one.
///
/// The cached identity is reset whenever the endpoint changes.
pub async fn save_provider_config(
    pool: &DbPool,
    kind: ProviderKind,
    base_url: &str,
    identity: Option<&User>,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO provider_config
            (id, provider_kind, base_url, authenticated_login, display_name, avatar_url, updated_at)
        VALUES (1, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            provider_kind = excluded.provider_kind,
            base_url = excluded.base_url,
            authenticated_login = excluded.authenticated_login,
            display_name = excluded.display_name,
            avatar_url = excluded.avatar_url,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(kind.tag())
    .bind(base_url)
    .bind(identity.map(|u| u.login.as_str()))
    .bind(identity.map(|u| u.display_name.as_str()))
    .bind(identity.map(|u| u.avatar_url.as_str()))
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?;

    Ok(())
}

/// Replace the cached identity after a successful authentication.
///
/// Only touches the row while it still describes `kind` at `base_url`;
/// returns whether it did.
pub async fn update_identity(
    pool: &DbPool,
    kind: ProviderKind,
    base_url: &str,
    user: &User,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        r#"
        UPDATE provider_config
        SET authenticated_login = ?, display_name = ?, avatar_url = ?, updated_at = ?
        WHERE id = 1 AND provider_kind = ? AND base_url = ?
        "#,
    )
    .bind(&user.login)
    .bind(&user.display_name)
    .bind(&user.avatar_url)
    .bind(Utc::now().timestamp())
    .bind(kind.tag())
    .bind(base_url)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Remove the provider configuration. Idempotent.
pub async fn delete_provider_config(pool: &DbPool) -> Result<(), DbError> {
    sqlx::query("DELETE FROM provider_config WHERE id = 1")
        .execute(pool)
        .await?;
    Ok(())
}
