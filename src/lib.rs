//! PR Beacon - keeps an eye on the pull requests you authored and the ones
//! waiting for your review.
//!
//! The library polls a code-hosting provider (GitHub or GitLab), derives a
//! CI status and a review status for every open pull request, and keeps the
//! latest snapshot and the badge count in a local SQLite database. Embedders
//! drive it through [`services::SchedulerHandle`] and install their own
//! `log` backend.

pub mod db;
pub mod error;
pub mod models;
pub mod services;

use std::path::Path;
use std::sync::Arc;

use error::AppError;
use services::{
    CredentialStore, KeyringCredentialStore, ProviderRegistry, Scheduler, SchedulerHandle,
    SchedulerOptions,
};

/// A started instance: the database pool plus the scheduler controlling it.
#[derive(Clone)]
pub struct Beacon {
    pub pool: db::pool::DbPool,
    pub registry: ProviderRegistry,
    pub credentials: Arc<dyn CredentialStore>,
    pub scheduler: SchedulerHandle,
}

impl Beacon {
    /// Connect a provider account and tell the scheduler about it.
    pub async fn connect(&self, config: models::ProviderConfig) -> Result<models::User, AppError> {
        let user = services::setup::connect_provider(
            &self.pool,
            &self.registry,
            self.credentials.as_ref(),
            config,
        )
        .await?;
        self.scheduler.provider_configured().await?;
        Ok(user)
    }

    /// Forget the provider account; polling is disarmed.
    pub async fn disconnect(&self) -> Result<(), AppError> {
        services::setup::disconnect_provider(&self.pool, self.credentials.as_ref()).await?;
        self.scheduler.provider_configured().await
    }
}

/// Open the database under `data_dir` and start polling with the OS keychain
/// and the built-in providers. Must be called inside a tokio runtime.
pub async fn start(data_dir: &Path) -> Result<Beacon, AppError> {
    start_with(
        data_dir,
        ProviderRegistry::with_defaults(),
        Arc::new(KeyringCredentialStore),
    )
    .await
}

/// Like [`start`], with a custom provider registry and credential store.
pub async fn start_with(
    data_dir: &Path,
    registry: ProviderRegistry,
    credentials: Arc<dyn CredentialStore>,
) -> Result<Beacon, AppError> {
    start_with_options(data_dir, registry, credentials, SchedulerOptions::default()).await
}

/// Like [`start_with`], with custom scheduler options.
pub async fn start_with_options(
    data_dir: &Path,
    registry: ProviderRegistry,
    credentials: Arc<dyn CredentialStore>,
    options: SchedulerOptions,
) -> Result<Beacon, AppError> {
    let db_path = db::get_db_path(data_dir);
    log::info!("[beacon] Opening database at {}", db_path.display());

    let pool = db::initialize(&db_path).await?;
    let scheduler = Scheduler::start_with_options(
        pool.clone(),
        registry.clone(),
        credentials.clone(),
        options,
    );

    Ok(Beacon {
        pool,
        registry,
        credentials,
        scheduler,
    })
}
