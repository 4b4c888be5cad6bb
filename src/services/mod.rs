//! Business logic services.
//!
//! Provider backends, the pure status reductions, credential storage,
//! onboarding and the polling scheduler. Nothing here depends on a UI.

pub mod credentials;
pub mod github_client;
pub mod gitlab_client;
pub mod provider;
pub mod registry;
pub mod scheduler;
pub mod scheduler_events;
pub mod setup;
pub mod status;

pub use credentials::{CredentialStore, KeyringCredentialStore, MemoryCredentialStore};
pub use github_client::GitHubClient;
pub use gitlab_client::GitLabClient;
pub use provider::{EnrichedPullRequest, Enrichment, PrProvider, PullRequestDetail};
pub use registry::{fetch_all, FetchOutcome, ProviderRegistry};
pub use scheduler::{
    Scheduler, SchedulerHandle, SchedulerOptions, SchedulerState, SchedulerStatus,
};
pub use scheduler_events::SchedulerEvent;
