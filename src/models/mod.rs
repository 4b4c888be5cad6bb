//! Data models shared by every provider backend.
//!
//! These types form the provider-agnostic vocabulary: adapters produce them,
//! the status reductions fill them in, the scheduler persists them as JSON.

pub mod check_status;
pub mod health;
pub mod pull_request;
pub mod review_status;
pub mod settings;
pub mod snapshot;
pub mod user;

// Re-exports for convenient access
pub use check_status::{CheckOverall, CheckRun, CheckStatus};
pub use health::HealthIndicator;
pub use pull_request::{ChangeStats, ProviderKind, PullRequest, PullRequestState};
pub use review_status::{ReviewOverall, ReviewState, ReviewStatus, Reviewer, SubmittedReview};
pub use settings::{PollingSettings, ProviderConfig, StoredProviderConfig};
pub use snapshot::{PinnedTab, PollingSnapshot};
pub use user::User;
