//! Provider-agnostic pull request model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::check_status::CheckStatus;
use super::review_status::ReviewStatus;
use super::user::User;

/// Supported code-hosting backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    GitHub,
    GitLab,
}

impl ProviderKind {
    /// Short tag used as the ID prefix and in persisted configuration.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::GitLab => "gitlab",
        }
    }

    /// API base URL used when none is configured.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::GitHub => "https://api.github.com",
            Self::GitLab => "https://gitlab.com",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = crate::error::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "github" => Ok(Self::GitHub),
            "gitlab" => Ok(Self::GitLab),
            other => Err(crate::error::AppError::config(format!(
                "Unknown provider type '{}'",
                other
            ))),
        }
    }
}

/// Lifecycle state of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullRequestState {
    Open,
    Merged,
    Closed,
}

impl From<&str> for PullRequestState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "merged" => Self::Merged,
            "closed" => Self::Closed,
            _ => Self::Open,
        }
    }
}

impl std::fmt::Display for PullRequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Merged => write!(f, "merged"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Size of the change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeStats {
    pub additions: u64,
    pub deletions: u64,
    pub files_changed: u64,
}

/// A pull (merge) request, normalized across providers.
///
/// Built fresh every polling cycle and never mutated once it is part of a
/// snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// `"{provider}:{api id}"`, stable across cycles.
    pub id: String,

    pub provider: ProviderKind,

    /// Repository-scoped number (GitHub number, GitLab IID).
    pub number: u64,

    pub title: String,

    /// Web URL of the pull request.
    pub url: String,

    /// `"owner/repo"` (GitLab: full namespace path).
    pub repo_full_name: String,

    /// Source branch; empty until detail has been fetched.
    pub source_branch: String,

    pub author: User,

    pub state: PullRequestState,

    pub change_stats: ChangeStats,

    pub check_status: CheckStatus,

    pub review_status: ReviewStatus,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl PullRequest {
    /// Build the globally unique ID for a provider object.
    pub fn make_id(provider: ProviderKind, api_id: impl std::fmt::Display) -> String {
        format!("{}:{}", provider.tag(), api_id)
    }

    /// Check if the pull request is open.
    pub fn is_open(&self) -> bool {
        self.state == PullRequestState::Open
    }
}

/// Sort newest-updated first.
pub fn sort_newest_first(pull_requests: &mut [PullRequest]) {
    pull_requests.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}
