//! Review status of a pull request.

use serde::{Deserialize, Serialize};

/// Aggregated review verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewOverall {
    Approved,
    ChangesRequested,
    Pending,
}

impl std::fmt::Display for ReviewOverall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approved => write!(f, "approved"),
            Self::ChangesRequested => write!(f, "changes_requested"),
            Self::Pending => write!(f, "pending"),
        }
    }
}

/// State of one submitted review, in GitHub's vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Pending,
    Dismissed,
    #[serde(untagged)]
    Other(String),
}

impl ReviewState {
    /// Pending and comment-only reviews carry no verdict.
    pub fn is_binding(&self) -> bool {
        !matches!(self, Self::Pending | Self::Commented)
    }
}

impl From<&str> for ReviewState {
    fn from(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "APPROVED" => Self::Approved,
            "CHANGES_REQUESTED" => Self::ChangesRequested,
            "COMMENTED" => Self::Commented,
            "PENDING" => Self::Pending,
            "DISMISSED" => Self::Dismissed,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A review as submitted, in the provider's chronological order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedReview {
    pub login: String,
    pub avatar_url: String,
    pub state: ReviewState,
}

impl SubmittedReview {
    pub fn new(login: impl Into<String>, avatar_url: impl Into<String>, state: ReviewState) -> Self {
        Self {
            login: login.into(),
            avatar_url: avatar_url.into(),
            state,
        }
    }
}

/// A reviewer's current verdict after collapsing their reviews.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reviewer {
    pub login: String,
    pub avatar_url: String,
    pub state: ReviewState,
}

/// Review status of a pull request.
///
/// A login listed in `pending_reviewers` never also appears in `reviewers`:
/// the re-request supersedes the old verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewStatus {
    pub overall: ReviewOverall,
    pub reviewers: Vec<Reviewer>,
    pub pending_reviewers: Vec<String>,
}

impl ReviewStatus {
    /// Safe default used when reviews could not be fetched.
    pub fn pending_for(requested_reviewer_logins: &[String]) -> Self {
        Self {
            overall: ReviewOverall::Pending,
            reviewers: Vec::new(),
            pending_reviewers: requested_reviewer_logins.to_vec(),
        }
    }
}

impl Default for ReviewStatus {
    fn default() -> Self {
        Self::pending_for(&[])
    }
}
