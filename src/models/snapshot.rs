//! Result of one polling cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pull_request::PullRequest;

/// Which list the user pinned; drives the badge count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinnedTab {
    #[default]
    MyPrs,
    ReviewRequested,
}

impl From<&str> for PinnedTab {
    fn from(s: &str) -> Self {
        match s {
            "review_requested" => Self::ReviewRequested,
            _ => Self::MyPrs,
        }
    }
}

impl std::fmt::Display for PinnedTab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MyPrs => write!(f, "my_prs"),
            Self::ReviewRequested => write!(f, "review_requested"),
        }
    }
}

/// Latest complete view of the user's pull requests.
///
/// Replaced wholesale after each successful cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollingSnapshot {
    pub my_prs: Vec<PullRequest>,
    pub review_requested_prs: Vec<PullRequest>,
    pub fetched_at: DateTime<Utc>,
}

impl PollingSnapshot {
    /// Number of pull requests in the given list.
    pub fn count_for(&self, tab: PinnedTab) -> usize {
        match tab {
            PinnedTab::MyPrs => self.my_prs.len(),
            PinnedTab::ReviewRequested => self.review_requested_prs.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pinned_tab_round_trip() {
        assert_eq!(PinnedTab::from("review_requested"), PinnedTab::ReviewRequested);
        assert_eq!(PinnedTab::from("my_prs"), PinnedTab::MyPrs);
        assert_eq!(PinnedTab::from("garbage"), PinnedTab::MyPrs);
        assert_eq!(PinnedTab::ReviewRequested.to_string(), "review_requested");
    }

    #[test]
    fn test_empty_snapshot_counts() {
        let snapshot = PollingSnapshot {
            my_prs: Vec::new(),
            review_requested_prs: Vec::new(),
            fetched_at: Utc::now(),
        };
        assert_eq!(snapshot.count_for(PinnedTab::MyPrs), 0);
        assert_eq!(snapshot.count_for(PinnedTab::ReviewRequested), 0);
    }
}
