//! Provider registry and the two-list fetch.
//!
//! Backends are looked up by [`ProviderKind`]; adding a backend means
//! registering one more factory. The scheduler only ever sees
//! `Arc<dyn PrProvider>`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::{PollingSnapshot, ProviderConfig, ProviderKind, PullRequest};
use crate::services::github_client::GitHubClient;
use crate::services::gitlab_client::GitLabClient;
use crate::services::provider::{EnrichedPullRequest, PrProvider};

/// Builds a provider from onboarding configuration.
pub type ProviderFactory =
    Arc<dyn Fn(&ProviderConfig) -> Result<Arc<dyn PrProvider>, AppError> + Send + Sync>;

/// Factories keyed by backend.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: HashMap<ProviderKind, ProviderFactory>,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the GitHub and GitLab backends.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ProviderKind::GitHub, |config| {
            Ok(Arc::new(GitHubClient::from_provider_config(config)?) as Arc<dyn PrProvider>)
        });
        registry.register(ProviderKind::GitLab, |config| {
            Ok(Arc::new(GitLabClient::from_provider_config(config)?) as Arc<dyn PrProvider>)
        });
        registry
    }

    /// Register (or replace) the factory for a backend.
    pub fn register<F>(&mut self, kind: ProviderKind, factory: F)
    where
        F: Fn(&ProviderConfig) -> Result<Arc<dyn PrProvider>, AppError> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Arc::new(factory));
    }

    /// Build the provider for a configuration.
    pub fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn PrProvider>, AppError> {
        let factory = self.factories.get(&config.kind).ok_or_else(|| {
            AppError::config(format!("No provider registered for '{}'", config.kind))
        })?;
        factory(config)
    }

    pub fn supports(&self, kind: ProviderKind) -> bool {
        self.factories.contains_key(&kind)
    }
}

/// Both lists from one cycle, with per-item enrichment outcomes.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub my_prs: Vec<EnrichedPullRequest>,
    pub review_requested_prs: Vec<EnrichedPullRequest>,
    pub fetched_at: DateTime<Utc>,
}

impl FetchOutcome {
    /// Items whose enrichment was incomplete, across both lists.
    pub fn degraded_count(&self) -> usize {
        self.my_prs
            .iter()
            .chain(&self.review_requested_prs)
            .filter(|item| item.is_degraded())
            .count()
    }

    /// Drop the enrichment outcomes and keep the pull requests.
    pub fn into_snapshot(self) -> PollingSnapshot {
        fn strip(items: Vec<EnrichedPullRequest>) -> Vec<PullRequest> {
            items.into_iter().map(|item| item.pull_request).collect()
        }

        PollingSnapshot {
            my_prs: strip(self.my_prs),
            review_requested_prs: strip(self.review_requested_prs),
            fetched_at: self.fetched_at,
        }
    }
}

/// Fetch both lists concurrently. The first list-level failure aborts the
/// whole fetch; item-level failures only degrade items.
pub async fn fetch_all(provider: &dyn PrProvider) -> Result<FetchOutcome, AppError> {
    let (my_prs, review_requested_prs) = tokio::try_join!(
        provider.list_own_open_pull_requests(),
        provider.list_review_requested_pull_requests(),
    )?;

    Ok(FetchOutcome {
        my_prs,
        review_requested_prs,
        fetched_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CheckStatus, ReviewStatus, User};
    use crate::services::provider::{Degradation, Enrichment, PullRequestDetail, SubFetch};
    use async_trait::async_trait;

    struct EmptyProvider {
        fail_review_search: bool,
    }

    #[async_trait]
    impl PrProvider for EmptyProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::GitHub
        }

        async fn authenticate(&self) -> Result<User, AppError> {
            Ok(User::new("me", None, None))
        }

        async fn search_own_open_pull_requests(&self) -> Result<Vec<PullRequest>, AppError> {
            Ok(Vec::new())
        }

        async fn search_review_requested_pull_requests(
            &self,
        ) -> Result<Vec<PullRequest>, AppError> {
            if self.fail_review_search {
                Err(AppError::network("connection reset"))
            } else {
                Ok(Vec::new())
            }
        }

        async fn get_pull_request_detail(
            &self,
            _repo: &str,
            _number: u64,
        ) -> Result<PullRequestDetail, AppError> {
            Ok(PullRequestDetail::default())
        }

        async fn get_check_status(
            &self,
            _repo: &str,
            _number: u64,
            _head_sha: Option<&str>,
        ) -> Result<CheckStatus, AppError> {
            Ok(CheckStatus::unknown())
        }

        async fn get_review_status(
            &self,
            _repo: &str,
            _number: u64,
            requested: &[String],
        ) -> Result<ReviewStatus, AppError> {
            Ok(ReviewStatus::pending_for(requested))
        }
    }

    #[test]
    fn test_registry_defaults() {
        let registry = ProviderRegistry::with_defaults();
        assert!(registry.supports(ProviderKind::GitHub));
        assert!(registry.supports(ProviderKind::GitLab));

        let provider = registry
            .create(&ProviderConfig::new(ProviderKind::GitLab, None, "glpat-x"))
            .unwrap();
        assert_eq!(provider.kind(), ProviderKind::GitLab);
    }

    #[test]
    fn test_unregistered_kind_is_config_error() {
        let registry = ProviderRegistry::new();
        let err = registry
            .create(&ProviderConfig::new(ProviderKind::GitHub, None, "t"))
            .err()
            .unwrap();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_fetch_all_empty_lists() {
        let outcome = fetch_all(&EmptyProvider { fail_review_search: false })
            .await
            .unwrap();
        assert_eq!(outcome.degraded_count(), 0);

        let snapshot = outcome.into_snapshot();
        assert!(snapshot.my_prs.is_empty());
        assert!(snapshot.review_requested_prs.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_all_list_failure_aborts() {
        let result = fetch_all(&EmptyProvider { fail_review_search: true }).await;
        assert!(result.err().is_some_and(|e| e.is_transient()));
    }

    #[test]
    fn test_degraded_count_spans_both_lists() {
        let pr = |n: u64| PullRequest {
            id: format!("github:{}", n),
            provider: ProviderKind::GitHub,
            number: n,
            title: String::new(),
            url: String::new(),
            repo_full_name: "o/r".to_string(),
            source_branch: String::new(),
            author: User::new("me", None, None),
            state: crate::models::PullRequestState::Open,
            change_stats: Default::default(),
            check_status: CheckStatus::unknown(),
            review_status: ReviewStatus::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let degraded = |n: u64| EnrichedPullRequest {
            pull_request: pr(n),
            enrichment: Enrichment::Degraded(vec![Degradation {
                stage: SubFetch::Checks,
                error: AppError::network("timeout"),
            }]),
        };

        let outcome = FetchOutcome {
            my_prs: vec![
                degraded(1),
                EnrichedPullRequest {
                    pull_request: pr(2),
                    enrichment: Enrichment::Complete,
                },
            ],
            review_requested_prs: vec![degraded(3)],
            fetched_at: Utc::now(),
        };

        assert_eq!(outcome.degraded_count(), 2);
        let snapshot = outcome.into_snapshot();
        assert_eq!(snapshot.count_for(crate::models::PinnedTab::MyPrs), 2);
        assert_eq!(
            snapshot.count_for(crate::models::PinnedTab::ReviewRequested),
            1
        );
    }
}
