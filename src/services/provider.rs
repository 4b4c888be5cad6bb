//! Provider capability contract and the per-item enrichment pipeline.
//!
//! Every backend implements [`PrProvider`]. The list operations are provided
//! methods: they run the backend's search and then enrich each result with
//! detail, checks and reviews. Enrichment never fails the batch; each item
//! reports whether it is complete or which sub-fetches degraded.

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;

use crate::error::AppError;
use crate::models::{
    ChangeStats, CheckStatus, ProviderKind, PullRequest, ReviewStatus, User,
};

/// Mutable metrics of one pull request, fetched after search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullRequestDetail {
    pub branch_name: String,
    pub change_stats: ChangeStats,
    /// Logins currently awaiting a (re-)review.
    pub requested_reviewer_logins: Vec<String>,
    /// Head commit, for backends whose checks hang off it.
    pub head_sha: Option<String>,
}

/// The sub-fetch that failed for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubFetch {
    Detail,
    Checks,
    Reviews,
}

/// One failed sub-fetch and why.
#[derive(Debug, Clone, Serialize)]
pub struct Degradation {
    pub stage: SubFetch,
    pub error: AppError,
}

/// Whether an item was fully enriched.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "failures", rename_all = "snake_case")]
pub enum Enrichment {
    Complete,
    Degraded(Vec<Degradation>),
}

/// A pull request together with how its enrichment went.
#[derive(Debug, Clone)]
pub struct EnrichedPullRequest {
    pub pull_request: PullRequest,
    pub enrichment: Enrichment,
}

impl EnrichedPullRequest {
    pub fn is_degraded(&self) -> bool {
        matches!(self.enrichment, Enrichment::Degraded(_))
    }

    /// Stages that failed, empty when complete.
    pub fn failed_stages(&self) -> Vec<SubFetch> {
        match &self.enrichment {
            Enrichment::Complete => Vec::new(),
            Enrichment::Degraded(failures) => failures.iter().map(|d| d.stage).collect(),
        }
    }
}

/// Capability contract of a code-hosting backend.
///
/// Every method is an independent round trip; implementations hold no
/// mutable state shared between calls beyond caches of immutable data.
#[async_trait]
pub trait PrProvider: Send + Sync {
    /// Backend this provider talks to.
    fn kind(&self) -> ProviderKind;

    /// Fetch the identity behind the credential. Fails with an authentication
    /// error when the token is invalid or expired.
    async fn authenticate(&self) -> Result<User, AppError>;

    /// Open pull requests authored by the current identity, as returned by
    /// search (statuses defaulted).
    async fn search_own_open_pull_requests(&self) -> Result<Vec<PullRequest>, AppError>;

    /// Open pull requests where the current identity is a requested reviewer,
    /// as returned by search (statuses defaulted).
    async fn search_review_requested_pull_requests(&self) -> Result<Vec<PullRequest>, AppError>;

    async fn get_pull_request_detail(
        &self,
        repo: &str,
        number: u64,
    ) -> Result<PullRequestDetail, AppError>;

    /// CI status of the pull request. `head_sha` is passed through from the
    /// detail fetch; backends that need it look it up when absent.
    async fn get_check_status(
        &self,
        repo: &str,
        number: u64,
        head_sha: Option<&str>,
    ) -> Result<CheckStatus, AppError>;

    async fn get_review_status(
        &self,
        repo: &str,
        number: u64,
        requested_reviewer_logins: &[String],
    ) -> Result<ReviewStatus, AppError>;

    /// Own open pull requests, enriched, newest-updated first.
    async fn list_own_open_pull_requests(&self) -> Result<Vec<EnrichedPullRequest>, AppError> {
        let mut found = self.search_own_open_pull_requests().await?;
        crate::models::pull_request::sort_newest_first(&mut found);
        Ok(enrich_all(self, found).await)
    }

    /// Review-requested open pull requests, enriched, newest-updated first.
    async fn list_review_requested_pull_requests(
        &self,
    ) -> Result<Vec<EnrichedPullRequest>, AppError> {
        let mut found = self.search_review_requested_pull_requests().await?;
        crate::models::pull_request::sort_newest_first(&mut found);
        Ok(enrich_all(self, found).await)
    }
}

/// Enrich every item concurrently. Output order matches input order.
pub async fn enrich_all<P>(provider: &P, pull_requests: Vec<PullRequest>) -> Vec<EnrichedPullRequest>
where
    P: PrProvider + ?Sized,
{
    join_all(
        pull_requests
            .into_iter()
            .map(|pr| enrich_one(provider, pr)),
    )
    .await
}

/// Run the detail → (checks ‖ reviews) pipeline for one item.
///
/// Detail comes first because its requested reviewers feed the review
/// reduction. A detail failure leaves the item as found by search; a check
/// or review failure replaces only that status with its safe default.
pub async fn enrich_one<P>(provider: &P, mut pr: PullRequest) -> EnrichedPullRequest
where
    P: PrProvider + ?Sized,
{
    let detail = match provider
        .get_pull_request_detail(&pr.repo_full_name, pr.number)
        .await
    {
        Ok(detail) => detail,
        Err(e) => {
            log::warn!(
                "[poll] Detail fetch failed for {}#{}: {}",
                pr.repo_full_name,
                pr.number,
                e
            );
            pr.check_status = CheckStatus::unknown();
            pr.review_status = ReviewStatus::default();
            return EnrichedPullRequest {
                pull_request: pr,
                enrichment: Enrichment::Degraded(vec![Degradation {
                    stage: SubFetch::Detail,
                    error: e,
                }]),
            };
        }
    };

    let (checks, reviews) = tokio::join!(
        provider.get_check_status(&pr.repo_full_name, pr.number, detail.head_sha.as_deref()),
        provider.get_review_status(
            &pr.repo_full_name,
            pr.number,
            &detail.requested_reviewer_logins
        ),
    );

    let mut failures = Vec::new();

    pr.check_status = checks.unwrap_or_else(|e| {
        log::warn!(
            "[poll] Check fetch failed for {}#{}: {}",
            pr.repo_full_name,
            pr.number,
            e
        );
        failures.push(Degradation {
            stage: SubFetch::Checks,
            error: e,
        });
        CheckStatus::unknown()
    });

    pr.review_status = reviews.unwrap_or_else(|e| {
        log::warn!(
            "[poll] Review fetch failed for {}#{}: {}",
            pr.repo_full_name,
            pr.number,
            e
        );
        failures.push(Degradation {
            stage: SubFetch::Reviews,
            error: e,
        });
        ReviewStatus::pending_for(&detail.requested_reviewer_logins)
    });

    if !detail.branch_name.is_empty() {
        pr.source_branch = detail.branch_name;
    }
    pr.change_stats = detail.change_stats;

    let enrichment = if failures.is_empty() {
        Enrichment::Complete
    } else {
        Enrichment::Degraded(failures)
    };

    EnrichedPullRequest {
        pull_request: pr,
        enrichment,
    }
}
