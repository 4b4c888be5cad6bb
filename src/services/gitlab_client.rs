//! GitLab API client.
//!
//! Provides an HTTP client for GitLab API v4 and the GitLab flavour of
//! [`PrProvider`]. Merge requests are addressed by URL-encoded project path
//! and IID, so the repository name doubles as the project identifier.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::error::AppError;
use crate::models::{
    ChangeStats, CheckRun, CheckStatus, ProviderConfig, ProviderKind, PullRequest,
    PullRequestState, ReviewState, ReviewStatus, SubmittedReview, User,
};
use crate::services::provider::{PrProvider, PullRequestDetail};
use crate::services::status;

/// GitLab API client configuration.
#[derive(Clone)]
pub struct GitLabClientConfig {
    /// Base URL of the GitLab instance (e.g., `https://gitlab.com`).
    pub base_url: String,

    /// Personal access token for authentication.
    pub token: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for GitLabClientConfig {
    fn default() -> Self {
        Self {
            base_url: ProviderKind::GitLab.default_base_url().to_string(),
            token: String::new(),
            timeout_secs: 30,
        }
    }
}

impl From<&ProviderConfig> for GitLabClientConfig {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            token: config.token.clone(),
            ..Default::default()
        }
    }
}

/// GitLab API client.
pub struct GitLabClient {
    client: Client,
    config: GitLabClientConfig,
    /// Username behind the token, needed for the reviewer filter.
    username: OnceCell<String>,
}

/// Query parameters for listing merge requests.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeRequestsQuery {
    /// Filter by state: `opened`, `merged`, `closed`, `all`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Filter by scope: `created_by_me`, `assigned_to_me`, `all`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Filter by reviewer username.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewer_username: Option<String>,

    /// `created_at` or `updated_at`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,

    /// `asc` or `desc`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
}

impl MergeRequestsQuery {
    fn open_by_scope(scope: &str) -> Self {
        Self {
            state: Some("opened".to_string()),
            scope: Some(scope.to_string()),
            order_by: Some("updated_at".to_string()),
            sort: Some("desc".to_string()),
            ..Default::default()
        }
    }
}

/// GitLab merge request from API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabMergeRequest {
    pub id: i64,
    pub iid: i64,
    pub project_id: i64,
    pub title: String,
    pub state: String,
    pub web_url: String,
    pub source_branch: String,
    /// Head commit; absent on some older instances.
    #[serde(default)]
    pub sha: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub author: GitLabUser,
}

/// GitLab user from API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabUser {
    pub id: i64,
    pub username: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

impl From<GitLabUser> for User {
    fn from(user: GitLabUser) -> Self {
        User::new(user.username, user.name, user.avatar_url)
    }
}

/// Entry of the diff versions list.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabDiffVersionRef {
    pub id: i64,
}

/// GitLab diff from API (version endpoint).
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabDiffVersion {
    pub id: i64,
    #[serde(default)]
    pub diffs: Vec<GitLabFileDiff>,
}

/// GitLab file diff from API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabFileDiff {
    pub new_path: String,
    pub diff: String,
}

/// Response from the MR approvals endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct MergeRequestApprovals {
    #[serde(default)]
    pub approved_by: Vec<ApprovedBy>,
}

/// User who approved an MR.
#[derive(Debug, Clone, Deserialize)]
pub struct ApprovedBy {
    pub user: GitLabUser,
}

/// Reviewer assignment from `GET .../merge_requests/:iid/reviewers`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabReviewer {
    pub user: GitLabUser,
    /// `unreviewed`, `reviewed`, `requested_changes`, `approved`, `unapproved`.
    pub state: String,
}

/// GitLab pipeline from API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabPipeline {
    pub id: i64,
    pub status: String,
    pub sha: String,
}

/// GitLab pipeline job from API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabJob {
    pub id: i64,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub allow_failure: bool,
}

impl GitLabClient {
    /// Create a new GitLab client.
    pub fn new(config: GitLabClientConfig) -> Result<Self, AppError> {
        let mut headers = header::HeaderMap::new();

        let token_value = header::HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|_| AppError::authentication("Invalid token format"))?;
        headers.insert(header::AUTHORIZATION, token_value);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            username: OnceCell::new(),
        })
    }

    /// Build a provider from onboarding configuration.
    pub fn from_provider_config(config: &ProviderConfig) -> Result<Self, AppError> {
        Self::new(GitLabClientConfig::from(config))
    }

    /// Get the base URL for API requests.
    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/api/v4{}",
            self.config.base_url.trim_end_matches('/'),
            path
        )
    }

    fn next_page(response: &Response) -> Option<u32> {
        response
            .headers()
            .get("x-next-page")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
    }

    /// Handle API response errors.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Response,
        endpoint: &str,
    ) -> Result<T, AppError> {
        let status = response.status();

        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| AppError::internal(format!("Failed to parse response: {}", e)));
        }

        if status == StatusCode::UNAUTHORIZED {
            return Err(AppError::authentication_expired_for(
                "GitLab token expired or revoked. Please reconnect.",
                &self.config.base_url,
            ));
        }

        let status_code = status.as_u16();
        let body = response.text().await.unwrap_or_default();
        let body_message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                // GitLab returns errors as {"message": "..."} or {"error": "..."}
                let m = v.get("message").or_else(|| v.get("error"))?;
                Some(m.as_str().map(String::from).unwrap_or_else(|| m.to_string()))
            });

        let message = match (status, &body_message) {
            (StatusCode::FORBIDDEN, _) => "Access denied".to_string(),
            (StatusCode::NOT_FOUND, _) => "Resource not found".to_string(),
            (StatusCode::TOO_MANY_REQUESTS, _) => "Rate limit exceeded".to_string(),
            (_, Some(msg)) => msg.clone(),
            _ => format!("Request failed ({}): {}", status_code, body),
        };

        Err(AppError::provider_api_full(message, status_code, endpoint))
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, AppError> {
        let response = self.client.get(self.api_url(endpoint)).send().await?;
        self.handle_response(response, endpoint).await
    }

    /// Fetch all pages of a paginated endpoint.
    pub async fn get_all_pages<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: Option<&impl Serialize>,
    ) -> Result<Vec<T>, AppError> {
        let mut all_data = Vec::new();
        let mut page = 1u32;

        loop {
            let mut request = self.client.get(self.api_url(endpoint));
            if let Some(q) = query {
                request = request.query(q);
            }
            request = request.query(&[("page", page.to_string()), ("per_page", "100".to_string())]);

            let response = request.send().await?;
            let next = Self::next_page(&response);
            let data = self.handle_response::<Vec<T>>(response, endpoint).await?;
            all_data.extend(data);

            match next {
                Some(next) => page = next,
                None => break,
            }
        }

        Ok(all_data)
    }

    /// Fetch the user behind the token.
    pub async fn current_user(&self) -> Result<GitLabUser, AppError> {
        self.get_json("/user").await
    }

    /// Username behind the token, fetched once.
    async fn username(&self) -> Result<&str, AppError> {
        self.username
            .get_or_try_init(|| async { self.current_user().await.map(|u| u.username) })
            .await
            .map(String::as_str)
    }

    /// List merge requests across all projects visible to the token.
    pub async fn list_merge_requests(
        &self,
        query: &MergeRequestsQuery,
    ) -> Result<Vec<GitLabMergeRequest>, AppError> {
        self.get_all_pages("/merge_requests", Some(query)).await
    }

    fn merge_request_endpoint(project_path: &str, mr_iid: u64) -> String {
        format!(
            "/projects/{}/merge_requests/{}",
            urlencoding::encode(project_path),
            mr_iid
        )
    }

    /// Get a single merge request by project path and IID.
    pub async fn get_merge_request_by_path(
        &self,
        project_path: &str,
        mr_iid: u64,
    ) -> Result<GitLabMergeRequest, AppError> {
        self.get_json(&Self::merge_request_endpoint(project_path, mr_iid))
            .await
    }

    /// Get the latest diff version for a merge request.
    pub async fn get_merge_request_diff(
        &self,
        project_path: &str,
        mr_iid: u64,
    ) -> Result<GitLabDiffVersion, AppError> {
        let base = Self::merge_request_endpoint(project_path, mr_iid);
        let versions: Vec<GitLabDiffVersionRef> =
            self.get_json(&format!("{}/versions", base)).await?;

        // Latest version is first in the list
        let version_id = versions
            .first()
            .map(|v| v.id)
            .ok_or_else(|| AppError::not_found("No diff versions found"))?;

        self.get_json(&format!("{}/versions/{}", base, version_id))
            .await
    }

    /// Reviewer assignments and their review state.
    pub async fn list_reviewers(
        &self,
        project_path: &str,
        mr_iid: u64,
    ) -> Result<Vec<GitLabReviewer>, AppError> {
        self.get_json(&format!(
            "{}/reviewers",
            Self::merge_request_endpoint(project_path, mr_iid)
        ))
        .await
    }

    /// Get approval status for a merge request.
    pub async fn get_mr_approvals(
        &self,
        project_path: &str,
        mr_iid: u64,
    ) -> Result<MergeRequestApprovals, AppError> {
        self.get_json(&format!(
            "{}/approvals",
            Self::merge_request_endpoint(project_path, mr_iid)
        ))
        .await
    }

    /// Pipelines of a merge request, newest first.
    pub async fn list_mr_pipelines(
        &self,
        project_path: &str,
        mr_iid: u64,
    ) -> Result<Vec<GitLabPipeline>, AppError> {
        self.get_json(&format!(
            "{}/pipelines",
            Self::merge_request_endpoint(project_path, mr_iid)
        ))
        .await
    }

    /// Jobs of a pipeline.
    pub async fn get_pipeline_jobs(
        &self,
        project_path: &str,
        pipeline_id: i64,
    ) -> Result<Vec<GitLabJob>, AppError> {
        let endpoint = format!(
            "/projects/{}/pipelines/{}/jobs",
            urlencoding::encode(project_path),
            pipeline_id
        );
        self.get_all_pages(&endpoint, None::<&()>).await
    }

    async fn open_merge_requests(
        &self,
        query: MergeRequestsQuery,
    ) -> Result<Vec<PullRequest>, AppError> {
        let mrs = self.list_merge_requests(&query).await?;
        log::debug!("[gitlab] Listed {} open merge request(s)", mrs.len());
        Ok(mrs.into_iter().map(merge_request_to_pull_request).collect())
    }
}

/// Extract project path from an MR web URL.
///
/// e.g., "https://gitlab.com/group/project/-/merge_requests/1" -> "group/project"
pub fn extract_project_path(web_url: &str) -> String {
    let Some(mr_idx) = web_url.find("/-/merge_requests") else {
        return String::new();
    };
    let before = &web_url[..mr_idx];

    // Skip the scheme and host
    match before.find("://") {
        Some(scheme_end) => {
            let after_scheme = &before[scheme_end + 3..];
            match after_scheme.find('/') {
                Some(slash) => after_scheme[slash + 1..].to_string(),
                None => String::new(),
            }
        }
        None => String::new(),
    }
}

fn merge_request_to_pull_request(mr: GitLabMergeRequest) -> PullRequest {
    PullRequest {
        id: PullRequest::make_id(ProviderKind::GitLab, mr.id),
        provider: ProviderKind::GitLab,
        number: mr.iid.max(0) as u64,
        repo_full_name: extract_project_path(&mr.web_url),
        title: mr.title,
        url: mr.web_url,
        source_branch: mr.source_branch,
        author: mr.author.into(),
        state: PullRequestState::from(mr.state.as_str()),
        change_stats: ChangeStats::default(),
        check_status: CheckStatus::unknown(),
        review_status: ReviewStatus::default(),
        created_at: mr.created_at,
        updated_at: mr.updated_at,
    }
}

/// Count added and removed lines in a unified diff.
fn count_diff_lines(diff: &str) -> (u64, u64) {
    let mut additions = 0;
    let mut deletions = 0;
    for line in diff.lines() {
        if line.starts_with('+') && !line.starts_with("+++") {
            additions += 1;
        } else if line.starts_with('-') && !line.starts_with("---") {
            deletions += 1;
        }
    }
    (additions, deletions)
}

fn change_stats_from_diff(version: &GitLabDiffVersion) -> ChangeStats {
    let (additions, deletions) = version
        .diffs
        .iter()
        .map(|d| count_diff_lines(&d.diff))
        .fold((0, 0), |(a, d), (fa, fd)| (a + fa, d + fd));

    ChangeStats {
        additions,
        deletions,
        files_changed: version.diffs.len() as u64,
    }
}

/// Translate a job into the check-run vocabulary.
fn job_to_check_run(job: GitLabJob) -> CheckRun {
    let (raw_status, conclusion) = match job.status.as_str() {
        "success" => ("completed", Some("success")),
        "failed" if job.allow_failure => ("completed", Some("neutral")),
        "failed" => ("completed", Some("failure")),
        "canceled" => ("completed", Some("cancelled")),
        "skipped" => ("completed", Some("skipped")),
        "manual" => ("completed", Some("neutral")),
        "running" => ("in_progress", None),
        _ => ("queued", None),
    };
    CheckRun::new(job.name, raw_status, conclusion)
}

/// Approvals first, then reviewer states, so an explicit change request
/// recorded on the reviewer entry wins over an older approval.
fn submitted_reviews(
    approvals: MergeRequestApprovals,
    reviewers: Vec<GitLabReviewer>,
) -> Vec<SubmittedReview> {
    let approved = approvals.approved_by.into_iter().map(|a| {
        SubmittedReview::new(
            a.user.username,
            a.user.avatar_url.unwrap_or_default(),
            ReviewState::Approved,
        )
    });

    let assigned = reviewers.into_iter().filter_map(|r| {
        let state = match r.state.as_str() {
            "requested_changes" => ReviewState::ChangesRequested,
            "approved" => ReviewState::Approved,
            "reviewed" => ReviewState::Commented,
            "unapproved" => ReviewState::Dismissed,
            _ => return None,
        };
        Some(SubmittedReview::new(
            r.user.username,
            r.user.avatar_url.unwrap_or_default(),
            state,
        ))
    });

    approved.chain(assigned).collect()
}

#[async_trait]
impl PrProvider for GitLabClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GitLab
    }

    async fn authenticate(&self) -> Result<User, AppError> {
        let user = self.current_user().await?;
        let _ = self.username.set(user.username.clone());
        Ok(user.into())
    }

    async fn search_own_open_pull_requests(&self) -> Result<Vec<PullRequest>, AppError> {
        self.open_merge_requests(MergeRequestsQuery::open_by_scope("created_by_me"))
            .await
    }

    async fn search_review_requested_pull_requests(&self) -> Result<Vec<PullRequest>, AppError> {
        let username = self.username().await?.to_string();
        self.open_merge_requests(MergeRequestsQuery {
            reviewer_username: Some(username),
            ..MergeRequestsQuery::open_by_scope("all")
        })
        .await
    }

    async fn get_pull_request_detail(
        &self,
        repo: &str,
        number: u64,
    ) -> Result<PullRequestDetail, AppError> {
        let (mr, diff, reviewers) = tokio::try_join!(
            self.get_merge_request_by_path(repo, number),
            self.get_merge_request_diff(repo, number),
            self.list_reviewers(repo, number),
        )?;

        Ok(PullRequestDetail {
            branch_name: mr.source_branch,
            change_stats: change_stats_from_diff(&diff),
            requested_reviewer_logins: reviewers
                .into_iter()
                .filter(|r| r.state == "unreviewed")
                .map(|r| r.user.username)
                .collect(),
            head_sha: mr.sha,
        })
    }

    // Pipelines are listed per merge request, so the head commit is not needed.
    async fn get_check_status(
        &self,
        repo: &str,
        number: u64,
        _head_sha: Option<&str>,
    ) -> Result<CheckStatus, AppError> {
        let pipelines = self.list_mr_pipelines(repo, number).await?;
        let Some(latest) = pipelines.into_iter().next() else {
            return Ok(CheckStatus::unknown());
        };

        let runs = self
            .get_pipeline_jobs(repo, latest.id)
            .await?
            .into_iter()
            .map(job_to_check_run)
            .collect();
        Ok(status::check_status_from_runs(runs))
    }

    async fn get_review_status(
        &self,
        repo: &str,
        number: u64,
        requested_reviewer_logins: &[String],
    ) -> Result<ReviewStatus, AppError> {
        let (approvals, reviewers) = tokio::try_join!(
            self.get_mr_approvals(repo, number),
            self.list_reviewers(repo, number),
        )?;
        Ok(status::reduce_reviews(
            &submitted_reviews(approvals, reviewers),
            requested_reviewer_logins,
        ))
    }
}
