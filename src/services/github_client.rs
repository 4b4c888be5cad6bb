//! GitHub REST API backend.
//!
//! Uses the issue search API to find pull requests, then the pulls,
//! check-runs and reviews endpoints to enrich them. Works against
//! github.com (`https://api.github.com`) and GitHub Enterprise
//! (`https://host/api/v3`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::AppError;
use crate::models::{
    ChangeStats, CheckRun, CheckStatus, ProviderConfig, ProviderKind, PullRequest,
    PullRequestState, ReviewStatus, SubmittedReview, User,
};
use crate::services::provider::{PrProvider, PullRequestDetail};
use crate::services::status;

const USER_AGENT: &str = concat!("pr-beacon/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "2022-11-28";

/// GitHub API client configuration.
#[derive(Clone)]
pub struct GitHubClientConfig {
    /// API base URL (e.g., `https://api.github.com`).
    pub base_url: String,

    /// Bearer token.
    pub token: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Page size for search and list calls (max 100).
    pub per_page: u32,

    /// Upper bound on pages followed per listing.
    pub max_pages: u32,
}

impl Default for GitHubClientConfig {
    fn default() -> Self {
        Self {
            base_url: ProviderKind::GitHub.default_base_url().to_string(),
            token: String::new(),
            timeout_secs: 30,
            per_page: 100,
            // Search stops at 1000 results anyway.
            max_pages: 10,
        }
    }
}

impl From<&ProviderConfig> for GitHubClientConfig {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            token: config.token.clone(),
            ..Default::default()
        }
    }
}

/// GitHub API client.
#[derive(Clone)]
pub struct GitHubClient {
    client: Client,
    config: GitHubClientConfig,
}

/// GitHub user from API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubUser {
    pub login: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

impl From<GitHubUser> for User {
    fn from(user: GitHubUser) -> Self {
        User::new(user.login, user.name, user.avatar_url)
    }
}

/// Response of `GET /search/issues`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubSearchResponse {
    pub total_count: u64,
    #[serde(default)]
    pub incomplete_results: bool,
    pub items: Vec<GitHubSearchItem>,
}

/// Issue search hit that is a pull request.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubSearchItem {
    pub id: u64,
    pub number: u64,
    pub title: String,
    pub html_url: String,
    /// `https://api.github.com/repos/{owner}/{repo}`
    pub repository_url: String,
    pub state: String,
    pub user: GitHubUser,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub pull_request: Option<GitHubSearchPullRequestRef>,
}

/// `pull_request` marker on a search hit.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubSearchPullRequestRef {
    pub merged_at: Option<DateTime<Utc>>,
}

/// Head ref of a pull request.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubHead {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
}

/// Response of `GET /repos/{repo}/pulls/{number}`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubPullRequest {
    pub number: u64,
    pub state: String,
    #[serde(default)]
    pub merged: bool,
    pub head: GitHubHead,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    #[serde(default)]
    pub changed_files: u64,
    #[serde(default)]
    pub requested_reviewers: Vec<GitHubUser>,
}

/// Response of `GET /repos/{repo}/commits/{sha}/check-runs`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubCheckRunsResponse {
    pub total_count: u64,
    pub check_runs: Vec<GitHubCheckRun>,
}

/// One check run.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubCheckRun {
    pub name: String,
    pub status: String,
    pub conclusion: Option<String>,
}

/// One submitted review from `GET /repos/{repo}/pulls/{number}/reviews`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubReview {
    /// Missing when the reviewer account was deleted.
    pub user: Option<GitHubUser>,
    pub state: String,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl GitHubClient {
    /// Create a new GitHub client.
    pub fn new(config: GitHubClientConfig) -> Result<Self, AppError> {
        let mut headers = header::HeaderMap::new();

        let token_value = header::HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|_| AppError::authentication("Invalid token format"))?;
        headers.insert(header::AUTHORIZATION, token_value);
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            header::HeaderValue::from_static(API_VERSION),
        );

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Build a provider from onboarding configuration.
    pub fn from_provider_config(config: &ProviderConfig) -> Result<Self, AppError> {
        Self::new(GitHubClientConfig::from(config))
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Map the response to `T` or to the error taxonomy.
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
                "GitHub token expired or revoked. Please reconnect.",
                &self.config.base_url,
            ));
        }

        let status_code = status.as_u16();
        let body = response.text().await.unwrap_or_default();
        let body_message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("message")?.as_str().map(String::from));

        let message = match (status, &body_message) {
            // GitHub reports primary rate limits as 403 with this message
            (StatusCode::FORBIDDEN, Some(msg)) if msg.contains("rate limit") => {
                "Rate limit exceeded".to_string()
            }
            (StatusCode::FORBIDDEN, _) => "Access denied".to_string(),
            (StatusCode::NOT_FOUND, _) => "Resource not found".to_string(),
            (StatusCode::TOO_MANY_REQUESTS, _) => "Rate limit exceeded".to_string(),
            (_, Some(msg)) => msg.clone(),
            _ => format!("Request failed ({}): {}", status_code, body),
        };

        Err(AppError::provider_api_full(message, status_code, endpoint))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T, AppError> {
        let response = self
            .client
            .get(self.api_url(endpoint))
            .query(query)
            .send()
            .await?;
        self.handle_response(response, endpoint).await
    }

    /// Fetch every page of a listing by following `Link: rel="next"`.
    ///
    /// `items` pulls the entries out of one page body. Stops after
    /// `max_pages` with a warning.
    async fn get_all_pages<P, T>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
        items: impl Fn(P) -> Vec<T>,
    ) -> Result<Vec<T>, AppError>
    where
        P: DeserializeOwned,
    {
        let mut all_data = Vec::new();
        let mut request = self.client.get(self.api_url(endpoint)).query(query);
        let mut pages = 0u32;

        loop {
            let response = request.send().await?;
            let next = next_link(response.headers());
            let page: P = self.handle_response(response, endpoint).await?;
            all_data.extend(items(page));
            pages += 1;

            match next {
                Some(_) if pages >= self.config.max_pages => {
                    log::warn!(
                        "[github] {} truncated after {} page(s), {} item(s)",
                        endpoint,
                        pages,
                        all_data.len()
                    );
                    break;
                }
                // The next link already carries the query.
                Some(url) => request = self.client.get(url),
                None => break,
            }
        }

        Ok(all_data)
    }

    /// Search open pull requests matching `qualifier` (e.g. `author:@me`).
    pub async fn search_open_pull_requests(
        &self,
        qualifier: &str,
    ) -> Result<Vec<GitHubSearchItem>, AppError> {
        let query = format!("is:pr is:open archived:false {}", qualifier);
        let items = self
            .get_all_pages(
                "/search/issues",
                &[
                    ("q", query),
                    ("sort", "updated".to_string()),
                    ("order", "desc".to_string()),
                    ("per_page", self.config.per_page.to_string()),
                ],
                |page: GitHubSearchResponse| {
                    if page.incomplete_results {
                        log::warn!("[github] Search results incomplete (server timeout)");
                    }
                    page.items
                },
            )
            .await?;

        log::debug!("[github] Search '{}' returned {} item(s)", qualifier, items.len());

        Ok(items
            .into_iter()
            .filter(|item| item.pull_request.is_some())
            .collect())
    }

    /// Fetch a single pull request.
    pub async fn get_pull_request(
        &self,
        repo: &str,
        number: u64,
    ) -> Result<GitHubPullRequest, AppError> {
        self.get_json(&format!("/repos/{}/pulls/{}", repo, number), &[])
            .await
    }

    /// Fetch check runs for a commit.
    pub async fn list_check_runs(
        &self,
        repo: &str,
        sha: &str,
    ) -> Result<Vec<GitHubCheckRun>, AppError> {
        self.get_all_pages(
            &format!("/repos/{}/commits/{}/check-runs", repo, sha),
            &[("per_page", self.config.per_page.to_string())],
            |page: GitHubCheckRunsResponse| page.check_runs,
        )
        .await
    }

    /// Fetch submitted reviews in chronological order, across all pages.
    pub async fn list_reviews(&self, repo: &str, number: u64) -> Result<Vec<GitHubReview>, AppError> {
        self.get_all_pages(
            &format!("/repos/{}/pulls/{}/reviews", repo, number),
            &[("per_page", self.config.per_page.to_string())],
            std::convert::identity::<Vec<GitHubReview>>,
        )
        .await
    }
}

/// URL of the next page from a `Link` header.
///
/// e.g., `<https://api.github.com/...&page=2>; rel="next", <...>; rel="last"`
fn next_link(headers: &header::HeaderMap) -> Option<String> {
    let link = headers.get(header::LINK)?.to_str().ok()?;
    link.split(',').find_map(|entry| {
        let (target, params) = entry.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|param| param.trim().replace(' ', "") == "rel=\"next\"");
        let target = target.trim();
        if is_next && target.starts_with('<') && target.ends_with('>') {
            Some(target[1..target.len() - 1].to_string())
        } else {
            None
        }
    })
}

/// Extract `owner/repo` from a `repository_url`.
///
/// e.g., "https://api.github.com/repos/octo/hello" -> "octo/hello"
fn repo_from_repository_url(repository_url: &str) -> String {
    match repository_url.find("/repos/") {
        Some(idx) => repository_url[idx + "/repos/".len()..]
            .trim_end_matches('/')
            .to_string(),
        None => String::new(),
    }
}

fn search_item_to_pull_request(item: GitHubSearchItem) -> PullRequest {
    let state = match &item.pull_request {
        Some(pr) if pr.merged_at.is_some() => PullRequestState::Merged,
        _ => PullRequestState::from(item.state.as_str()),
    };

    PullRequest {
        id: PullRequest::make_id(ProviderKind::GitHub, item.id),
        provider: ProviderKind::GitHub,
        number: item.number,
        title: item.title,
        url: item.html_url,
        repo_full_name: repo_from_repository_url(&item.repository_url),
        source_branch: String::new(),
        author: item.user.into(),
        state,
        change_stats: ChangeStats::default(),
        check_status: CheckStatus::unknown(),
        review_status: ReviewStatus::default(),
        created_at: item.created_at,
        updated_at: item.updated_at,
    }
}

fn detail_from_pull_request(pr: GitHubPullRequest) -> PullRequestDetail {
    PullRequestDetail {
        branch_name: pr.head.ref_name,
        change_stats: ChangeStats {
            additions: pr.additions,
            deletions: pr.deletions,
            files_changed: pr.changed_files,
        },
        requested_reviewer_logins: pr
            .requested_reviewers
            .into_iter()
            .map(|u| u.login)
            .collect(),
        head_sha: Some(pr.head.sha),
    }
}

fn submitted_reviews(reviews: Vec<GitHubReview>) -> Vec<SubmittedReview> {
    reviews
        .into_iter()
        .filter_map(|review| {
            let user = review.user?;
            Some(SubmittedReview::new(
                user.login,
                user.avatar_url.unwrap_or_default(),
                review.state.as_str().into(),
            ))
        })
        .collect()
}

#[async_trait]
impl PrProvider for GitHubClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GitHub
    }

    async fn authenticate(&self) -> Result<User, AppError> {
        let user: GitHubUser = self.get_json("/user", &[]).await?;
        Ok(user.into())
    }

    async fn search_own_open_pull_requests(&self) -> Result<Vec<PullRequest>, AppError> {
        let items = self.search_open_pull_requests("author:@me").await?;
        Ok(items.into_iter().map(search_item_to_pull_request).collect())
    }

    async fn search_review_requested_pull_requests(&self) -> Result<Vec<PullRequest>, AppError> {
        let items = self
            .search_open_pull_requests("review-requested:@me")
            .await?;
        Ok(items.into_iter().map(search_item_to_pull_request).collect())
    }

    async fn get_pull_request_detail(
        &self,
        repo: &str,
        number: u64,
    ) -> Result<PullRequestDetail, AppError> {
        let pr = self.get_pull_request(repo, number).await?;
        Ok(detail_from_pull_request(pr))
    }

    async fn get_check_status(
        &self,
        repo: &str,
        number: u64,
        head_sha: Option<&str>,
    ) -> Result<CheckStatus, AppError> {
        // Check runs hang off the head commit, not the pull request.
        let sha = match head_sha {
            Some(sha) => sha.to_string(),
            None => self.get_pull_request(repo, number).await?.head.sha,
        };
        let runs = self
            .list_check_runs(repo, &sha)
            .await?
            .into_iter()
            .map(|run| CheckRun {
                name: run.name,
                raw_status: run.status,
                raw_conclusion: run.conclusion,
            })
            .collect();
        Ok(status::check_status_from_runs(runs))
    }

    async fn get_review_status(
        &self,
        repo: &str,
        number: u64,
        requested_reviewer_logins: &[String],
    ) -> Result<ReviewStatus, AppError> {
        let reviews = self.list_reviews(repo, number).await?;
        Ok(status::reduce_reviews(
            &submitted_reviews(reviews),
            requested_reviewer_logins,
        ))
    }
}
