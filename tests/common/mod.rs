//! Shared fixtures for the integration tests: a scriptable provider, pull
//! request builders and event helpers.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use pr_beacon::error::AppError;
use pr_beacon::models::{
    ChangeStats, CheckRun, CheckStatus, ProviderConfig, ProviderKind, PullRequest,
    PullRequestState, ReviewState, ReviewStatus, SubmittedReview, User,
};
use pr_beacon::services::provider::{PrProvider, PullRequestDetail};
use pr_beacon::services::{
    status, MemoryCredentialStore, ProviderRegistry, SchedulerEvent, SchedulerOptions,
    SchedulerState,
};
use pr_beacon::Beacon;
use tokio::sync::{broadcast, Notify};

/// Provider whose responses and failures are switched at runtime.
#[derive(Default)]
pub struct FakeProvider {
    pub own: Mutex<Vec<PullRequest>>,
    pub review_requested: Mutex<Vec<PullRequest>>,

    /// Calls to the own-list search; one per cycle.
    pub search_calls: AtomicUsize,

    /// While set, the own-list search waits for `gate`.
    pub gated: AtomicBool,
    pub gate: Notify,

    /// Searches that have blocked on `gate`.
    pub parked: AtomicUsize,

    pub fail_search: AtomicBool,
    pub reject_auth: AtomicBool,

    /// Pull request numbers whose check lookup fails.
    pub failing_checks: Mutex<HashSet<u64>>,
}

impl FakeProvider {
    pub fn with_lists(own: Vec<PullRequest>, review_requested: Vec<PullRequest>) -> Arc<Self> {
        Arc::new(Self {
            own: Mutex::new(own),
            review_requested: Mutex::new(review_requested),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn parked(&self) -> usize {
        self.parked.load(Ordering::SeqCst)
    }

    pub fn close_gate(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    pub fn open_gate(&self) {
        self.gated.store(false, Ordering::SeqCst);
        // Stores a permit if the search has not started waiting yet.
        self.gate.notify_one();
    }
}

#[async_trait]
impl PrProvider for FakeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GitHub
    }

    async fn authenticate(&self) -> Result<User, AppError> {
        if self.reject_auth.load(Ordering::SeqCst) {
            return Err(AppError::authentication_expired_for(
                "Bad credentials",
                "https://api.github.com",
            ));
        }
        Ok(User::new("me", Some("Me Myself".to_string()), None))
    }

    async fn search_own_open_pull_requests(&self) -> Result<Vec<PullRequest>, AppError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if self.gated.load(Ordering::SeqCst) {
            self.parked.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
        }
        if self.fail_search.load(Ordering::SeqCst) {
            return Err(AppError::provider_api_full("Bad gateway", 502, "/search/issues"));
        }
        Ok(self.own.lock().unwrap().clone())
    }

    async fn search_review_requested_pull_requests(&self) -> Result<Vec<PullRequest>, AppError> {
        Ok(self.review_requested.lock().unwrap().clone())
    }

    async fn get_pull_request_detail(
        &self,
        _repo: &str,
        number: u64,
    ) -> Result<PullRequestDetail, AppError> {
        Ok(PullRequestDetail {
            branch_name: format!("feature/{}", number),
            change_stats: ChangeStats {
                additions: number * 10,
                deletions: number,
                files_changed: 1,
            },
            requested_reviewer_logins: Vec::new(),
            head_sha: Some(format!("{:040x}", number)),
        })
    }

    async fn get_check_status(
        &self,
        _repo: &str,
        number: u64,
        _head_sha: Option<&str>,
    ) -> Result<CheckStatus, AppError> {
        if self.failing_checks.lock().unwrap().contains(&number) {
            return Err(AppError::network("Request timed out"));
        }
        Ok(status::check_status_from_runs(vec![CheckRun::new(
            "build",
            "completed",
            Some("success"),
        )]))
    }

    async fn get_review_status(
        &self,
        _repo: &str,
        _number: u64,
        requested: &[String],
    ) -> Result<ReviewStatus, AppError> {
        Ok(status::reduce_reviews(
            &[SubmittedReview::new("alice", "", ReviewState::Approved)],
            requested,
        ))
    }
}

/// An open pull request as search returns it; `day` orders by update time.
pub fn pr(number: u64, day: u32) -> PullRequest {
    let at = Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap();
    PullRequest {
        id: PullRequest::make_id(ProviderKind::GitHub, 1000 + number),
        provider: ProviderKind::GitHub,
        number,
        title: format!("Change {}", number),
        url: format!("https://github.com/acme/app/pull/{}", number),
        repo_full_name: "acme/app".to_string(),
        source_branch: String::new(),
        author: User::new("me", None, None),
        state: PullRequestState::Open,
        change_stats: ChangeStats::default(),
        check_status: CheckStatus::unknown(),
        review_status: ReviewStatus::default(),
        created_at: at,
        updated_at: at,
    }
}

/// Registry whose GitHub factory always hands out `provider`.
pub fn registry_for(provider: Arc<FakeProvider>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(ProviderKind::GitHub, move |_| {
        Ok(provider.clone() as Arc<dyn PrProvider>)
    });
    registry
}

/// Start an instance in `dir` backed by `provider` and an in-memory
/// credential store.
pub async fn start_beacon(
    dir: &Path,
    provider: Arc<FakeProvider>,
    credentials: Arc<MemoryCredentialStore>,
) -> Beacon {
    pr_beacon::start_with(dir, registry_for(provider), credentials)
        .await
        .unwrap()
}

/// Like [`start_beacon`], with one interval minute lasting `minute`.
pub async fn start_beacon_with_minute(
    dir: &Path,
    provider: Arc<FakeProvider>,
    credentials: Arc<MemoryCredentialStore>,
    minute: Duration,
) -> Beacon {
    pr_beacon::start_with_options(
        dir,
        registry_for(provider),
        credentials,
        SchedulerOptions { minute },
    )
    .await
    .unwrap()
}

pub fn github_config() -> ProviderConfig {
    ProviderConfig::new(ProviderKind::GitHub, None, "ghp_test")
}

/// Wait for the next event with the given name.
pub async fn wait_for_event(
    rx: &mut broadcast::Receiver<SchedulerEvent>,
    name: &str,
) -> SchedulerEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await {
                Ok(event) if event.name() == name => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event channel closed: {}", e),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", name))
}

/// Poll `condition` until it holds.
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Wait until the scheduler is no longer fetching.
pub async fn wait_for_idle(beacon: &Beacon) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while beacon.scheduler.status().await.state == SchedulerState::Fetching {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("scheduler still fetching");
}
