//! Status aggregation.
//!
//! Pure reductions from raw provider data to display-ready verdicts:
//! - check runs → [`CheckStatus`]
//! - submitted reviews + outstanding review requests → [`ReviewStatus`]
//! - both statuses → [`HealthIndicator`]
//!
//! None of these functions hold state; calling them twice on the same input
//! yields the same output.

use std::collections::HashMap;

use crate::models::{
    CheckOverall, CheckRun, CheckStatus, HealthIndicator, ReviewOverall, ReviewState,
    ReviewStatus, Reviewer, SubmittedReview,
};

/// Conclusions that fail the whole status, even with runs still in flight.
const FAILING_CONCLUSIONS: &[&str] = &[
    "failure",
    "timed_out",
    "cancelled",
    "startup_failure",
    "action_required",
];

/// Conclusions that count towards overall success.
const PASSING_CONCLUSIONS: &[&str] = &["success", "skipped", "neutral"];

fn conclusion_of(run: &CheckRun) -> Option<String> {
    run.raw_conclusion.as_deref().map(str::to_lowercase)
}

fn is_completed(run: &CheckRun) -> bool {
    run.raw_status.eq_ignore_ascii_case("completed")
}

/// Reduce check runs to a single verdict.
///
/// Precedence: no runs → unknown; any failing conclusion → failure; all
/// completed and all passing → success; anything else → pending. A completed
/// run with an unrecognized conclusion (e.g. `stale`) keeps the status at
/// pending.
pub fn reduce_check_runs(runs: &[CheckRun]) -> CheckOverall {
    if runs.is_empty() {
        return CheckOverall::Unknown;
    }

    let failed = runs.iter().any(|run| {
        conclusion_of(run).is_some_and(|c| FAILING_CONCLUSIONS.contains(&c.as_str()))
    });
    if failed {
        return CheckOverall::Failure;
    }

    if runs.iter().all(is_completed) {
        let all_passing = runs.iter().all(|run| {
            conclusion_of(run).is_some_and(|c| PASSING_CONCLUSIONS.contains(&c.as_str()))
        });
        return if all_passing {
            CheckOverall::Success
        } else {
            CheckOverall::Pending
        };
    }

    CheckOverall::Pending
}

/// Build a [`CheckStatus`] from raw runs, keeping their order.
pub fn check_status_from_runs(runs: Vec<CheckRun>) -> CheckStatus {
    CheckStatus {
        overall: reduce_check_runs(&runs),
        runs,
    }
}

/// Reduce submitted reviews to a [`ReviewStatus`].
///
/// `reviews` must be in the provider's chronological order. Comment-only and
/// pending reviews are dropped, each login keeps its latest verdict, and any
/// login in `requested_reviewer_logins` loses its verdict entirely because a
/// re-request supersedes it. An outstanding request always prevents
/// `approved`.
pub fn reduce_reviews(
    reviews: &[SubmittedReview],
    requested_reviewer_logins: &[String],
) -> ReviewStatus {
    let mut pending_reviewers: Vec<String> = Vec::new();
    for login in requested_reviewer_logins {
        if !pending_reviewers.contains(login) {
            pending_reviewers.push(login.clone());
        }
    }

    // Latest binding review per login, keeping first-seen order.
    let mut latest: Vec<Reviewer> = Vec::new();
    let mut index_by_login: HashMap<&str, usize> = HashMap::new();
    for review in reviews.iter().filter(|r| r.state.is_binding()) {
        let reviewer = Reviewer {
            login: review.login.clone(),
            avatar_url: review.avatar_url.clone(),
            state: review.state.clone(),
        };
        match index_by_login.get(review.login.as_str()) {
            Some(&idx) => latest[idx] = reviewer,
            None => {
                index_by_login.insert(review.login.as_str(), latest.len());
                latest.push(reviewer);
            }
        }
    }

    let reviewers: Vec<Reviewer> = latest
        .into_iter()
        .filter(|r| !pending_reviewers.contains(&r.login))
        .collect();

    let any_changes_requested = reviewers
        .iter()
        .any(|r| r.state == ReviewState::ChangesRequested);

    let overall = if any_changes_requested {
        ReviewOverall::ChangesRequested
    } else if !pending_reviewers.is_empty() || reviewers.is_empty() {
        ReviewOverall::Pending
    } else if reviewers.iter().all(|r| r.state == ReviewState::Approved) {
        ReviewOverall::Approved
    } else {
        ReviewOverall::Pending
    };

    ReviewStatus {
        overall,
        reviewers,
        pending_reviewers,
    }
}

/// Combine CI and review status into the presentation bucket.
pub fn health(checks: &CheckStatus, reviews: &ReviewStatus) -> HealthIndicator {
    let approved = reviews.overall == ReviewOverall::Approved;

    match checks.overall {
        CheckOverall::Success | CheckOverall::Unknown if approved => HealthIndicator::Healthy,
        CheckOverall::Failure if !approved => HealthIndicator::Blocked,
        _ => HealthIndicator::Attention,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(status: &str, conclusion: Option<&str>) -> CheckRun {
        CheckRun::new("ci", status, conclusion)
    }

    fn review(login: &str, state: ReviewState) -> SubmittedReview {
        SubmittedReview::new(login, format!("https://avatars.example/{}", login), state)
    }

    fn logins(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_runs_are_unknown() {
        assert_eq!(reduce_check_runs(&[]), CheckOverall::Unknown);
    }

    #[test]
    fn test_failure_preempts_in_progress_runs() {
        let runs = vec![
            run("completed", Some("failure")),
            run("in_progress", None),
        ];
        assert_eq!(reduce_check_runs(&runs), CheckOverall::Failure);
    }

    #[test]
    fn test_every_failing_conclusion_fails() {
        for conclusion in FAILING_CONCLUSIONS {
            let runs = vec![run("queued", None), run("completed", Some(*conclusion))];
            assert_eq!(reduce_check_runs(&runs), CheckOverall::Failure, "{}", conclusion);
        }
    }

    #[test]
    fn test_all_passing_is_success() {
        let runs = vec![
            run("completed", Some("success")),
            run("completed", Some("skipped")),
            run("completed", Some("neutral")),
        ];
        assert_eq!(reduce_check_runs(&runs), CheckOverall::Success);
    }

    #[test]
    fn test_stale_conclusion_is_pending() {
        let runs = vec![run("completed", Some("success")), run("completed", Some("stale"))];
        assert_eq!(reduce_check_runs(&runs), CheckOverall::Pending);
    }

    #[test]
    fn test_incomplete_runs_are_pending() {
        let runs = vec![run("completed", Some("success")), run("queued", None)];
        assert_eq!(reduce_check_runs(&runs), CheckOverall::Pending);
    }

    #[test]
    fn test_check_matching_ignores_case() {
        let runs = vec![run("COMPLETED", Some("SUCCESS"))];
        assert_eq!(reduce_check_runs(&runs), CheckOverall::Success);
    }

    #[test]
    fn test_check_status_keeps_run_order() {
        let status = check_status_from_runs(vec![
            CheckRun::new("lint", "completed", Some("success")),
            CheckRun::new("test", "in_progress", None),
        ]);
        assert_eq!(status.overall, CheckOverall::Pending);
        assert_eq!(status.runs[0].name, "lint");
        assert_eq!(status.runs[1].name, "test");
    }

    #[test]
    fn test_no_reviews_is_pending() {
        let status = reduce_reviews(&[], &[]);
        assert_eq!(status.overall, ReviewOverall::Pending);
        assert!(status.reviewers.is_empty());
        assert!(status.pending_reviewers.is_empty());
    }

    #[test]
    fn test_all_approved() {
        let reviews = vec![review("a", ReviewState::Approved), review("b", ReviewState::Approved)];
        let status = reduce_reviews(&reviews, &[]);
        assert_eq!(status.overall, ReviewOverall::Approved);
        assert_eq!(status.reviewers.len(), 2);
    }

    #[test]
    fn test_rerequest_clears_changes_requested() {
        let reviews = vec![review("a", ReviewState::ChangesRequested)];
        let status = reduce_reviews(&reviews, &logins(&["a"]));
        assert_eq!(status.overall, ReviewOverall::Pending);
        assert!(status.reviewers.is_empty());
        assert_eq!(status.pending_reviewers, logins(&["a"]));
    }

    #[test]
    fn test_pending_reviewer_never_listed_with_verdict() {
        let reviews = vec![
            review("a", ReviewState::Approved),
            review("b", ReviewState::ChangesRequested),
        ];
        let status = reduce_reviews(&reviews, &logins(&["b"]));
        for login in &status.pending_reviewers {
            assert!(status.reviewers.iter().all(|r| &r.login != login));
        }
    }

    #[test]
    fn test_outstanding_request_blocks_approval() {
        let reviews = vec![review("a", ReviewState::Approved)];
        let status = reduce_reviews(&reviews, &logins(&["b"]));
        assert_eq!(status.overall, ReviewOverall::Pending);
        assert_eq!(status.reviewers.len(), 1);
    }

    #[test]
    fn test_remaining_changes_requested_wins_over_request() {
        let reviews = vec![
            review("a", ReviewState::ChangesRequested),
            review("b", ReviewState::ChangesRequested),
        ];
        let status = reduce_reviews(&reviews, &logins(&["a"]));
        assert_eq!(status.overall, ReviewOverall::ChangesRequested);
        assert_eq!(status.reviewers.len(), 1);
        assert_eq!(status.reviewers[0].login, "b");
    }

    #[test]
    fn test_latest_review_per_login_wins() {
        let reviews = vec![
            review("a", ReviewState::ChangesRequested),
            review("b", ReviewState::Approved),
            review("a", ReviewState::Approved),
        ];
        let status = reduce_reviews(&reviews, &[]);
        assert_eq!(status.overall, ReviewOverall::Approved);
        assert_eq!(status.reviewers[0].login, "a");
        assert_eq!(status.reviewers[0].state, ReviewState::Approved);
    }

    #[test]
    fn test_comments_do_not_override_verdict() {
        let reviews = vec![
            review("a", ReviewState::Approved),
            review("a", ReviewState::Commented),
            review("c", ReviewState::Pending),
        ];
        let status = reduce_reviews(&reviews, &[]);
        assert_eq!(status.overall, ReviewOverall::Approved);
        assert_eq!(status.reviewers.len(), 1);
    }

    #[test]
    fn test_dismissed_review_prevents_approval() {
        let reviews = vec![
            review("a", ReviewState::Approved),
            review("b", ReviewState::Dismissed),
        ];
        let status = reduce_reviews(&reviews, &[]);
        assert_eq!(status.overall, ReviewOverall::Pending);
    }

    #[test]
    fn test_duplicate_requests_are_collapsed() {
        let status = reduce_reviews(&[], &logins(&["a", "a", "b"]));
        assert_eq!(status.pending_reviewers, logins(&["a", "b"]));
    }

    #[test]
    fn test_reductions_are_idempotent() {
        let runs = vec![run("completed", Some("success")), run("in_progress", None)];
        assert_eq!(reduce_check_runs(&runs), reduce_check_runs(&runs));

        let reviews = vec![
            review("a", ReviewState::ChangesRequested),
            review("b", ReviewState::Approved),
        ];
        let requested = logins(&["a"]);
        assert_eq!(
            reduce_reviews(&reviews, &requested),
            reduce_reviews(&reviews, &requested)
        );
    }

    #[test]
    fn test_health_buckets() {
        let approved = reduce_reviews(&[review("a", ReviewState::Approved)], &[]);
        let pending = ReviewStatus::default();

        let success = check_status_from_runs(vec![run("completed", Some("success"))]);
        let failure = check_status_from_runs(vec![run("completed", Some("failure"))]);
        let running = check_status_from_runs(vec![run("in_progress", None)]);

        assert_eq!(health(&success, &approved), HealthIndicator::Healthy);
        assert_eq!(health(&CheckStatus::unknown(), &approved), HealthIndicator::Healthy);
        assert_eq!(health(&failure, &pending), HealthIndicator::Blocked);
        assert_eq!(health(&failure, &approved), HealthIndicator::Attention);
        assert_eq!(health(&running, &approved), HealthIndicator::Attention);
        assert_eq!(health(&success, &pending), HealthIndicator::Attention);
    }
}
