//! Partial failure tests.
//!
//! A sub-fetch failure on one pull request degrades only that item. The
//! list still carries every other item fully enriched, and the cycle still
//! persists a snapshot.

mod common;

use std::sync::Arc;

use common::{github_config, pr, start_beacon, wait_for_event, FakeProvider};
use pr_beacon::models::{CheckOverall, ReviewOverall};
use pr_beacon::services::provider::{Enrichment, PrProvider, SubFetch};
use pr_beacon::services::scheduler_events::SNAPSHOT_UPDATED_EVENT;
use pr_beacon::services::{MemoryCredentialStore, SchedulerEvent};
use tempfile::tempdir;

#[tokio::test]
async fn test_failed_check_fetch_degrades_only_that_item() {
    let provider = FakeProvider::with_lists(vec![pr(1, 1), pr(2, 2), pr(3, 3)], Vec::new());
    provider.failing_checks.lock().unwrap().insert(2);

    let items = provider.list_own_open_pull_requests().await.unwrap();
    assert_eq!(items.len(), 3);

    for item in &items {
        let pull_request = &item.pull_request;
        if pull_request.number == 2 {
            assert_eq!(item.failed_stages(), vec![SubFetch::Checks]);
            assert_eq!(pull_request.check_status.overall, CheckOverall::Unknown);
            assert!(pull_request.check_status.runs.is_empty());
            // The other sub-fetches of the same item still landed
            assert_eq!(pull_request.review_status.overall, ReviewOverall::Approved);
            assert_eq!(pull_request.change_stats.additions, 20);
        } else {
            assert!(matches!(item.enrichment, Enrichment::Complete));
            assert_eq!(pull_request.check_status.overall, CheckOverall::Success);
            assert_eq!(pull_request.check_status.runs.len(), 1);
            assert_eq!(pull_request.review_status.overall, ReviewOverall::Approved);
        }
    }
}

#[tokio::test]
async fn test_degraded_items_are_persisted_with_safe_defaults() {
    let dir = tempdir().unwrap();
    let provider = FakeProvider::with_lists(vec![pr(1, 1), pr(2, 2)], vec![pr(3, 3)]);
    provider.failing_checks.lock().unwrap().extend([1, 3]);

    let beacon = start_beacon(dir.path(), provider.clone(), Arc::new(MemoryCredentialStore::new())).await;
    let mut events = beacon.scheduler.subscribe();
    beacon.connect(github_config()).await.unwrap();

    match wait_for_event(&mut events, SNAPSHOT_UPDATED_EVENT).await {
        SchedulerEvent::SnapshotUpdated {
            my_prs,
            review_requested_prs,
            degraded,
            ..
        } => {
            assert_eq!(degraded, 2);
            assert_eq!(my_prs.len(), 2);
            assert_eq!(review_requested_prs.len(), 1);
        }
        other => panic!("unexpected event {:?}", other),
    }

    let snapshot = beacon.scheduler.snapshot().await.unwrap().unwrap();
    let own_one = snapshot.my_prs.iter().find(|p| p.number == 1).unwrap();
    assert_eq!(own_one.check_status.overall, CheckOverall::Unknown);
    assert!(own_one.check_status.runs.is_empty());

    let own_two = snapshot.my_prs.iter().find(|p| p.number == 2).unwrap();
    assert_eq!(own_two.check_status.overall, CheckOverall::Success);

    assert_eq!(
        snapshot.review_requested_prs[0].check_status.overall,
        CheckOverall::Unknown
    );
}
