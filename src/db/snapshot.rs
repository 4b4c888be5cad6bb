//! Persistence of the last polling snapshot.
//!
//! Both lists and the fetch time share one row and are written by a single
//! statement, so a reader never sees lists from different cycles.

use chrono::{DateTime, Utc};

use super::pool::DbPool;
use super::DbError;
use crate::models::{PollingSnapshot, ProviderKind, PullRequest};

/// Replace the stored snapshot.
pub async fn save_snapshot(pool: &DbPool, snapshot: &PollingSnapshot) -> Result<(), DbError> {
    let my_prs = encode(&snapshot.my_prs)?;
    let review_requested_prs = encode(&snapshot.review_requested_prs)?;

    sqlx::query(
        r#"
        INSERT INTO polling_snapshot (id, my_prs, review_requested_prs, fetched_at)
        VALUES (1, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            my_prs = excluded.my_prs,
            review_requested_prs = excluded.review_requested_prs,
            fetched_at = excluded.fetched_at
        "#,
    )
    .bind(my_prs)
    .bind(review_requested_prs)
    .bind(snapshot.fetched_at.timestamp_millis())
    .execute(pool)
    .await?;

    Ok(())
}

/// Replace the stored snapshot, but only while `kind` at `base_url` is still
/// the configured provider.
///
/// Returns `false` and writes nothing when the configuration was removed or
/// switched since the cycle started. The check and the write are one
/// statement, so a concurrent disconnect either wins outright or clears the
/// row afterwards.
pub async fn save_snapshot_for(
    pool: &DbPool,
    snapshot: &PollingSnapshot,
    kind: ProviderKind,
    base_url: &str,
) -> Result<bool, DbError> {
    let my_prs = encode(&snapshot.my_prs)?;
    let review_requested_prs = encode(&snapshot.review_requested_prs)?;

    let result = sqlx::query(
        r#"
        INSERT INTO polling_snapshot (id, my_prs, review_requested_prs, fetched_at)
        SELECT 1, ?, ?, ?
        WHERE EXISTS (
            SELECT 1 FROM provider_config
            WHERE id = 1 AND provider_kind = ? AND base_url = ?
        )
        ON CONFLICT(id) DO UPDATE SET
            my_prs = excluded.my_prs,
            review_requested_prs = excluded.review_requested_prs,
            fetched_at = excluded.fetched_at
        "#,
    )
    .bind(my_prs)
    .bind(review_requested_prs)
    .bind(snapshot.fetched_at.timestamp_millis())
    .bind(kind.tag())
    .bind(base_url)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Load the stored snapshot, if any cycle has ever succeeded.
pub async fn load_snapshot(pool: &DbPool) -> Result<Option<PollingSnapshot>, DbError> {
    let row: Option<(String, String, i64)> = sqlx::query_as(
        "SELECT my_prs, review_requested_prs, fetched_at FROM polling_snapshot WHERE id = 1",
    )
    .fetch_optional(pool)
    .await?;

    let Some((my_prs, review_requested_prs, fetched_at)) = row else {
        return Ok(None);
    };

    let fetched_at = DateTime::<Utc>::from_timestamp_millis(fetched_at).ok_or_else(|| {
        DbError::Corrupt {
            table: "polling_snapshot",
            message: format!("invalid fetched_at {}", fetched_at),
        }
    })?;

    Ok(Some(PollingSnapshot {
        my_prs: decode(&my_prs)?,
        review_requested_prs: decode(&review_requested_prs)?,
        fetched_at,
    }))
}

/// Forget the stored snapshot (on disconnect).
pub async fn clear_snapshot(pool: &DbPool) -> Result<(), DbError> {
    sqlx::query("DELETE FROM polling_snapshot WHERE id = 1")
        .execute(pool)
        .await?;
    Ok(())
}

fn encode(pull_requests: &[PullRequest]) -> Result<String, DbError> {
    serde_json::to_string(pull_requests).map_err(|e| DbError::Corrupt {
        table: "polling_snapshot",
        message: e.to_string(),
    })
}

fn decode(json: &str) -> Result<Vec<PullRequest>, DbError> {
    serde_json::from_str(json).map_err(|e| DbError::Corrupt {
        table: "polling_snapshot",
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ChangeStats, CheckStatus, PinnedTab, ProviderKind, PullRequestState, ReviewStatus, User,
    };
    use chrono::TimeZone;
    use tempfile::tempdir;

    async fn setup_db() -> (DbPool, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let pool = crate::db::initialize(&dir.path().join("test.db"))
            .await
            .unwrap();
        (pool, dir)
    }

    fn pr(number: u64) -> PullRequest {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        PullRequest {
            id: PullRequest::make_id(ProviderKind::GitHub, number),
            provider: ProviderKind::GitHub,
            number,
            title: format!("PR {}", number),
            url: format!("https://github.com/o/r/pull/{}", number),
            repo_full_name: "o/r".to_string(),
            source_branch: "feature".to_string(),
            author: User::new("me", None, None),
            state: PullRequestState::Open,
            change_stats: ChangeStats {
                additions: 10,
                deletions: 2,
                files_changed: 1,
            },
            check_status: CheckStatus::unknown(),
            review_status: ReviewStatus::default(),
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn test_empty_database_has_no_snapshot() {
        let (pool, _dir) = setup_db().await;
        assert!(load_snapshot(&pool).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_replaces_previous_snapshot() {
        let (pool, _dir) = setup_db().await;
        let fetched_at = Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();

        let first = PollingSnapshot {
            my_prs: vec![pr(1), pr(2)],
            review_requested_prs: vec![pr(3)],
            fetched_at,
        };
        save_snapshot(&pool, &first).await.unwrap();
        assert_eq!(load_snapshot(&pool).await.unwrap(), Some(first));

        let second = PollingSnapshot {
            my_prs: Vec::new(),
            review_requested_prs: vec![pr(4)],
            fetched_at: fetched_at + chrono::Duration::minutes(5),
        };
        save_snapshot(&pool, &second).await.unwrap();

        let loaded = load_snapshot(&pool).await.unwrap().unwrap();
        assert_eq!(loaded.count_for(PinnedTab::MyPrs), 0);
        assert_eq!(loaded.count_for(PinnedTab::ReviewRequested), 1);
        assert_eq!(loaded.fetched_at, second.fetched_at);
    }

    #[tokio::test]
    async fn test_save_for_requires_matching_provider() {
        let (pool, _dir) = setup_db().await;
        let snapshot = PollingSnapshot {
            my_prs: vec![pr(1)],
            review_requested_prs: Vec::new(),
            fetched_at: Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap(),
        };

        // Nothing configured
        let saved = save_snapshot_for(&pool, &snapshot, ProviderKind::GitHub, "https://api.github.com")
            .await
            .unwrap();
        assert!(!saved);
        assert!(load_snapshot(&pool).await.unwrap().is_none());

        crate::db::settings::save_provider_config(&pool, ProviderKind::GitLab, "https://gitlab.com", None)
            .await
            .unwrap();

        // Configured, but for another provider
        let saved = save_snapshot_for(&pool, &snapshot, ProviderKind::GitHub, "https://api.github.com")
            .await
            .unwrap();
        assert!(!saved);
        assert!(load_snapshot(&pool).await.unwrap().is_none());

        let saved = save_snapshot_for(&pool, &snapshot, ProviderKind::GitLab, "https://gitlab.com")
            .await
            .unwrap();
        assert!(saved);
        let stored = load_snapshot(&pool).await.unwrap().unwrap();
        assert_eq!(stored.my_prs.len(), 1);
        assert_eq!(stored.fetched_at, snapshot.fetched_at);
    }

    #[tokio::test]
    async fn test_clear_snapshot() {
        let (pool, _dir) = setup_db().await;
        save_snapshot(
            &pool,
            &PollingSnapshot {
                my_prs: vec![pr(1)],
                review_requested_prs: Vec::new(),
                fetched_at: Utc::now(),
            },
        )
        .await
        .unwrap();

        clear_snapshot(&pool).await.unwrap();
        assert!(load_snapshot(&pool).await.unwrap().is_none());
    }
}
