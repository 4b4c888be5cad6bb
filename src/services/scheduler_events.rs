//! Scheduler event types.
//!
//! Emitted on the scheduler's broadcast channel so the presentation layer
//! can react without polling status.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::PullRequest;

/// Event name: a cycle began.
pub const FETCH_STARTED_EVENT: &str = "fetch-started";

/// Event name: a new snapshot was persisted.
pub const SNAPSHOT_UPDATED_EVENT: &str = "snapshot-updated";

/// Event name: the badge count changed or was recomputed.
pub const BADGE_UPDATED_EVENT: &str = "badge-updated";

/// Event name: a cycle was abandoned; the previous snapshot stays current.
pub const CYCLE_FAILED_EVENT: &str = "cycle-failed";

/// Event name: the credential was rejected and polling disarmed.
pub const AUTH_EXPIRED_EVENT: &str = "auth-expired";

/// Something the scheduler did.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum SchedulerEvent {
    FetchStarted,

    #[serde(rename_all = "camelCase")]
    SnapshotUpdated {
        my_prs: Vec<PullRequest>,
        review_requested_prs: Vec<PullRequest>,
        /// Items whose enrichment was incomplete.
        degraded: usize,
        fetched_at: DateTime<Utc>,
    },

    BadgeUpdated { count: usize },

    CycleFailed { message: String },

    AuthExpired { message: String },
}

impl SchedulerEvent {
    /// Stable event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FetchStarted => FETCH_STARTED_EVENT,
            Self::SnapshotUpdated { .. } => SNAPSHOT_UPDATED_EVENT,
            Self::BadgeUpdated { .. } => BADGE_UPDATED_EVENT,
            Self::CycleFailed { .. } => CYCLE_FAILED_EVENT,
            Self::AuthExpired { .. } => AUTH_EXPIRED_EVENT,
        }
    }
}
