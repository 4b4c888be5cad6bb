//! Combined health indicator for presentation.

use serde::{Deserialize, Serialize};

/// Three-way bucket derived from CI and review status. Computed on demand,
/// never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthIndicator {
    Healthy,
    Attention,
    Blocked,
}

impl std::fmt::Display for HealthIndicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Attention => write!(f, "attention"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}
