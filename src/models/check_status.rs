//! Continuous-integration status of a pull request.

use serde::{Deserialize, Serialize};

/// Aggregated CI verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOverall {
    Success,
    Failure,
    Pending,
    /// No check runs were reported at all.
    Unknown,
}

impl std::fmt::Display for CheckOverall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Pending => write!(f, "pending"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One CI job as reported by the provider, in provider vocabulary
/// (`queued`/`in_progress`/`completed` and conclusions like `success`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRun {
    pub name: String,
    pub raw_status: String,
    pub raw_conclusion: Option<String>,
}

impl CheckRun {
    pub fn new(
        name: impl Into<String>,
        raw_status: impl Into<String>,
        raw_conclusion: Option<&str>,
    ) -> Self {
        Self {
            name: name.into(),
            raw_status: raw_status.into(),
            raw_conclusion: raw_conclusion.map(str::to_string),
        }
    }
}

/// CI status: the reduced verdict plus the runs it was reduced from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckStatus {
    pub overall: CheckOverall,
    pub runs: Vec<CheckRun>,
}

impl CheckStatus {
    /// Safe default used when checks could not be fetched.
    pub fn unknown() -> Self {
        Self {
            overall: CheckOverall::Unknown,
            runs: Vec::new(),
        }
    }
}

impl Default for CheckStatus {
    fn default() -> Self {
        Self::unknown()
    }
}
