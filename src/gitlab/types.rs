use chrono::{DateTime, Utc};
use serde::Deserialize;

/// A GitLab project visible to the polling token.
#[derive(Debug, Clone, Deserialize)]
pub struct Project {
    pub id: u64,
    /// Project name as configured on the server (e.g., "agc-python3-widgets")
    pub name: String,
}

/// A CI pipeline as returned by the v4 pipelines listing.
///
/// Only the fields the watcher needs for selection and branch resolution
/// are decoded; everything else in the payload is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct Pipeline {
    pub id: u64,
    pub project_id: u64,
    /// Pipeline status (e.g., "running", "pending", "success", "failed")
    pub status: String,
    pub updated_at: DateTime<Utc>,
    /// Commit hash the pipeline ran against
    pub sha: String,
}

/// A job within a pipeline.
///
/// The three timestamps drive the aggregation sort order; GitLab reports
/// them as null until the job reaches the corresponding state.
#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    pub name: String,
    /// Stage this job belongs to
    pub stage: String,
    /// Job status (e.g., "running", "pending", "success", "failed", "canceled")
    pub status: String,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A repository branch, used to resolve a human-readable name for the
/// focused pipeline's commit.
#[derive(Debug, Clone, Deserialize)]
pub struct Branch {
    pub name: String,
    pub commit: Commit,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Commit {
    pub id: String,
}
