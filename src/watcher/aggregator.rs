use chrono::{DateTime, Utc};

use crate::error::{DashError, Result};
use crate::gitlab::{Branch, Job, Project};

use super::snapshot::{JobEntry, StageJobMap};

/// Project name tokens stripped when deriving the displayed repository name.
const REPOSITORY_NAME_TOKENS: [&str; 2] = ["agc-", "python3-"];

/// Branch name token stripped for display.
const BRANCH_NAME_TOKEN: &str = "feature_";

/// How many characters of the commit hash stand in for a missing branch.
const SHA_DISPLAY_LEN: usize = 8;

/// Groups the focused pipeline's jobs by stage, in display order.
///
/// Jobs are bucketed by status (`running`, `pending`, everything else
/// counts as ended) and each bucket is sorted by the timestamp that marks
/// its lifecycle step: started, created, finished respectively. The stage
/// map then appends ended jobs first, running next, pending last, so each
/// stage reads settled work before in-flight work before queued work.
///
/// # Errors
///
/// A job missing the timestamp its bucket sorts on fails the whole
/// aggregation; the watcher keeps the previous snapshot rather than
/// publishing partially ordered data.
pub fn build_stage_map(jobs: Vec<Job>) -> Result<StageJobMap> {
    let mut running = Vec::new();
    let mut pending = Vec::new();
    let mut ended = Vec::new();

    for job in jobs {
        match job.status.as_str() {
            "running" => running.push(job),
            "pending" => pending.push(job),
            _ => ended.push(job),
        }
    }

    let running = sort_bucket(running, |job| job.started_at, "started_at")?;
    let pending = sort_bucket(pending, |job| job.created_at, "created_at")?;
    let ended = sort_bucket(ended, |job| job.finished_at, "finished_at")?;

    let mut stage_map = StageJobMap::new();
    for job in ended.iter().chain(running.iter()).chain(pending.iter()) {
        stage_map
            .entry(job.stage.clone())
            .or_default()
            .push(JobEntry::new(job.name.clone(), job.status.clone()));
    }

    Ok(stage_map)
}

fn sort_bucket(
    mut bucket: Vec<Job>,
    key: fn(&Job) -> Option<DateTime<Utc>>,
    field: &'static str,
) -> Result<Vec<Job>> {
    for job in &bucket {
        if key(job).is_none() {
            return Err(DashError::MissingTimestamp {
                job: job.name.clone(),
                field,
            });
        }
    }
    bucket.sort_by_key(key);
    Ok(bucket)
}

/// Derives the displayed repository name from the project name, with the
/// internal naming tokens removed.
pub fn repository_name(project: &Project) -> String {
    let mut name = project.name.clone();
    for token in REPOSITORY_NAME_TOKENS {
        name = name.replace(token, "");
    }
    name
}

/// Resolves the displayed branch name for the focused pipeline's commit.
///
/// A commit with no matching branch is an expected case (detached or
/// deleted refs), not an error: the truncated hash is shown instead.
pub fn branch_name(branches: &[Branch], sha: &str) -> String {
    match branches.iter().find(|branch| branch.commit.id == sha) {
        Some(branch) => branch.name.replace(BRANCH_NAME_TOKEN, ""),
        None => sha.chars().take(SHA_DISPLAY_LEN).collect(),
    }
}
