use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Stage name mapped to the jobs shown for that stage, in display order.
///
/// Insertion order is significant on both levels: stages appear in
/// first-seen order, and each stage's jobs read "settled work, then
/// in-flight work, then queued work".
pub type StageJobMap = IndexMap<String, Vec<JobEntry>>;

/// A single job line in the dashboard, serialized as `{"job-name": "status"}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEntry {
    pub name: String,
    pub status: String,
}

impl JobEntry {
    pub fn new(name: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: status.into(),
        }
    }
}

impl Serialize for JobEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.name, &self.status)?;
        map.end()
    }
}

/// The single published view of the focused pipeline.
///
/// Replaced wholesale under the write lock on each successful poll cycle;
/// readers always observe a fully-formed value, never a half-updated one.
/// `update_counter` advances by exactly one per successful publish, so a
/// stalled counter is the only observable sign of persistent upstream
/// failures.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineSnapshot {
    pub repository_name: String,
    pub branch_name: String,
    #[serde(rename = "stages")]
    pub stages_jobs_map: StageJobMap,
    pub update_counter: u64,
    pub pipeline_comment: String,
}
