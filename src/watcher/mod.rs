mod aggregator;
mod selector;
mod snapshot;

pub use snapshot::{JobEntry, PipelineSnapshot, StageJobMap};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::comment::CommentGenerator;
use crate::error::{DashError, Result};
use crate::gitlab::{GitLabClient, Pipeline};

/// Settling delay at the top of each cycle, before the fetch fan-out.
const WARMUP_DELAY: Duration = Duration::from_millis(500);

/// Shared read handle over the published snapshot.
pub type SharedSnapshot = Arc<RwLock<PipelineSnapshot>>;

/// Cooperative stop signal for the watcher loop, checked once per iteration.
/// In-flight HTTP calls run to completion or their own timeout.
#[derive(Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Background poller that keeps the published snapshot current.
///
/// Each cycle fetches pipelines across all projects, focuses one, groups
/// its jobs by stage, derives the generated comment and swaps a complete
/// new snapshot in under the write lock. Every fetch and compute step runs
/// outside the lock; the lock scope is the swap itself, so readers only
/// ever see the snapshot from before the cycle or after a successful one.
pub struct PipelineWatcher {
    client: GitLabClient,
    comments: CommentGenerator,
    snapshot: SharedSnapshot,
    stop: Arc<AtomicBool>,
    period: Duration,
}

impl PipelineWatcher {
    pub fn new(client: GitLabClient, comments: CommentGenerator, period: Duration) -> Self {
        Self {
            client,
            comments,
            snapshot: Arc::new(RwLock::new(PipelineSnapshot::default())),
            stop: Arc::new(AtomicBool::new(false)),
            period,
        }
    }

    /// Handle readers use to take lock-scoped copies of the snapshot.
    pub fn snapshot(&self) -> SharedSnapshot {
        Arc::clone(&self.snapshot)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.stop))
    }

    /// Runs the polling loop until the stop handle fires.
    ///
    /// A failed cycle is logged and skipped; the previous snapshot stays
    /// published and the next tick retries. The inter-cycle sleep is
    /// `max(0, period - elapsed)` so the cadence stays bounded regardless
    /// of upstream latency.
    pub async fn run(mut self) {
        info!("Pipeline watcher started (period {:?})", self.period);

        while !self.stop.load(Ordering::Relaxed) {
            let start = Instant::now();
            tokio::time::sleep(WARMUP_DELAY).await;

            if let Err(e) = self.update().await {
                warn!("Cycle skipped, keeping previous snapshot: {e}");
            }

            let elapsed = start.elapsed();
            debug!("Cycle took {elapsed:?}");
            tokio::time::sleep(self.period.saturating_sub(elapsed)).await;
        }

        info!("Pipeline watcher stopped");
    }

    /// One Fetching → Publishing pass.
    ///
    /// Any error before the final swap aborts the whole pass. A comment
    /// backend failure is the one tolerated case: the rest of the snapshot
    /// is published with the last known comment.
    async fn update(&mut self) -> Result<()> {
        let projects = self.client.projects().await?;

        let fetches = projects
            .iter()
            .map(|project| self.client.project_pipelines(project.id));
        let mut pipelines: Vec<Pipeline> = Vec::new();
        for fetched in futures::future::join_all(fetches).await {
            pipelines.extend(fetched?);
        }

        let focused = selector::select_focused(pipelines)?;
        let project = projects
            .iter()
            .find(|project| project.id == focused.project_id)
            .ok_or(DashError::NoPipeline)?;

        let (jobs, branches) = tokio::try_join!(
            self.client.pipeline_jobs(focused.project_id, focused.id),
            self.client.project_branches(focused.project_id),
        )?;

        let stages_jobs_map = aggregator::build_stage_map(jobs)?;
        let repository_name = aggregator::repository_name(project);
        let branch_name = aggregator::branch_name(&branches, &focused.sha);

        let pipeline_comment = match self.comments.comment_for(&stages_jobs_map).await {
            Ok(comment) => comment,
            Err(e) => {
                warn!("Publishing without a fresh comment: {e}");
                self.comments.last_comment().to_string()
            }
        };

        let mut published = self.snapshot.write().await;
        *published = PipelineSnapshot {
            repository_name,
            branch_name,
            stages_jobs_map,
            update_counter: published.update_counter + 1,
            pipeline_comment,
        };
        info!(
            "Published snapshot #{} for {}:{}",
            published.update_counter, published.repository_name, published.branch_name
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watcher_for(gitlab: &mockito::ServerGuard, openai: &mockito::ServerGuard) -> PipelineWatcher {
        let client = GitLabClient::new(&gitlab.url(), "glpat-test").unwrap();
        let comments = CommentGenerator::new(&openai.url(), "sk-test".to_string()).unwrap();
        PipelineWatcher::new(client, comments, Duration::from_secs(5))
    }

    async fn mock_happy_gitlab(server: &mut mockito::ServerGuard) {
        server
            .mock("GET", "/api/v4/projects")
            .with_status(200)
            .with_body(r#"[{"id": 7, "name": "agc-python3-widgets"}]"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/v4/projects/7/pipelines")
            .with_status(200)
            .with_body(
                r#"[{
                    "id": 42,
                    "project_id": 7,
                    "status": "running",
                    "updated_at": "2024-03-01T10:00:00Z",
                    "sha": "abcdef1234567890"
                }]"#,
            )
            .create_async()
            .await;
        server
            .mock("GET", "/api/v4/projects/7/pipelines/42/jobs")
            .with_status(200)
            .with_body(
                r#"[
                    {
                        "name": "compile",
                        "stage": "build",
                        "status": "success",
                        "created_at": "2024-03-01T09:00:00Z",
                        "started_at": "2024-03-01T09:01:00Z",
                        "finished_at": "2024-03-01T09:10:00Z"
                    },
                    {
                        "name": "unit-tests",
                        "stage": "test",
                        "status": "running",
                        "created_at": "2024-03-01T09:00:00Z",
                        "started_at": "2024-03-01T09:11:00Z",
                        "finished_at": null
                    }
                ]"#,
            )
            .create_async()
            .await;
        server
            .mock("GET", "/api/v4/projects/7/repository/branches")
            .with_status(200)
            .with_body(
                r#"[{"name": "feature_login", "commit": {"id": "abcdef1234567890"}}]"#,
            )
            .create_async()
            .await;
    }

    async fn mock_completion(server: &mut mockito::ServerGuard, expect: usize) -> mockito::Mock {
        server
            .mock("POST", "/v1/completions")
            .with_status(200)
            .with_body(r#"{"choices": [{"text": "\"On y est presque\""}]}"#)
            .expect(expect)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_successful_cycle_publishes_snapshot() {
        let mut gitlab = mockito::Server::new_async().await;
        let mut openai = mockito::Server::new_async().await;
        mock_happy_gitlab(&mut gitlab).await;
        mock_completion(&mut openai, 1).await;

        let mut watcher = watcher_for(&gitlab, &openai);
        watcher.update().await.unwrap();

        let snapshot = watcher.snapshot();
        let published = snapshot.read().await;
        assert_eq!(published.update_counter, 1);
        assert_eq!(published.repository_name, "widgets");
        assert_eq!(published.branch_name, "login");
        assert_eq!(published.pipeline_comment, "On y est presque");

        let stages: Vec<&str> = published.stages_jobs_map.keys().map(String::as_str).collect();
        assert_eq!(stages, vec!["build", "test"]);
    }

    #[tokio::test]
    async fn test_unchanged_state_reuses_comment_and_advances_counter() {
        let mut gitlab = mockito::Server::new_async().await;
        let mut openai = mockito::Server::new_async().await;
        mock_happy_gitlab(&mut gitlab).await;
        let completion = mock_completion(&mut openai, 1).await;

        let mut watcher = watcher_for(&gitlab, &openai);
        watcher.update().await.unwrap();
        watcher.update().await.unwrap();

        // Identical job state derives the same prompt: exactly one backend call
        completion.assert_async().await;

        let snapshot = watcher.snapshot();
        let published = snapshot.read().await;
        assert_eq!(published.update_counter, 2);
        assert_eq!(published.pipeline_comment, "On y est presque");
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_snapshot_untouched() {
        let mut gitlab = mockito::Server::new_async().await;
        let openai = mockito::Server::new_async().await;
        gitlab
            .mock("GET", "/api/v4/projects")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let mut watcher = watcher_for(&gitlab, &openai);
        assert!(watcher.update().await.is_err());

        let snapshot = watcher.snapshot();
        let published = snapshot.read().await;
        assert_eq!(published.update_counter, 0);
        assert!(published.stages_jobs_map.is_empty());
        assert!(published.repository_name.is_empty());
    }

    #[tokio::test]
    async fn test_no_pipelines_skips_cycle() {
        let mut gitlab = mockito::Server::new_async().await;
        let openai = mockito::Server::new_async().await;
        gitlab
            .mock("GET", "/api/v4/projects")
            .with_status(200)
            .with_body(r#"[{"id": 7, "name": "widgets"}]"#)
            .create_async()
            .await;
        gitlab
            .mock("GET", "/api/v4/projects/7/pipelines")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let mut watcher = watcher_for(&gitlab, &openai);
        let err = watcher.update().await.unwrap_err();
        assert!(matches!(err, DashError::NoPipeline));

        let snapshot = watcher.snapshot();
        assert_eq!(snapshot.read().await.update_counter, 0);
    }

    #[tokio::test]
    async fn test_missing_timestamp_fails_cycle() {
        let mut gitlab = mockito::Server::new_async().await;
        let openai = mockito::Server::new_async().await;
        gitlab
            .mock("GET", "/api/v4/projects")
            .with_status(200)
            .with_body(r#"[{"id": 7, "name": "widgets"}]"#)
            .create_async()
            .await;
        gitlab
            .mock("GET", "/api/v4/projects/7/pipelines")
            .with_status(200)
            .with_body(
                r#"[{
                    "id": 42,
                    "project_id": 7,
                    "status": "running",
                    "updated_at": "2024-03-01T10:00:00Z",
                    "sha": "abcdef1234567890"
                }]"#,
            )
            .create_async()
            .await;
        gitlab
            .mock("GET", "/api/v4/projects/7/pipelines/42/jobs")
            .with_status(200)
            .with_body(
                r#"[{
                    "name": "stuck",
                    "stage": "test",
                    "status": "running",
                    "created_at": "2024-03-01T09:00:00Z",
                    "started_at": null,
                    "finished_at": null
                }]"#,
            )
            .create_async()
            .await;
        gitlab
            .mock("GET", "/api/v4/projects/7/repository/branches")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let mut watcher = watcher_for(&gitlab, &openai);
        let err = watcher.update().await.unwrap_err();
        assert!(matches!(err, DashError::MissingTimestamp { .. }));

        let snapshot = watcher.snapshot();
        assert_eq!(snapshot.read().await.update_counter, 0);
    }

    #[tokio::test]
    async fn test_comment_failure_still_publishes() {
        let mut gitlab = mockito::Server::new_async().await;
        let mut openai = mockito::Server::new_async().await;
        mock_happy_gitlab(&mut gitlab).await;
        openai
            .mock("POST", "/v1/completions")
            .with_status(500)
            .with_body("overloaded")
            .create_async()
            .await;

        let mut watcher = watcher_for(&gitlab, &openai);
        watcher.update().await.unwrap();

        let snapshot = watcher.snapshot();
        let published = snapshot.read().await;
        assert_eq!(published.update_counter, 1);
        // No prior successful generation: sentinel empty comment
        assert_eq!(published.pipeline_comment, "");
        assert_eq!(published.repository_name, "widgets");
    }

    #[tokio::test]
    async fn test_readers_never_observe_partial_snapshot() {
        let mut gitlab = mockito::Server::new_async().await;
        let mut openai = mockito::Server::new_async().await;
        mock_happy_gitlab(&mut gitlab).await;
        mock_completion(&mut openai, 1).await;

        let mut watcher = watcher_for(&gitlab, &openai);
        let snapshot = watcher.snapshot();

        let writer = tokio::spawn(async move {
            for _ in 0..5 {
                watcher.update().await.unwrap();
            }
        });

        // Readers poll while cycles publish: every observed value must be
        // either the pre-cycle sentinel or a complete published snapshot,
        // never a mixture such as an advanced counter with empty fields.
        let mut readers = Vec::new();
        for _ in 0..4 {
            let snapshot = Arc::clone(&snapshot);
            readers.push(tokio::spawn(async move {
                let mut last_counter = 0;
                for _ in 0..50 {
                    let published = snapshot.read().await.clone();
                    if published.update_counter == 0 {
                        assert!(published.repository_name.is_empty());
                        assert!(published.stages_jobs_map.is_empty());
                    } else {
                        assert_eq!(published.repository_name, "widgets");
                        assert_eq!(published.branch_name, "login");
                        assert_eq!(published.pipeline_comment, "On y est presque");
                        assert!(!published.stages_jobs_map.is_empty());
                    }
                    assert!(published.update_counter >= last_counter);
                    last_counter = published.update_counter;
                    tokio::task::yield_now().await;
                }
            }));
        }

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }

        assert_eq!(snapshot.read().await.update_counter, 5);
    }

    #[tokio::test]
    async fn test_stop_handle_ends_loop() {
        let gitlab = mockito::Server::new_async().await;
        let openai = mockito::Server::new_async().await;

        let watcher = watcher_for(&gitlab, &openai);
        let stop = watcher.stop_handle();
        stop.stop();

        // Stop flag is checked at the top of the loop: run returns without
        // attempting a cycle against the (mock-less) servers.
        tokio::time::timeout(Duration::from_secs(1), watcher.run())
            .await
            .expect("watcher should exit immediately once stopped");
    }
}
