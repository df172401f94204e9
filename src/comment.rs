use std::time::Duration;

use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DashError, Result};
use crate::watcher::StageJobMap;

const COMPLETION_MODEL: &str = "gpt-3.5-turbo-instruct";
const COMPLETION_TEMPERATURE: f32 = 1.0;
const COMPLETION_MAX_TOKENS: u32 = 100;
const REQUEST_TIMEOUT_SECONDS: u64 = 20;

/// Job counts across every stage bucket of a stage map.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JobCounters {
    pub pending: usize,
    pub running: usize,
    pub success: usize,
    pub failed: usize,
    pub canceled: usize,
}

impl JobCounters {
    pub fn from_stage_map(stages: &StageJobMap) -> Self {
        let mut counters = Self::default();
        for entry in stages.values().flatten() {
            match entry.status.as_str() {
                "pending" => counters.pending += 1,
                "running" => counters.running += 1,
                "success" => counters.success += 1,
                "failed" => counters.failed += 1,
                "canceled" => counters.canceled += 1,
                _ => {}
            }
        }
        counters
    }

    fn total(&self) -> usize {
        self.pending + self.running + self.success + self.failed + self.canceled
    }

    /// Share of jobs no longer waiting or running. 100 when there are no jobs.
    pub fn progress_pct(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 100.0;
        }
        100.0 - (self.pending + self.running) as f64 / total as f64 * 100.0
    }

    /// Successful share of concluded jobs. 100 when nothing has concluded.
    pub fn success_rate(&self) -> f64 {
        let denominator = self.success + self.failed + self.canceled;
        if denominator == 0 {
            return 100.0;
        }
        self.success as f64 / denominator as f64 * 100.0
    }

    /// Failed-or-canceled share against decided jobs. 100 when none decided.
    pub fn fail_rate(&self) -> f64 {
        let denominator = self.success + self.failed;
        if denominator == 0 {
            return 100.0;
        }
        (self.failed + self.canceled) as f64 / denominator as f64 * 100.0
    }

    /// The completion prompt for this set of counters. Also serves as the
    /// memoization key: unchanged pipeline state derives the same prompt.
    pub fn prompt(&self) -> String {
        format!(
            "Bref commentaire rigolo en français d'une pipeline de tests actuellement \
             à {}% de progression qui a {}% de réussite et {}% d'échec:",
            self.progress_pct() as i64,
            self.success_rate() as i64,
            self.fail_rate() as i64,
        )
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    text: String,
}

/// Generates the short dashboard comment from aggregate pipeline state.
///
/// Keeps a capacity-one cache of the last `(prompt, comment)` pair: the
/// backend is only called when the derived prompt actually changed between
/// cycles, which keeps rate-limit exposure bounded by real state changes.
pub struct CommentGenerator {
    client: Client,
    completions_url: Url,
    api_key: String,
    last_prompt: Option<String>,
    last_comment: String,
}

impl CommentGenerator {
    /// # Arguments
    ///
    /// * `base_url` - Completion backend base URL (e.g., <https://api.openai.com>)
    /// * `api_key` - Bearer credential for the backend
    pub fn new(base_url: &str, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent("pipedash/0.3.0")
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()
            .map_err(|e| DashError::Config(format!("Failed to create HTTP client: {e}")))?;

        let completions_url = Url::parse(base_url)
            .map_err(|e| DashError::Config(format!("Invalid completion base URL: {e}")))?
            .join("v1/completions")
            .map_err(|e| DashError::Config(format!("Invalid completion URL: {e}")))?;

        Ok(Self {
            client,
            completions_url,
            api_key,
            last_prompt: None,
            last_comment: String::new(),
        })
    }

    /// Returns a comment for the current stage map, reusing the cached one
    /// when the derived prompt is unchanged since the previous cycle.
    ///
    /// # Errors
    ///
    /// Backend failures surface as `CommentGeneration`; the cache keeps the
    /// last successful pair so the caller can fall back to `last_comment`.
    pub async fn comment_for(&mut self, stages: &StageJobMap) -> Result<String> {
        let prompt = JobCounters::from_stage_map(stages).prompt();

        if self.last_prompt.as_deref() == Some(prompt.as_str()) {
            debug!("Pipeline state unchanged, reusing cached comment");
            return Ok(self.last_comment.clone());
        }

        let comment = self.complete(&prompt).await?;
        self.last_prompt = Some(prompt);
        self.last_comment = comment.clone();
        Ok(comment)
    }

    /// The most recent successfully generated comment; empty before the
    /// first success.
    pub fn last_comment(&self) -> &str {
        &self.last_comment
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = CompletionRequest {
            model: COMPLETION_MODEL,
            prompt,
            temperature: COMPLETION_TEMPERATURE,
            max_tokens: COMPLETION_MAX_TOKENS,
        };

        let response = self
            .client
            .post(self.completions_url.clone())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| DashError::CommentGeneration(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DashError::CommentGeneration(format!(
                "backend returned status {status}"
            )));
        }

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| DashError::CommentGeneration(e.to_string()))?;

        let text = body
            .choices
            .first()
            .map(|choice| choice.text.as_str())
            .unwrap_or_default();

        Ok(text.trim_matches('\n').trim_matches('"').to_string())
    }
}
