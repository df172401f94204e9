use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use url::Url;

use crate::error::{DashError, Result};

use super::types::{Branch, Job, Pipeline, Project};

const REQUEST_TIMEOUT_SECONDS: u64 = 10;

/// GitLab REST API client.
///
/// Issues read-only calls against the v4 API. Holds no pipeline state and
/// never retries: the watcher's next scheduled cycle is the retry policy.
pub struct GitLabClient {
    client: Client,
    api_url: Url,
}

impl GitLabClient {
    /// Creates a client for the given GitLab instance.
    ///
    /// # Arguments
    ///
    /// * `base_url` - GitLab instance base URL (e.g., <https://gitlab.com>)
    /// * `token` - Private access token sent as the `PRIVATE-TOKEN` header
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the token contains
    /// characters that cannot appear in a header value.
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let token_value = HeaderValue::from_str(token)
            .map_err(|e| DashError::Config(format!("Invalid GitLab token: {e}")))?;
        headers.insert("PRIVATE-TOKEN", token_value);

        let client = Client::builder()
            .user_agent("pipedash/0.3.0")
            .default_headers(headers)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()
            .map_err(|e| DashError::Config(format!("Failed to create HTTP client: {e}")))?;

        let api_url = Url::parse(base_url)
            .map_err(|e| DashError::Config(format!("Invalid base URL: {e}")))?
            .join("api/v4/")
            .map_err(|e| DashError::Config(format!("Invalid API base URL: {e}")))?;

        Ok(Self { client, api_url })
    }

    /// Lists all projects visible to the token.
    pub async fn projects(&self) -> Result<Vec<Project>> {
        self.get_collection("projects").await
    }

    /// Lists pipelines for a project, most recently updated first.
    pub async fn project_pipelines(&self, project_id: u64) -> Result<Vec<Pipeline>> {
        self.get_collection(&format!("projects/{project_id}/pipelines"))
            .await
    }

    /// Lists all jobs of a pipeline.
    pub async fn pipeline_jobs(&self, project_id: u64, pipeline_id: u64) -> Result<Vec<Job>> {
        self.get_collection(&format!(
            "projects/{project_id}/pipelines/{pipeline_id}/jobs"
        ))
        .await
    }

    /// Lists repository branches for a project.
    pub async fn project_branches(&self, project_id: u64) -> Result<Vec<Branch>> {
        self.get_collection(&format!("projects/{project_id}/repository/branches"))
            .await
    }

    async fn get_collection<T>(&self, path: &str) -> Result<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = self
            .api_url
            .join(path)
            .map_err(|e| DashError::Config(format!("Invalid API path '{path}': {e}")))?;

        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(DashError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}
