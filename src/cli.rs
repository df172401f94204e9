use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::info;

use crate::comment::CommentGenerator;
use crate::gitlab::GitLabClient;
use crate::meetings::{MeetingReminder, O365Credentials};
use crate::message::MessageBoard;
use crate::server::{self, AppState};
use crate::watcher::PipelineWatcher;

#[derive(Parser)]
#[command(name = "pipedash")]
#[command(author, version, about = "Live GitLab pipeline dashboard", long_about = None)]
pub struct Cli {
    /// GitLab instance base URL
    #[arg(long, env = "GITLAB_URL", default_value = "https://gitlab.com")]
    gitlab_url: String,

    /// GitLab private access token used for polling
    #[arg(long, env = "GITLAB_TOKEN")]
    gitlab_token: String,

    /// Completion backend base URL
    #[arg(long, env = "OPENAI_URL", default_value = "https://api.openai.com")]
    openai_url: String,

    /// Completion backend API key
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_api_key: String,

    /// Address the dashboard API listens on
    #[arg(short, long, default_value = "127.0.0.1:5000")]
    bind: SocketAddr,

    /// Polling period in seconds
    #[arg(short, long, default_value_t = 5)]
    period: u64,

    #[arg(long, env = "O365_CLIENT_ID")]
    o365_client_id: Option<String>,

    #[arg(long, env = "O365_CLIENT_SECRET")]
    o365_client_secret: Option<String>,

    #[arg(long, env = "O365_TENANT_ID")]
    o365_tenant_id: Option<String>,
}

impl Cli {
    pub async fn execute(&self) -> Result<()> {
        let client = GitLabClient::new(&self.gitlab_url, &self.gitlab_token)?;
        let comments = CommentGenerator::new(&self.openai_url, self.openai_api_key.clone())?;
        let watcher = PipelineWatcher::new(client, comments, Duration::from_secs(self.period));

        let state = AppState {
            snapshot: watcher.snapshot(),
            board: MessageBoard::new(),
            meetings: self.meeting_reminder()?,
        };

        let stop = watcher.stop_handle();
        let watcher_task = tokio::spawn(watcher.run());

        tokio::select! {
            result = server::run(self.bind, state) => result?,
            _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
        }

        stop.stop();
        let _ = watcher_task.await;

        Ok(())
    }

    fn meeting_reminder(&self) -> Result<Option<Arc<MeetingReminder>>> {
        let credentials = match (
            &self.o365_client_id,
            &self.o365_client_secret,
            &self.o365_tenant_id,
        ) {
            (Some(client_id), Some(client_secret), Some(tenant_id)) => O365Credentials {
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
                tenant_id: tenant_id.clone(),
            },
            _ => {
                info!("O365 credentials not configured, meeting listing disabled");
                return Ok(None);
            }
        };

        Ok(Some(Arc::new(MeetingReminder::new(credentials)?)))
    }
}
