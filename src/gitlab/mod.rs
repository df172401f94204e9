mod client;
mod types;

pub use client::GitLabClient;
pub use types::{Branch, Commit, Job, Pipeline, Project};
