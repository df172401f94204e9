use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashError {
    #[error("CI API request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("no pipeline available across any project")]
    NoPipeline,

    #[error("job '{job}' is missing required timestamp '{field}'")]
    MissingTimestamp { job: String, field: &'static str },

    #[error("comment generation failed: {0}")]
    CommentGeneration(String),
}

pub type Result<T> = std::result::Result<T, DashError>;
