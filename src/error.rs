use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("The stats is already collected for today.")]
    AlreadyCollected,
    #[error("stats API returned error status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("stats API did not acknowledge the submission (status `{0}`)")]
    UnexpectedAck(String),
    #[error("stats API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid stats API URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}
