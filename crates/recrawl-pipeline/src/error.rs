use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}
