use thiserror::Error;

/// Errors surfaced by the recrawl engine's library crates.
///
/// Fetch-time and resolution-time failures are recovered locally and turned
/// into [`crate::FailedDomain`] / [`crate::FailedURL`] rows rather than this
/// error type — `RecrawlError` is for the catastrophic paths that abort a
/// run (cannot open a store, cannot parse configuration).
#[derive(Error, Debug)]
pub enum RecrawlError {
    #[error("network error: {0}")]
    Network(String),

    #[error("timeout after {0}s")]
    Timeout(u64),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RecrawlError>;
