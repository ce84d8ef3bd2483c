use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    #[error("store error: {0}")]
    Store(#[from] recrawl_store::StoreError),
}
