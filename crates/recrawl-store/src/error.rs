use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open store at {0}: {1}")]
    Connect(String, #[source] sqlx::Error),
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[source] sqlx::Error),
    #[error("failed to decode stored value: {0}")]
    Decode(String),
}
