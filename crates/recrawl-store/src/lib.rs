//! On-disk stores for the recrawl engine: the persistent half of the DNS
//! cache, the seed loader, and the sharded result/failure/verify stores.
//! All stores are SQLite files accessed through `sqlx`, opened with
//! `journal_mode=WAL` / `synchronous=NORMAL` (see [`pool`]).

pub mod dns_cache;
pub mod error;
pub mod failure_store;
pub mod pool;
pub mod result_store;
pub mod seed;
pub mod verify_store;

pub use dns_cache::DnsCacheStore;
pub use error::StoreError;
pub use failure_store::{FailureSink, FailureStore};
pub use result_store::ResultStore;
pub use seed::SeedLoader;
pub use verify_store::{VerifyRunMeta, VerifyStore};
