//! Core types and traits for the recrawl engine.
//!
//! This crate provides the data model shared by every other crate in the
//! workspace:
//! - [`SeedUrl`], [`DomainResolution`], [`FetchResult`], [`FailedDomain`],
//!   [`FailedUrl`], [`VerifyResult`] — the entities that flow through a run.
//! - [`ErrorKind`] — the closed failure taxonomy shared by the failure and
//!   verify stores.
//! - [`RecrawlConfig`] — the run configuration surface.
//! - [`RecrawlError`] — catastrophic (run-aborting) errors.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    DnsConfig, FetchConfig, GeneralConfig, RecrawlConfig, StorageConfig, VerifyConfig,
};
pub use error::{RecrawlError, Result};
pub use types::*;
