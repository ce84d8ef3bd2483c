//! Sharded, multi-resolver DNS pre-resolver with a persistent cache.
//!
//! [`DnsResolver`] is the public entry point: it owns a [`shard::ShardedDnsCache`]
//! keyed by FNV-1a(domain) mod shard count, and queries the system resolver,
//! Google (8.8.8.8), and Cloudflare (1.1.1.1) independently through the
//! [`upstream::UpstreamResolver`] trait.

pub mod classify;
pub mod resolver;
pub mod shard;
pub mod upstream;

pub use resolver::{BatchProgress, DnsResolver};
pub use shard::ShardedDnsCache;
pub use upstream::{
    cloudflare_upstream, default_upstreams, google_upstream, system_upstream, LookupError,
    UpstreamResolver,
};
