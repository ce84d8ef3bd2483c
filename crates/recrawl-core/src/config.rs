use serde::Deserialize;

/// Top-level configuration for a recrawl run.
///
/// Deserialized from TOML; every field has a default so a minimal or empty
/// config file still produces a runnable configuration. See `run.rs` in
/// `recrawl-cli` for the environment-variable overrides layered on top.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecrawlConfig {
    pub general: GeneralConfig,
    pub fetch: FetchConfig,
    pub dns: DnsConfig,
    pub storage: StorageConfig,
    pub verify: VerifyConfig,
}

impl Default for RecrawlConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            fetch: FetchConfig::default(),
            dns: DnsConfig::default(),
            storage: StorageConfig::default(),
            verify: VerifyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Number of concurrent fetch tasks.
    pub workers: usize,
    /// Number of concurrent DNS tasks in pipelined mode.
    pub dns_workers: usize,
    /// Number of independent HTTP client / connection pool shards.
    pub transport_shards: usize,
    /// Skip URLs whose final status is already `done` or `failed`.
    pub resume: bool,
    /// Enable the HTTP probe between DNS and fetch.
    pub two_pass: bool,
    /// Fatal failures on a domain before marking it dead.
    pub domain_fail_threshold: u32,
    /// Record dead domains and failed URLs to the failure store. The
    /// failure store is a null-safe capability: turning this off swaps in
    /// `FailureSink::Null` rather than branching at every call site.
    pub record_failures: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            workers: 200,
            dns_workers: 64,
            transport_shards: 8,
            resume: false,
            two_pass: false,
            domain_fail_threshold: 1,
            record_failures: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-request deadline in seconds; dial/TLS sub-timeouts are derived.
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Use HEAD instead of GET; skip body read and extraction.
    pub head_only: bool,
    /// Record status + headers only; skip body + extraction.
    pub status_only: bool,
    /// Max body bytes read per URL when not status-only.
    pub max_body_bytes: usize,
    /// Per-domain HTTP probe timeout in milliseconds (two-pass mode).
    pub probe_timeout_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            user_agent: "recrawl/0.1 (+https://example.invalid/bot)".to_string(),
            head_only: false,
            status_only: false,
            max_body_bytes: 512 * 1024,
            probe_timeout_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    /// Per-domain DNS lookup timeout in milliseconds.
    pub timeout_ms: u64,
    /// Number of in-memory cache shards (must be a power of two).
    pub shard_count: usize,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 3_000,
            shard_count: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the seed database (read-only `docs` table).
    pub seed_db_path: String,
    /// Directory holding the sharded result store files.
    pub result_dir: String,
    /// Number of result store shards.
    pub result_shards: usize,
    /// Path to the failure store file.
    pub failure_db_path: String,
    /// Path to the persistent DNS cache file.
    pub dns_cache_path: String,
    /// Path to the verifier's output store.
    pub verify_db_path: String,
    /// Rows per flusher batch for the result store.
    pub batch_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            seed_db_path: "seeds.db".to_string(),
            result_dir: "results".to_string(),
            result_shards: 8,
            failure_db_path: "failures.db".to_string(),
            dns_cache_path: "dns_cache.db".to_string(),
            verify_db_path: "verified.db".to_string(),
            batch_size: 500,
        }
    }
}

/// The verifier deliberately runs with low parallelism and long timeouts —
/// it optimizes for correctness (not wrongly declaring a domain dead), not
/// for throughput, unlike every other tunable in this file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    pub workers: usize,
    pub dns_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            dns_timeout_secs: 10,
            http_timeout_secs: 30,
            user_agent: "recrawl-verify/0.1".to_string(),
        }
    }
}

impl RecrawlConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, crate::RecrawlError> {
        toml::from_str(s).map_err(|e| crate::RecrawlError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = RecrawlConfig::default();
        assert!(cfg.general.workers > 0);
        assert_eq!(cfg.general.domain_fail_threshold, 1);
        assert!(!cfg.fetch.user_agent.is_empty());
    }

    #[test]
    fn verify_defaults_favor_correctness_over_throughput() {
        let cfg = RecrawlConfig::default();
        assert_eq!(cfg.verify.workers, 10);
        assert!(cfg.verify.dns_timeout_secs >= cfg.dns.timeout_ms / 1000);
        assert!(cfg.verify.http_timeout_secs > cfg.fetch.timeout_secs);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let cfg = RecrawlConfig::from_toml_str(
            r#"
            [general]
            workers = 400
            "#,
        )
        .unwrap();
        assert_eq!(cfg.general.workers, 400);
        assert_eq!(cfg.general.dns_workers, 64);
        assert_eq!(cfg.storage.result_shards, 8);
    }
}
