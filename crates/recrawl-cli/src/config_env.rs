//! Configuration loading: TOML file with a hard-coded-defaults fallback,
//! then environment-variable overrides for worker and concurrency tuning.
//! CLI flags are applied on top of this by the caller, so the precedence
//! is file < env < flags.

use std::path::Path;

use anyhow::Result;
use recrawl_core::RecrawlConfig;
use tracing::warn;

pub fn load(path: &Path) -> Result<RecrawlConfig> {
    if !path.exists() {
        warn!(path = %path.display(), "config file not found, using defaults");
        return Ok(RecrawlConfig::default());
    }
    let contents = std::fs::read_to_string(path)?;
    Ok(RecrawlConfig::from_toml_str(&contents)?)
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key).ok().and_then(|v| match v.to_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    })
}

/// Applies the documented `RECRAWL_*` environment-variable overrides on
/// top of a loaded config, matching the layered configuration convention
/// (typed struct + TOML + env overrides for concurrency tuning).
pub fn apply_env_overrides(config: &mut RecrawlConfig) {
    if let Some(v) = env_usize("RECRAWL_WORKERS") {
        config.general.workers = v;
    }
    if let Some(v) = env_usize("RECRAWL_DNS_WORKERS") {
        config.general.dns_workers = v;
    }
    if let Some(v) = env_usize("RECRAWL_TRANSPORT_SHARDS") {
        config.general.transport_shards = v;
    }
    if let Some(v) = env_bool("RECRAWL_RESUME") {
        config.general.resume = v;
    }
    if let Some(v) = env_bool("RECRAWL_TWO_PASS") {
        config.general.two_pass = v;
    }
    if let Some(v) = env_u32("RECRAWL_DOMAIN_FAIL_THRESHOLD") {
        config.general.domain_fail_threshold = v;
    }
    if let Some(v) = env_u64("RECRAWL_TIMEOUT_SECS") {
        config.fetch.timeout_secs = v;
    }
    if let Ok(v) = std::env::var("RECRAWL_USER_AGENT") {
        config.fetch.user_agent = v;
    }
    if let Ok(v) = std::env::var("RECRAWL_SEED_DB_PATH") {
        config.storage.seed_db_path = v;
    }
    if let Ok(v) = std::env::var("RECRAWL_RESULT_DIR") {
        config.storage.result_dir = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize these tests so
    // they don't race each other's `std::env::set_var`/`remove_var`.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load(Path::new("/nonexistent/recrawl.toml")).unwrap();
        assert_eq!(config.general.workers, 200);
    }

    #[test]
    fn env_override_takes_effect() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("RECRAWL_WORKERS", "777");
        let mut config = RecrawlConfig::default();
        apply_env_overrides(&mut config);
        std::env::remove_var("RECRAWL_WORKERS");
        assert_eq!(config.general.workers, 777);
    }

    #[test]
    fn absent_env_vars_leave_config_unchanged() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("RECRAWL_DNS_WORKERS");
        let mut config = RecrawlConfig::default();
        let before = config.general.dns_workers;
        apply_env_overrides(&mut config);
        assert_eq!(config.general.dns_workers, before);
    }
}
