use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use recrawl_core::{ErrorKind, FailedDomain, VerifyResult};
use recrawl_store::{VerifyRunMeta, VerifyStore};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dns_check::DnsCheckers;
use crate::http_check::{check_http, HttpCheck};
use crate::VerifyError;

const DEFAULT_WORKERS: usize = 10;
const DEFAULT_DNS_TIMEOUT_SECS: u64 = 10;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const WRITE_BATCH_SIZE: usize = 50;
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct VerifierOptions {
    /// Deliberately low: the verifier optimizes for not wrongly declaring a
    /// domain dead, not for throughput.
    pub workers: usize,
    pub dns_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for VerifierOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            dns_timeout_secs: DEFAULT_DNS_TIMEOUT_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            user_agent: "recrawl-verify/0.1".to_string(),
        }
    }
}

impl From<&recrawl_core::VerifyConfig> for VerifierOptions {
    fn from(cfg: &recrawl_core::VerifyConfig) -> Self {
        Self {
            workers: cfg.workers,
            dns_timeout_secs: cfg.dns_timeout_secs,
            http_timeout_secs: cfg.http_timeout_secs,
            user_agent: cfg.user_agent.clone(),
        }
    }
}

/// Aggregate counters produced by a verify run; mirrors the
/// [`VerifyRunMeta`] already written to the store.
#[derive(Debug, Clone, Copy)]
pub struct VerifySummary {
    pub total: u64,
    pub alive: u64,
    pub dead: u64,
    pub false_positive_rate: f64,
}

/// The parts of [`Verifier`] a spawned worker task needs; cheap to clone
/// (an `Arc` and a `reqwest::Client`, itself `Arc`-backed internally).
#[derive(Clone)]
struct CheckHandle {
    dns: Arc<DnsCheckers>,
    http_client: reqwest::Client,
    http_timeout_secs: u64,
}

impl CheckHandle {
    async fn verify_one(&self, domain: FailedDomain) -> VerifyResult {
        let started = Instant::now();
        let dns = self.dns.check(&domain.domain).await;
        let dns_alive = dns.alive();

        let http = if dns_alive {
            check_http(
                &self.http_client,
                &domain.domain,
                Duration::from_secs(self.http_timeout_secs),
            )
            .await
        } else {
            HttpCheck {
                http_status: None,
                https_status: None,
                http_error: None,
                https_error: None,
            }
        };
        let http_alive = http.alive();
        let (is_truly_dead, false_positive) = VerifyResult::verdict(dns_alive, http_alive);

        VerifyResult {
            domain: domain.domain,
            original_reason: domain.reason,
            dns_system_ips: dns.system_ips,
            dns_google_ips: dns.google_ips,
            dns_cloudflare_ips: dns.cloudflare_ips,
            dns_alive,
            http_status: http.http_status,
            https_status: http.https_status,
            http_error: http.http_error,
            https_error: http.https_error,
            http_alive,
            is_truly_dead,
            false_positive,
            verified_at: chrono::Utc::now(),
            verify_time_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Slow, thorough re-checker of domains the fetch pipeline marked dead.
/// Not a runtime path: run once, after a `run`/`resume` pass, over the
/// failure store's `failed_domains` table.
pub struct Verifier {
    check: CheckHandle,
    workers: usize,
}

impl Verifier {
    pub fn new(options: VerifierOptions) -> Result<Self, VerifyError> {
        let dns = Arc::new(DnsCheckers::new(Duration::from_secs(options.dns_timeout_secs)));
        let http_client = reqwest::Client::builder()
            .user_agent(options.user_agent.clone())
            .timeout(Duration::from_secs(options.http_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(1))
            .build()
            .map_err(VerifyError::ClientBuild)?;
        Ok(Self {
            check: CheckHandle {
                dns,
                http_client,
                http_timeout_secs: options.http_timeout_secs,
            },
            workers: options.workers.max(1),
        })
    }

    /// Verify every domain in `domains` (the caller supplies them already
    /// sorted by affected URL count), writing batches to `store` as they
    /// become available and a final aggregate to `meta`. Progress is
    /// reported through `tracing` at 1 Hz.
    pub async fn run(
        &self,
        domains: Vec<FailedDomain>,
        store: &VerifyStore,
        cancel: CancellationToken,
    ) -> Result<VerifySummary, VerifyError> {
        let total = domains.len() as u64;
        if domains.is_empty() {
            return self.finish_empty(store).await;
        }

        let alive = Arc::new(AtomicU64::new(0));
        let dead = Arc::new(AtomicU64::new(0));
        let completed = Arc::new(AtomicU64::new(0));

        let queue = Arc::new(Mutex::new(domains.into_iter()));
        let (result_tx, mut result_rx) = tokio::sync::mpsc::unbounded_channel::<VerifyResult>();

        let progress_task = {
            let completed = Arc::clone(&completed);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {}
                        _ = cancel.cancelled() => break,
                    }
                    let done = completed.load(Ordering::Relaxed);
                    info!(completed = done, total, "verify progress");
                    if done >= total {
                        break;
                    }
                }
            })
        };

        let mut workers = JoinSet::new();
        for _ in 0..self.workers {
            let queue = Arc::clone(&queue);
            let alive = Arc::clone(&alive);
            let dead = Arc::clone(&dead);
            let completed = Arc::clone(&completed);
            let check = self.check.clone();
            let result_tx = result_tx.clone();
            let cancel = cancel.clone();
            workers.spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let next = { queue.lock().await.next() };
                    let Some(domain) = next else { break };
                    let result = check.verify_one(domain).await;
                    if result.is_truly_dead {
                        dead.fetch_add(1, Ordering::Relaxed);
                    } else {
                        alive.fetch_add(1, Ordering::Relaxed);
                    }
                    completed.fetch_add(1, Ordering::Relaxed);
                    let _ = result_tx.send(result);
                }
            });
        }
        drop(result_tx);

        // `store` is a caller-owned borrow, not `'static`, so the batch
        // writer runs on the current task rather than a spawned one; it
        // drains the channel concurrently with the worker tasks because
        // awaiting `recv` yields to the runtime between sends.
        let mut buffer = Vec::with_capacity(WRITE_BATCH_SIZE);
        while let Some(result) = result_rx.recv().await {
            buffer.push(result);
            if buffer.len() >= WRITE_BATCH_SIZE {
                store.write_batch(&buffer).await?;
                buffer.clear();
            }
        }
        if !buffer.is_empty() {
            store.write_batch(&buffer).await?;
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "verify worker task panicked");
            }
        }

        progress_task.abort();

        let alive_count = alive.load(Ordering::Relaxed);
        let dead_count = dead.load(Ordering::Relaxed);
        let false_positive_rate = if total > 0 {
            alive_count as f64 / total as f64
        } else {
            0.0
        };

        let meta = VerifyRunMeta {
            total,
            alive: alive_count,
            dead: dead_count,
            false_positive_rate,
            run_timestamp: chrono::Utc::now(),
        };
        store.write_meta(&meta).await?;

        Ok(VerifySummary {
            total,
            alive: alive_count,
            dead: dead_count,
            false_positive_rate,
        })
    }

    async fn finish_empty(&self, store: &VerifyStore) -> Result<VerifySummary, VerifyError> {
        let meta = VerifyRunMeta {
            total: 0,
            alive: 0,
            dead: 0,
            false_positive_rate: 0.0,
            run_timestamp: chrono::Utc::now(),
        };
        store.write_meta(&meta).await?;
        Ok(VerifySummary {
            total: 0,
            alive: 0,
            dead: 0,
            false_positive_rate: 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_domain(name: &str) -> FailedDomain {
        FailedDomain {
            domain: name.to_string(),
            reason: ErrorKind::DnsNxdomain,
            error_msg: "no such host".to_string(),
            ips: None,
            affected_url_count: 1,
            stage: recrawl_core::FailStage::Dns,
            detected_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn empty_domain_list_writes_zeroed_meta() {
        let dir = tempfile::tempdir().unwrap();
        let store = VerifyStore::open(dir.path().join("verify.db").to_str().unwrap())
            .await
            .unwrap();
        let verifier = Verifier::new(VerifierOptions {
            dns_timeout_secs: 1,
            http_timeout_secs: 1,
            ..Default::default()
        })
        .unwrap();

        let summary = verifier
            .run(vec![], &store, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.total, 0);

        let total = store.read_meta("total").await.unwrap();
        assert_eq!(total.as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn unresolvable_domain_is_truly_dead() {
        let dir = tempfile::tempdir().unwrap();
        let store = VerifyStore::open(dir.path().join("verify.db").to_str().unwrap())
            .await
            .unwrap();
        let verifier = Verifier::new(VerifierOptions {
            workers: 1,
            dns_timeout_secs: 2,
            http_timeout_secs: 2,
            user_agent: "recrawl-verify-test/0.1".to_string(),
        })
        .unwrap();

        let domains = vec![sample_domain("this-domain-should-not-resolve.invalid")];
        let summary = verifier
            .run(domains, &store, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.total, 1);
        assert_eq!(summary.dead, 1);
        assert_eq!(summary.alive, 0);
    }

    #[test]
    fn options_convert_from_config() {
        let cfg = recrawl_core::VerifyConfig::default();
        let opts = VerifierOptions::from(&cfg);
        assert_eq!(opts.workers, cfg.workers);
        assert_eq!(opts.http_timeout_secs, cfg.http_timeout_secs);
    }
}
