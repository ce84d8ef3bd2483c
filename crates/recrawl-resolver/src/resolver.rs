use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use recrawl_core::DomainResolution;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::shard::ShardedDnsCache;
use crate::upstream::{default_upstreams, LookupError, UpstreamResolver};

/// A ~2 Hz progress tick fired by [`DnsResolver::resolve_batch`]: rolling
/// speed is the delta of completions over the interval since the last tick.
#[derive(Debug, Clone, Copy)]
pub struct BatchProgress {
    pub completed: u64,
    pub total: u64,
    pub domains_per_sec: f64,
}

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Floor on the per-upstream share of the overall timeout computed by
/// [`per_upstream_timeout`], so a short overall timeout and a long upstream
/// list can't divide down to an unworkably small deadline.
const MIN_PER_UPSTREAM_TIMEOUT: Duration = Duration::from_millis(300);

/// Split the overall per-domain timeout evenly across `upstream_count`
/// upstreams, floored at [`MIN_PER_UPSTREAM_TIMEOUT`], so a sequential
/// fallback across upstreams gives each one a bounded share of the budget
/// instead of letting the first, slowest upstream consume it all.
fn per_upstream_timeout(timeout: Duration, upstream_count: usize) -> Duration {
    (timeout / upstream_count.max(1) as u32).max(MIN_PER_UPSTREAM_TIMEOUT)
}

/// Sharded, multi-upstream DNS resolver. Wraps a [`ShardedDnsCache`] and a
/// fixed set of [`UpstreamResolver`]s (system, Google, Cloudflare).
///
/// `resolve_one` and `resolve_batch` share the same per-domain resolution
/// logic in [`DnsResolver::resolve_with`] so a domain resolved standalone
/// and a domain resolved as part of a batch are classified identically.
pub struct DnsResolver {
    cache: Arc<ShardedDnsCache>,
    upstreams: Arc<Vec<Box<dyn UpstreamResolver>>>,
    timeout: Duration,
    dns_workers: usize,
}

impl DnsResolver {
    pub fn new(shard_count: usize, timeout: Duration, dns_workers: usize) -> Self {
        Self {
            cache: Arc::new(ShardedDnsCache::new(shard_count)),
            upstreams: Arc::new(default_upstreams(timeout)),
            timeout,
            dns_workers: dns_workers.max(1),
        }
    }

    pub fn cache(&self) -> Arc<ShardedDnsCache> {
        Arc::clone(&self.cache)
    }

    fn upstream_handles(&self) -> Arc<Vec<Box<dyn UpstreamResolver>>> {
        Arc::clone(&self.upstreams)
    }

    /// Query every upstream in sequence, stopping at the first success.
    /// Each upstream gets an equal share of the overall `timeout` (floor
    /// 300 ms) rather than the full budget, so one slow upstream cannot
    /// starve the remaining upstreams in the sequence.
    ///
    /// Once every upstream has failed: an explicit NXDOMAIN from any one of
    /// them is definitive (`Dead`), since NXDOMAIN does not become "more
    /// true" by also timing out elsewhere. Otherwise, if every upstream
    /// timed out, the domain is `Timeout` (retryable on a later run).
    /// Any other mix of failures is `Dead` — per the classifier, a
    /// non-timeout, non-NXDOMAIN resolver error is not retried within a
    /// run.
    ///
    /// Free function (not a method) so it can run inside a spawned task in
    /// `resolve_batch` without borrowing `self` across an await point.
    async fn resolve_with(
        upstreams: &[Box<dyn UpstreamResolver>],
        domain: &str,
        timeout: Duration,
    ) -> DomainResolution {
        let per_upstream = per_upstream_timeout(timeout, upstreams.len());
        let mut failures: Vec<LookupError> = Vec::with_capacity(upstreams.len());
        for upstream in upstreams {
            match upstream.resolve(domain, per_upstream).await {
                Ok(ips) => {
                    return DomainResolution::Resolved {
                        ips: ips.into_iter().map(|ip| ip.to_string()).collect(),
                    }
                }
                Err(err) => {
                    debug!(domain, upstream = upstream.name(), error = %err, "upstream lookup failed");
                    failures.push(err);
                }
            }
        }

        if let Some(nxdomain) = failures.iter().find(|e| e.is_nxdomain()) {
            return DomainResolution::Dead {
                error: nxdomain.message().to_string(),
            };
        }
        if failures.iter().all(|e| e.is_timeout()) {
            let message = failures
                .last()
                .map(|e| e.message().to_string())
                .unwrap_or_else(|| "all upstreams timed out".to_string());
            return DomainResolution::Timeout { error: message };
        }
        let message = failures
            .last()
            .map(|e| e.message().to_string())
            .unwrap_or_else(|| "all upstreams failed".to_string());
        DomainResolution::Dead { error: message }
    }

    /// Resolve a single domain, consulting and then updating the cache.
    pub async fn resolve_one(&self, domain: &str) -> DomainResolution {
        if let Some(cached) = self.cache.get(domain) {
            return cached;
        }
        let resolution = Self::resolve_with(&self.upstreams, domain, self.timeout).await;
        match &resolution {
            DomainResolution::Resolved { ips } => {
                self.cache.insert_resolved(domain, ips.clone());
            }
            DomainResolution::Dead { error } => {
                self.cache.insert_dead(domain, error.clone());
            }
            DomainResolution::Timeout { error } => {
                self.cache.insert_timeout(domain, error.clone());
            }
        }
        resolution
    }

    /// Resolve many domains concurrently, bounded by `dns_workers`. Domains
    /// already in the cache short-circuit without spawning a task.
    /// Returns one `(domain, resolution)` pair per input domain, in
    /// arbitrary order. `on_progress` is invoked at ~2 Hz with a rolling
    /// speed computed from the delta of completions since the previous
    /// tick; it stops firing once every domain has resolved.
    pub async fn resolve_batch<F>(&self, domains: &[String], on_progress: F) -> Vec<(String, DomainResolution)>
    where
        F: Fn(BatchProgress) + Send + Sync + 'static,
    {
        let total = domains.len() as u64;
        let semaphore = Arc::new(Semaphore::new(self.dns_workers));
        let mut results = Vec::with_capacity(domains.len());
        let mut pending = Vec::new();

        for domain in domains {
            if let Some(cached) = self.cache.get(domain) {
                results.push((domain.clone(), cached));
            } else {
                pending.push(domain.clone());
            }
        }

        if pending.is_empty() {
            return results;
        }

        let completed = Arc::new(AtomicU64::new(results.len() as u64));
        let progress_done = Arc::new(tokio::sync::Notify::new());
        let progress_task = {
            let completed = Arc::clone(&completed);
            let progress_done = Arc::clone(&progress_done);
            tokio::spawn(async move {
                let mut last_tick = Instant::now();
                let mut last_count = completed.load(Ordering::Relaxed);
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(PROGRESS_INTERVAL) => {}
                        _ = progress_done.notified() => break,
                    }
                    let now = Instant::now();
                    let count = completed.load(Ordering::Relaxed);
                    let dt = now.duration_since(last_tick).as_secs_f64();
                    let rate = if dt > 0.0 {
                        (count - last_count) as f64 / dt
                    } else {
                        0.0
                    };
                    on_progress(BatchProgress {
                        completed: count,
                        total,
                        domains_per_sec: rate,
                    });
                    last_tick = now;
                    last_count = count;
                    if count >= total {
                        break;
                    }
                }
            })
        };

        let cache = Arc::clone(&self.cache);
        let upstreams = self.upstream_handles();
        let timeout = self.timeout;
        let mut join_set = JoinSet::new();
        for domain in pending {
            let semaphore = Arc::clone(&semaphore);
            let cache = Arc::clone(&cache);
            let upstreams = Arc::clone(&upstreams);
            let completed = Arc::clone(&completed);
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let resolution = Self::resolve_with(&upstreams, &domain, timeout).await;
                match &resolution {
                    DomainResolution::Resolved { ips } => cache.insert_resolved(&domain, ips.clone()),
                    DomainResolution::Dead { error } => cache.insert_dead(&domain, error.clone()),
                    DomainResolution::Timeout { error } => cache.insert_timeout(&domain, error.clone()),
                }
                completed.fetch_add(1, Ordering::Relaxed);
                (domain, resolution)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(pair) => results.push(pair),
                Err(err) => warn!(error = %err, "dns batch task panicked"),
            }
        }

        progress_done.notify_one();
        let _ = progress_task.await;

        results
    }

    /// Called by the fetch pipeline when every IP returned for a
    /// DNS-resolved domain proved unreachable over HTTP — re-tags the
    /// domain as dead so later URLs of the same domain are skipped outright
    /// instead of re-attempting a dead dial.
    pub fn merge_http_dead(&self, domain: &str, error: String) {
        self.cache.mark_dead_after_http_failure(domain, error);
    }
}
