use std::sync::Arc;
use std::time::Duration;

use recrawl_resolver::ShardedDnsCache;

use crate::dialer::CachedResolver;
use crate::PipelineError;

/// `S` independent HTTP client instances, each with its own connection
/// pool, dial/TLS/header timeouts, and cached-DNS resolver. Workers hash to
/// a shard by `worker_id mod S`, spreading pool lock contention without
/// changing request semantics.
pub struct TransportShards {
    clients: Vec<reqwest::Client>,
}

impl TransportShards {
    pub fn build(
        shard_count: usize,
        workers: usize,
        timeout: Duration,
        user_agent: &str,
        dns_cache: Arc<ShardedDnsCache>,
    ) -> Result<Self, PipelineError> {
        let shard_count = shard_count.max(1);
        // min(workers * 2 / S, 100_000) per-client idle connection budget.
        let idle_per_host = ((workers.saturating_mul(2)) / shard_count).clamp(1, 100_000);

        let mut clients = Vec::with_capacity(shard_count);
        for shard_id in 0..shard_count {
            let resolver = CachedResolver::new(Arc::clone(&dns_cache), shard_id);
            let client = reqwest::Client::builder()
                .user_agent(user_agent.to_string())
                .timeout(timeout)
                .connect_timeout(Duration::from_secs(5))
                .pool_max_idle_per_host(idle_per_host)
                .pool_idle_timeout(Duration::from_secs(30))
                .http1_only()
                .happy_eyeballs_timeout(None)
                .redirect(reqwest::redirect::Policy::none())
                .dns_resolver(Arc::new(resolver))
                .build()
                .map_err(PipelineError::ClientBuild)?;
            clients.push(client);
        }

        Ok(Self { clients })
    }

    pub fn shard_count(&self) -> usize {
        self.clients.len()
    }

    /// Client for `worker_id`, selected by `worker_id mod S`.
    pub fn for_worker(&self, worker_id: usize) -> &reqwest::Client {
        &self.clients[worker_id % self.clients.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_connection_budget_is_bounded() {
        let cache = Arc::new(ShardedDnsCache::new(8));
        let shards = TransportShards::build(
            4,
            200,
            Duration::from_secs(15),
            "recrawl/0.1",
            cache,
        )
        .unwrap();
        assert_eq!(shards.shard_count(), 4);
    }

    #[test]
    fn worker_ids_wrap_around_shards() {
        let cache = Arc::new(ShardedDnsCache::new(8));
        let shards = TransportShards::build(3, 30, Duration::from_secs(15), "recrawl/0.1", cache)
            .unwrap();
        // worker 0 and worker 3 must hash to the same shard index.
        assert!(std::ptr::eq(shards.for_worker(0), shards.for_worker(3)));
    }
}
