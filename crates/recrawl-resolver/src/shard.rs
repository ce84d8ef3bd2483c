use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::RwLock;

use fnv::FnvHasher;
use recrawl_core::DomainResolution;

/// One cache shard. Each of the three states lives in its own map so a
/// reader checking "is this domain resolved" never contends with a writer
/// updating the `timeout` map for an unrelated domain.
#[derive(Default)]
struct Shard {
    resolved: RwLock<HashMap<String, Vec<String>>>,
    dead: RwLock<HashMap<String, String>>,
    timeout: RwLock<HashMap<String, String>>,
}

/// A fixed-size array of shards keyed by FNV-1a hash of the domain, mod the
/// shard count. Bounds lock contention regardless of total domain count —
/// the shard count does not grow with the number of domains resolved.
pub struct ShardedDnsCache {
    shards: Vec<Shard>,
    mask: usize,
}

fn fnv1a(s: &str) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(s.as_bytes());
    hasher.finish()
}

impl ShardedDnsCache {
    /// `shard_count` must be a power of two; non-power-of-two values are
    /// rounded up to the next power of two.
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1).next_power_of_two();
        let mut shards = Vec::with_capacity(shard_count);
        shards.resize_with(shard_count, Shard::default);
        Self {
            shards,
            mask: shard_count - 1,
        }
    }

    fn shard_for(&self, domain: &str) -> &Shard {
        let idx = (fnv1a(domain) as usize) & self.mask;
        &self.shards[idx]
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Look up a domain's cached resolution, if any.
    pub fn get(&self, domain: &str) -> Option<DomainResolution> {
        let shard = self.shard_for(domain);
        if let Some(ips) = shard.resolved.read().unwrap().get(domain) {
            return Some(DomainResolution::Resolved { ips: ips.clone() });
        }
        if let Some(err) = shard.dead.read().unwrap().get(domain) {
            return Some(DomainResolution::Dead {
                error: err.clone(),
            });
        }
        if let Some(err) = shard.timeout.read().unwrap().get(domain) {
            return Some(DomainResolution::Timeout {
                error: err.clone(),
            });
        }
        None
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.get(domain).is_some()
    }

    pub fn insert_resolved(&self, domain: &str, ips: Vec<String>) {
        let shard = self.shard_for(domain);
        shard
            .resolved
            .write()
            .unwrap()
            .insert(domain.to_string(), ips);
        // A domain can only be in one state; clear stale entries from the
        // other two maps so `get` never needs tie-breaking logic.
        shard.dead.write().unwrap().remove(domain);
        shard.timeout.write().unwrap().remove(domain);
    }

    /// NXDOMAIN is immutable across runs: once marked dead, this is a no-op
    /// for domains already dead. Called only from a miss path in practice.
    pub fn insert_dead(&self, domain: &str, error: String) {
        let shard = self.shard_for(domain);
        shard
            .dead
            .write()
            .unwrap()
            .insert(domain.to_string(), error);
        shard.timeout.write().unwrap().remove(domain);
    }

    pub fn insert_timeout(&self, domain: &str, error: String) {
        let shard = self.shard_for(domain);
        // A later run may resolve or kill this domain; a prior Resolved or
        // Dead state is authoritative and must not be overwritten here.
        if shard.resolved.read().unwrap().contains_key(domain)
            || shard.dead.read().unwrap().contains_key(domain)
        {
            return;
        }
        shard
            .timeout
            .write()
            .unwrap()
            .insert(domain.to_string(), error);
    }

    /// Re-classify a DNS-resolved domain as dead, for `merge_http_dead`.
    pub fn mark_dead_after_http_failure(&self, domain: &str, error: String) {
        self.insert_dead(domain, error);
    }

    /// Snapshot every entry for persistence. Order is unspecified.
    pub fn snapshot(&self) -> Vec<(String, DomainResolution)> {
        let mut out = Vec::new();
        for shard in &self.shards {
            for (domain, ips) in shard.resolved.read().unwrap().iter() {
                out.push((
                    domain.clone(),
                    DomainResolution::Resolved { ips: ips.clone() },
                ));
            }
            for (domain, err) in shard.dead.read().unwrap().iter() {
                out.push((
                    domain.clone(),
                    DomainResolution::Dead { error: err.clone() },
                ));
            }
            for (domain, err) in shard.timeout.read().unwrap().iter() {
                out.push((
                    domain.clone(),
                    DomainResolution::Timeout { error: err.clone() },
                ));
            }
        }
        out
    }

    /// Bulk-load entries read from the persistent store at startup.
    pub fn load(&self, entries: Vec<(String, DomainResolution)>) {
        for (domain, resolution) in entries {
            match resolution {
                DomainResolution::Resolved { ips } => self.insert_resolved(&domain, ips),
                DomainResolution::Dead { error } => self.insert_dead(&domain, error),
                DomainResolution::Timeout { error } => self.insert_timeout(&domain, error),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| {
                s.resolved.read().unwrap().len()
                    + s.dead.read().unwrap().len()
                    + s.timeout.read().unwrap().len()
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_count_rounds_to_power_of_two() {
        let cache = ShardedDnsCache::new(50);
        assert_eq!(cache.shard_count(), 64);
    }

    #[test]
    fn resolved_overrides_prior_timeout() {
        let cache = ShardedDnsCache::new(8);
        cache.insert_timeout("example.com", "slow".to_string());
        assert!(cache.get("example.com").unwrap().is_timeout());

        cache.insert_resolved("example.com", vec!["1.2.3.4".to_string()]);
        let resolution = cache.get("example.com").unwrap();
        assert_eq!(
            resolution.ips(),
            Some(&["1.2.3.4".to_string()][..])
        );
    }

    #[test]
    fn dead_is_not_overwritten_by_later_timeout() {
        let cache = ShardedDnsCache::new(8);
        cache.insert_dead("dead.invalid", "nxdomain".to_string());
        cache.insert_timeout("dead.invalid", "slow".to_string());
        assert!(cache.get("dead.invalid").unwrap().is_dead());
    }

    #[test]
    fn snapshot_round_trips_through_load() {
        let cache = ShardedDnsCache::new(8);
        cache.insert_resolved("a.com", vec!["1.1.1.1".to_string()]);
        cache.insert_dead("b.com", "nxdomain".to_string());

        let snapshot = cache.snapshot();
        let fresh = ShardedDnsCache::new(8);
        fresh.load(snapshot);

        assert!(fresh.get("a.com").unwrap().ips().is_some());
        assert!(fresh.get("b.com").unwrap().is_dead());
    }
}
