use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use recrawl_resolver::ShardedDnsCache;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};

/// `reqwest::dns::Resolve` implementation consulting the shared in-memory
/// DNS cache before falling back to OS resolution.
///
/// This is the library-idiomatic equivalent of a raw socket-level dial
/// hook when the HTTP client is `reqwest`: reqwest calls [`Resolve::resolve`]
/// once per connection attempt and uses only the IP portion of the returned
/// `SocketAddr`s (the port is supplied separately from the request URI), so
/// a bound port of `0` here is never actually dialed.
///
/// `shard_id` selects a stable IP out of a multi-A-record response via
/// `ips[shard_id % ips.len()]`, so a given transport shard always dials the
/// same address for a given domain — and since exactly one address is
/// returned, reqwest never races a happy-eyeballs dual-stack connection.
pub struct CachedResolver {
    cache: Arc<ShardedDnsCache>,
    shard_id: usize,
}

impl CachedResolver {
    pub fn new(cache: Arc<ShardedDnsCache>, shard_id: usize) -> Self {
        Self { cache, shard_id }
    }
}

impl Resolve for CachedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let cache = Arc::clone(&self.cache);
        let shard_id = self.shard_id;
        let host = name.as_str().to_string();

        Box::pin(async move {
            if let Some(resolution) = cache.get(&host) {
                if let Some(ips) = resolution.ips() {
                    if !ips.is_empty() {
                        let idx = shard_id % ips.len();
                        let ip: IpAddr = ips[idx]
                            .parse()
                            .map_err(|e: std::net::AddrParseError| Box::new(e) as BoxError)?;
                        let addr = SocketAddr::new(ip, 0);
                        let addrs: Addrs = Box::new(std::iter::once(addr));
                        return Ok(addrs);
                    }
                }
            }

            let resolved = tokio::net::lookup_host((host.as_str(), 0))
                .await
                .map_err(|e| Box::new(e) as BoxError)?;
            let addrs: Addrs = Box::new(resolved.collect::<Vec<_>>().into_iter());
            Ok(addrs)
        })
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use recrawl_core::DomainResolution;

    #[tokio::test]
    async fn returns_cached_ip_without_touching_the_network() {
        let cache = Arc::new(ShardedDnsCache::new(8));
        cache.insert_resolved(
            "example.invalid",
            vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()],
        );
        let resolver = CachedResolver::new(Arc::clone(&cache), 1);

        let name: Name = "example.invalid".parse().unwrap();
        let mut addrs = resolver.resolve(name).await.unwrap();
        let addr = addrs.next().unwrap();
        assert_eq!(addr.ip().to_string(), "10.0.0.2");
    }

    #[test]
    fn shard_id_selects_stable_ip() {
        let cache = Arc::new(ShardedDnsCache::new(8));
        cache.insert_resolved(
            "example.invalid",
            vec!["10.0.0.1".to_string(), "10.0.0.2".to_string(), "10.0.0.3".to_string()],
        );
        let resolution = cache.get("example.invalid").unwrap();
        let DomainResolution::Resolved { ips } = resolution else {
            panic!("expected resolved");
        };
        assert_eq!(ips[3 % ips.len()], "10.0.0.1");
    }
}
