use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{
    NameServerConfigGroup, ResolverConfig, ResolverOpts,
};
use hickory_resolver::error::ResolveError;
use hickory_resolver::TokioAsyncResolver;
use thiserror::Error;

use crate::classify::{classify_message, Classification};

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("nxdomain: {0}")]
    Nxdomain(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("resolver error: {0}")]
    Other(String),
}

impl LookupError {
    pub fn message(&self) -> &str {
        match self {
            LookupError::Nxdomain(m) | LookupError::Timeout(m) | LookupError::Other(m) => m,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, LookupError::Timeout(_))
    }

    pub fn is_nxdomain(&self) -> bool {
        matches!(self, LookupError::Nxdomain(_))
    }
}

fn classify_resolve_error(err: &ResolveError) -> LookupError {
    let message = err.to_string();
    match classify_message(&message) {
        Classification::Nxdomain => LookupError::Nxdomain(message),
        Classification::Timeout => LookupError::Timeout(message),
        Classification::OtherError => LookupError::Other(message),
    }
}

/// One DNS upstream. `resolve_one`'s sequential fallback and
/// `resolve_batch`'s round-robin partitioning both iterate a
/// `&[Box<dyn UpstreamResolver>]` through this trait so neither has to know
/// which concrete resolver it is talking to.
#[async_trait]
pub trait UpstreamResolver: Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(&self, domain: &str, timeout: Duration) -> Result<Vec<IpAddr>, LookupError>;
}

struct HickoryUpstream {
    name: &'static str,
    resolver: TokioAsyncResolver,
}

#[async_trait]
impl UpstreamResolver for HickoryUpstream {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn resolve(&self, domain: &str, timeout: Duration) -> Result<Vec<IpAddr>, LookupError> {
        let lookup = tokio::time::timeout(timeout, self.resolver.lookup_ip(domain)).await;
        match lookup {
            Ok(Ok(response)) => {
                let ips: Vec<IpAddr> = response.iter().collect();
                if ips.is_empty() {
                    Err(LookupError::Nxdomain(format!(
                        "no record found for {domain}"
                    )))
                } else {
                    Ok(ips)
                }
            }
            Ok(Err(err)) => Err(classify_resolve_error(&err)),
            Err(_) => Err(LookupError::Timeout(format!(
                "{} lookup of {domain} timed out after {timeout:?}",
                self.name
            ))),
        }
    }
}

fn opts_with_timeout(timeout: Duration) -> ResolverOpts {
    let mut opts = ResolverOpts::default();
    opts.timeout = timeout;
    opts.attempts = 1;
    opts
}

/// Resolver backed by the operating system's configured nameservers
/// (`/etc/resolv.conf` on unix). Falls back to the default upstream config
/// if the system config cannot be read.
pub fn system_upstream(timeout: Duration) -> Box<dyn UpstreamResolver> {
    let resolver = match hickory_resolver::system_conf::read_system_conf() {
        Ok((config, _opts)) => TokioAsyncResolver::tokio(config, opts_with_timeout(timeout)),
        Err(_) => TokioAsyncResolver::tokio(ResolverConfig::default(), opts_with_timeout(timeout)),
    };
    Box::new(HickoryUpstream {
        name: "system",
        resolver,
    })
}

/// Google public DNS (8.8.8.8, 8.8.4.4), queried independently of the
/// system resolver.
pub fn google_upstream(timeout: Duration) -> Box<dyn UpstreamResolver> {
    let group = NameServerConfigGroup::from_ips_clear(
        &[
            IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
            IpAddr::V4(Ipv4Addr::new(8, 8, 4, 4)),
        ],
        53,
        true,
    );
    let config = ResolverConfig::from_parts(None, vec![], group);
    let resolver = TokioAsyncResolver::tokio(config, opts_with_timeout(timeout));
    Box::new(HickoryUpstream {
        name: "google",
        resolver,
    })
}

/// Cloudflare public DNS (1.1.1.1, 1.0.0.1), queried independently of the
/// system resolver.
pub fn cloudflare_upstream(timeout: Duration) -> Box<dyn UpstreamResolver> {
    let group = NameServerConfigGroup::from_ips_clear(
        &[
            IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)),
            IpAddr::V4(Ipv4Addr::new(1, 0, 0, 1)),
        ],
        53,
        true,
    );
    let config = ResolverConfig::from_parts(None, vec![], group);
    let resolver = TokioAsyncResolver::tokio(config, opts_with_timeout(timeout));
    Box::new(HickoryUpstream {
        name: "cloudflare",
        resolver,
    })
}

/// Build the standard three-way upstream set: system, Google, Cloudflare.
pub fn default_upstreams(timeout: Duration) -> Vec<Box<dyn UpstreamResolver>> {
    vec![
        system_upstream(timeout),
        google_upstream(timeout),
        cloudflare_upstream(timeout),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_upstreams_are_named_system_google_cloudflare() {
        let upstreams = default_upstreams(Duration::from_millis(100));
        let names: Vec<&str> = upstreams.iter().map(|u| u.name()).collect();
        assert_eq!(names, vec!["system", "google", "cloudflare"]);
    }
}
