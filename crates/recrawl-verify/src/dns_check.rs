use std::time::Duration;

use recrawl_resolver::{cloudflare_upstream, google_upstream, system_upstream, UpstreamResolver};

/// Result of querying the three upstreams independently for one domain.
pub struct DnsCheck {
    pub system_ips: Vec<String>,
    pub google_ips: Vec<String>,
    pub cloudflare_ips: Vec<String>,
}

impl DnsCheck {
    /// Alive if any of the three upstreams returned at least one IP.
    pub fn alive(&self) -> bool {
        !self.system_ips.is_empty() || !self.google_ips.is_empty() || !self.cloudflare_ips.is_empty()
    }
}

/// The three upstream resolvers the verifier queries independently,
/// separate from [`recrawl_resolver::DnsResolver`]'s cached/fallback
/// lookup: the verifier wants each upstream's answer on its own, not the
/// first success.
pub struct DnsCheckers {
    system: Box<dyn UpstreamResolver>,
    google: Box<dyn UpstreamResolver>,
    cloudflare: Box<dyn UpstreamResolver>,
    timeout: Duration,
}

impl DnsCheckers {
    pub fn new(timeout: Duration) -> Self {
        Self {
            system: system_upstream(timeout),
            google: google_upstream(timeout),
            cloudflare: cloudflare_upstream(timeout),
            timeout,
        }
    }

    /// Query all three upstreams concurrently; a failed or timed-out
    /// upstream simply contributes an empty IP list rather than failing the
    /// whole check.
    pub async fn check(&self, domain: &str) -> DnsCheck {
        let (system, google, cloudflare) = tokio::join!(
            self.system.resolve(domain, self.timeout),
            self.google.resolve(domain, self.timeout),
            self.cloudflare.resolve(domain, self.timeout),
        );
        DnsCheck {
            system_ips: system.unwrap_or_default().into_iter().map(|ip| ip.to_string()).collect(),
            google_ips: google.unwrap_or_default().into_iter().map(|ip| ip.to_string()).collect(),
            cloudflare_ips: cloudflare.unwrap_or_default().into_iter().map(|ip| ip.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_with_no_ips_from_any_upstream() {
        let check = DnsCheck {
            system_ips: vec![],
            google_ips: vec![],
            cloudflare_ips: vec![],
        };
        assert!(!check.alive());
    }

    #[test]
    fn alive_if_any_single_upstream_answers() {
        let check = DnsCheck {
            system_ips: vec![],
            google_ips: vec!["1.2.3.4".to_string()],
            cloudflare_ips: vec![],
        };
        assert!(check.alive());
    }
}
