use serde::{Deserialize, Serialize};
use std::fmt;

/// A single seed row: a URL to (re)fetch and the registrable domain it
/// belongs to. `domain` is the unit of failure-sharing across URLs and is
/// assumed already normalized by the loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedUrl {
    pub url: String,
    pub domain: String,
}

/// Closed taxonomy of failure reasons, shared by [`FailedDomain::reason`],
/// [`FailedUrl::reason`], and [`crate::VerifyResult::original_reason`].
///
/// The `Domain*` variants mirror their non-domain counterpart and are used
/// on a per-URL row when the URL was skipped because its domain was already
/// dead — e.g. `DnsNxdomain` on a `failed_domains` row becomes
/// `DomainDnsNxdomain` on every `failed_urls` row for URLs of that domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    DnsNxdomain,
    DnsTimeout,
    ProbeUnreachable,
    HttpRefused,
    HttpDnsError,
    HttpTimeout,
    HttpReset,
    HttpError,
    DomainDnsNxdomain,
    DomainDnsTimeout,
    DomainProbeUnreachable,
    DomainHttpRefused,
    DomainHttpDnsError,
    DomainHttpTimeout,
    DomainHttpReset,
    DomainHttpError,
}

impl ErrorKind {
    /// Re-tag a domain-level reason as the per-URL `domain_*` variant used
    /// when a URL is skipped because its domain is already dead.
    pub fn as_domain_skip(self) -> ErrorKind {
        use ErrorKind::*;
        match self {
            DnsNxdomain => DomainDnsNxdomain,
            DnsTimeout => DomainDnsTimeout,
            ProbeUnreachable => DomainProbeUnreachable,
            HttpRefused => DomainHttpRefused,
            HttpDnsError => DomainHttpDnsError,
            HttpTimeout => DomainHttpTimeout,
            HttpReset => DomainHttpReset,
            HttpError => DomainHttpError,
            already_domain => already_domain,
        }
    }

    pub fn is_domain_skip(self) -> bool {
        matches!(
            self,
            ErrorKind::DomainDnsNxdomain
                | ErrorKind::DomainDnsTimeout
                | ErrorKind::DomainProbeUnreachable
                | ErrorKind::DomainHttpRefused
                | ErrorKind::DomainHttpDnsError
                | ErrorKind::DomainHttpTimeout
                | ErrorKind::DomainHttpReset
                | ErrorKind::DomainHttpError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::DnsNxdomain => "dns_nxdomain",
            ErrorKind::DnsTimeout => "dns_timeout",
            ErrorKind::ProbeUnreachable => "probe_unreachable",
            ErrorKind::HttpRefused => "http_refused",
            ErrorKind::HttpDnsError => "http_dns_error",
            ErrorKind::HttpTimeout => "http_timeout",
            ErrorKind::HttpReset => "http_reset",
            ErrorKind::HttpError => "http_error",
            ErrorKind::DomainDnsNxdomain => "domain_dns_nxdomain",
            ErrorKind::DomainDnsTimeout => "domain_dns_timeout",
            ErrorKind::DomainProbeUnreachable => "domain_probe_unreachable",
            ErrorKind::DomainHttpRefused => "domain_http_refused",
            ErrorKind::DomainHttpDnsError => "domain_http_dns_error",
            ErrorKind::DomainHttpTimeout => "domain_http_timeout",
            ErrorKind::DomainHttpReset => "domain_http_reset",
            ErrorKind::DomainHttpError => "domain_http_error",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "dns_nxdomain" => ErrorKind::DnsNxdomain,
            "dns_timeout" => ErrorKind::DnsTimeout,
            "probe_unreachable" => ErrorKind::ProbeUnreachable,
            "http_refused" => ErrorKind::HttpRefused,
            "http_dns_error" => ErrorKind::HttpDnsError,
            "http_timeout" => ErrorKind::HttpTimeout,
            "http_reset" => ErrorKind::HttpReset,
            "http_error" => ErrorKind::HttpError,
            "domain_dns_nxdomain" => ErrorKind::DomainDnsNxdomain,
            "domain_dns_timeout" => ErrorKind::DomainDnsTimeout,
            "domain_probe_unreachable" => ErrorKind::DomainProbeUnreachable,
            "domain_http_refused" => ErrorKind::DomainHttpRefused,
            "domain_http_dns_error" => ErrorKind::DomainHttpDnsError,
            "domain_http_timeout" => ErrorKind::DomainHttpTimeout,
            "domain_http_reset" => ErrorKind::DomainHttpReset,
            "domain_http_error" => ErrorKind::DomainHttpError,
            other => return Err(format!("unknown error kind: {other}")),
        })
    }
}

/// The stage at which a domain was determined to be dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailStage {
    Dns,
    Probe,
    Http,
}

impl fmt::Display for FailStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailStage::Dns => write!(f, "dns"),
            FailStage::Probe => write!(f, "probe"),
            FailStage::Http => write!(f, "http"),
        }
    }
}

/// Per-domain DNS resolution state. A domain is in exactly one of these
/// states at any time; see invariants in the module docs for each store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainResolution {
    /// At least one IP was returned. The vector is never empty.
    Resolved { ips: Vec<String> },
    /// NXDOMAIN or a definitive resolver refusal. Immutable across runs.
    Dead { error: String },
    /// All upstream resolvers timed out. May transition on a later run.
    Timeout { error: String },
}

impl DomainResolution {
    pub fn ips(&self) -> Option<&[String]> {
        match self {
            DomainResolution::Resolved { ips } => Some(ips),
            _ => None,
        }
    }

    pub fn is_dead(&self) -> bool {
        matches!(self, DomainResolution::Dead { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DomainResolution::Timeout { .. })
    }
}

/// Final disposition of a fetched URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchStatus {
    Done,
    Failed,
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchStatus::Done => write!(f, "done"),
            FetchStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Per-URL fetch outcome, as stored by the Result Store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResult {
    pub url: String,
    pub domain: String,
    pub status_code: Option<u16>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    /// Truncated response body (at most `max_body_bytes`). Absent in
    /// `StatusOnly` mode or when the response was not read.
    pub body: Option<Vec<u8>>,
    pub redirect_url: Option<String>,
    pub fetch_time_ms: u64,
    pub crawled_at: chrono::DateTime<chrono::Utc>,
    pub error: Option<String>,
    pub status: FetchStatus,
}

/// A domain recorded as dead in the Failure Store. One row per domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedDomain {
    pub domain: String,
    pub reason: ErrorKind,
    pub error_msg: String,
    pub ips: Option<Vec<String>>,
    pub affected_url_count: u64,
    pub stage: FailStage,
    pub detected_at: chrono::DateTime<chrono::Utc>,
}

/// A URL recorded in the Failure Store, either because it was itself
/// attempted and failed, or because its domain was already dead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedUrl {
    pub url: String,
    pub domain: String,
    pub reason: ErrorKind,
    pub error_msg: String,
    pub status_code: Option<u16>,
    pub fetch_time_ms: Option<u64>,
    pub content_type: Option<String>,
    pub redirect_url: Option<String>,
    pub detected_at: chrono::DateTime<chrono::Utc>,
}

/// Outcome of the slow verifier re-checking one dead domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResult {
    pub domain: String,
    pub original_reason: ErrorKind,
    pub dns_system_ips: Vec<String>,
    pub dns_google_ips: Vec<String>,
    pub dns_cloudflare_ips: Vec<String>,
    pub dns_alive: bool,
    pub http_status: Option<u16>,
    pub https_status: Option<u16>,
    pub http_error: Option<String>,
    pub https_error: Option<String>,
    pub http_alive: bool,
    pub is_truly_dead: bool,
    pub false_positive: bool,
    pub verified_at: chrono::DateTime<chrono::Utc>,
    pub verify_time_ms: u64,
}

impl VerifyResult {
    /// `is_truly_dead = !dns_alive && !http_alive`,
    /// `false_positive = dns_alive || http_alive`.
    pub fn verdict(dns_alive: bool, http_alive: bool) -> (bool, bool) {
        (!dns_alive && !http_alive, dns_alive || http_alive)
    }
}

/// End-of-run aggregate, derived from the frozen [`crate::RecrawlConfig`]-driven
/// run rather than persisted anywhere: the CLI's human/JSON/CSV output switch
/// renders this directly after `run`/`resume` complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_seeds: u64,
    pub success: u64,
    pub failed: u64,
    pub timeout: u64,
    pub resume_skipped: u64,
    pub domain_skipped: u64,
    pub elapsed_secs: f64,
    pub throughput_per_sec: f64,
}

impl RunSummary {
    pub fn completed(&self) -> u64 {
        self.success + self.failed + self.timeout + self.resume_skipped + self.domain_skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const ALL_KINDS: &[ErrorKind] = &[
        ErrorKind::DnsNxdomain,
        ErrorKind::DnsTimeout,
        ErrorKind::ProbeUnreachable,
        ErrorKind::HttpRefused,
        ErrorKind::HttpDnsError,
        ErrorKind::HttpTimeout,
        ErrorKind::HttpReset,
        ErrorKind::HttpError,
        ErrorKind::DomainDnsNxdomain,
        ErrorKind::DomainDnsTimeout,
        ErrorKind::DomainProbeUnreachable,
        ErrorKind::DomainHttpRefused,
        ErrorKind::DomainHttpDnsError,
        ErrorKind::DomainHttpTimeout,
        ErrorKind::DomainHttpReset,
        ErrorKind::DomainHttpError,
    ];

    #[test]
    fn error_kind_display_from_str_round_trips() {
        for kind in ALL_KINDS {
            let rendered = kind.to_string();
            let parsed = ErrorKind::from_str(&rendered).unwrap();
            assert_eq!(parsed, *kind);
        }
    }

    #[test]
    fn error_kind_from_str_rejects_unknown() {
        assert!(ErrorKind::from_str("not_a_real_reason").is_err());
    }

    #[test]
    fn as_domain_skip_maps_every_non_domain_variant() {
        assert_eq!(
            ErrorKind::DnsNxdomain.as_domain_skip(),
            ErrorKind::DomainDnsNxdomain
        );
        assert_eq!(
            ErrorKind::HttpRefused.as_domain_skip(),
            ErrorKind::DomainHttpRefused
        );
        assert_eq!(
            ErrorKind::HttpReset.as_domain_skip(),
            ErrorKind::DomainHttpReset
        );
    }

    #[test]
    fn as_domain_skip_is_idempotent_on_domain_variants() {
        for kind in ALL_KINDS.iter().filter(|k| k.is_domain_skip()) {
            assert_eq!(kind.as_domain_skip(), *kind);
        }
    }

    #[test]
    fn is_domain_skip_partitions_the_taxonomy() {
        let domain_count = ALL_KINDS.iter().filter(|k| k.is_domain_skip()).count();
        let non_domain_count = ALL_KINDS.iter().filter(|k| !k.is_domain_skip()).count();
        assert_eq!(domain_count, 8);
        assert_eq!(non_domain_count, 8);
    }

    #[test]
    fn domain_resolution_state_accessors() {
        let resolved = DomainResolution::Resolved {
            ips: vec!["1.2.3.4".to_string()],
        };
        assert_eq!(resolved.ips(), Some(&["1.2.3.4".to_string()][..]));
        assert!(!resolved.is_dead());
        assert!(!resolved.is_timeout());

        let dead = DomainResolution::Dead {
            error: "nxdomain".to_string(),
        };
        assert!(dead.is_dead());
        assert!(dead.ips().is_none());

        let timeout = DomainResolution::Timeout {
            error: "deadline exceeded".to_string(),
        };
        assert!(timeout.is_timeout());
        assert!(!timeout.is_dead());
    }

    #[test]
    fn verdict_truly_dead_requires_both_dns_and_http_dead() {
        assert_eq!(VerifyResult::verdict(false, false), (true, false));
    }

    #[test]
    fn verdict_dns_alive_is_false_positive() {
        assert_eq!(VerifyResult::verdict(true, false), (false, true));
    }

    #[test]
    fn verdict_http_alive_is_false_positive() {
        assert_eq!(VerifyResult::verdict(false, true), (false, true));
    }

    #[test]
    fn verdict_both_alive_is_false_positive_not_dead() {
        assert_eq!(VerifyResult::verdict(true, true), (false, true));
    }

    #[test]
    fn run_summary_completed_sums_every_disposition() {
        let summary = RunSummary {
            total_seeds: 10,
            success: 3,
            failed: 2,
            timeout: 1,
            resume_skipped: 1,
            domain_skipped: 3,
            elapsed_secs: 1.5,
            throughput_per_sec: 6.0,
        };
        assert_eq!(summary.completed(), 10);
        assert_eq!(summary.completed(), summary.total_seeds);
    }

    #[test]
    fn fetch_status_display() {
        assert_eq!(FetchStatus::Done.to_string(), "done");
        assert_eq!(FetchStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn fail_stage_display() {
        assert_eq!(FailStage::Dns.to_string(), "dns");
        assert_eq!(FailStage::Probe.to_string(), "probe");
        assert_eq!(FailStage::Http.to_string(), "http");
    }
}
