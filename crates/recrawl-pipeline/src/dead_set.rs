use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::{DashMap, DashSet};
use recrawl_core::{ErrorKind, FailStage};

/// Process-wide domain dead-set plus a per-domain fatal-failure counter.
/// `DashSet`/`DashMap` are internally sharded reader-writer locks, giving
/// lock-free reads from every fetch worker without a single global mutex.
///
/// Alongside the set itself, `reasons` remembers the `(ErrorKind, FailStage)`
/// that first marked each domain dead, so a caller skipping a later URL for
/// that domain can tag the `FailedUrl` row with the matching `domain_*`
/// reason without threading the original cause through every channel.
pub struct DeadSet {
    dead: DashSet<String>,
    fail_counts: DashMap<String, AtomicU32>,
    reasons: DashMap<String, (ErrorKind, FailStage)>,
    domain_fail_threshold: u32,
}

impl DeadSet {
    pub fn new(domain_fail_threshold: u32) -> Self {
        Self {
            dead: DashSet::new(),
            fail_counts: DashMap::new(),
            reasons: DashMap::new(),
            domain_fail_threshold: domain_fail_threshold.max(1),
        }
    }

    pub fn is_dead(&self, domain: &str) -> bool {
        self.dead.contains(domain)
    }

    /// The reason a domain was marked dead, if it is dead.
    pub fn reason_for(&self, domain: &str) -> Option<(ErrorKind, FailStage)> {
        self.reasons.get(domain).map(|r| *r.value())
    }

    /// Mark a domain dead unconditionally (DNS NXDOMAIN, all-resolver
    /// timeout, or probe-unreachable — all single-shot). A domain already
    /// dead keeps its original reason.
    pub fn mark_dead(&self, domain: &str, reason: ErrorKind, stage: FailStage) {
        self.dead.insert(domain.to_string());
        self.reasons.entry(domain.to_string()).or_insert((reason, stage));
    }

    /// Record one fatal fetch-time failure (dial refused/reset/no-route)
    /// for `domain`. Marks the domain dead once its fatal-failure count
    /// reaches `domain_fail_threshold` (default 1, i.e. the documented
    /// mark-dead-on-first-failure behavior).
    ///
    /// Returns `true` if this call is the one that crossed the threshold,
    /// so the caller can record a `FailedDomain` row exactly once.
    pub fn record_fatal_failure(&self, domain: &str, reason: ErrorKind) -> bool {
        if self.is_dead(domain) {
            return false;
        }
        let counter = self
            .fail_counts
            .entry(domain.to_string())
            .or_insert_with(|| AtomicU32::new(0));
        let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= self.domain_fail_threshold {
            self.mark_dead(domain, reason, FailStage::Http);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.dead.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dead.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_threshold_marks_dead_on_first_failure() {
        let set = DeadSet::new(1);
        assert!(!set.is_dead("flaky.com"));
        assert!(set.record_fatal_failure("flaky.com", ErrorKind::HttpRefused));
        assert!(set.is_dead("flaky.com"));
        assert_eq!(
            set.reason_for("flaky.com"),
            Some((ErrorKind::HttpRefused, FailStage::Http))
        );
    }

    #[test]
    fn higher_threshold_requires_multiple_failures() {
        let set = DeadSet::new(3);
        assert!(!set.record_fatal_failure("flaky.com", ErrorKind::HttpRefused));
        assert!(!set.record_fatal_failure("flaky.com", ErrorKind::HttpRefused));
        assert!(!set.is_dead("flaky.com"));
        assert!(set.record_fatal_failure("flaky.com", ErrorKind::HttpRefused));
        assert!(set.is_dead("flaky.com"));
    }

    #[test]
    fn already_dead_domain_does_not_retrigger() {
        let set = DeadSet::new(1);
        assert!(set.record_fatal_failure("a.com", ErrorKind::HttpRefused));
        assert!(!set.record_fatal_failure("a.com", ErrorKind::HttpRefused));
    }

    #[test]
    fn mark_dead_keeps_first_reason() {
        let set = DeadSet::new(1);
        set.mark_dead("d.com", ErrorKind::DnsNxdomain, FailStage::Dns);
        set.mark_dead("d.com", ErrorKind::ProbeUnreachable, FailStage::Probe);
        assert_eq!(
            set.reason_for("d.com"),
            Some((ErrorKind::DnsNxdomain, FailStage::Dns))
        );
    }
}
