use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Width of the rolling-speed window: samples older than this are trimmed
/// before computing the current rate.
const ROLLING_WINDOW: Duration = Duration::from_secs(10);

/// Process-wide record of atomic counters, an HTTP status histogram, and
/// reached/unreachable domain sets. Created when a run begins; [`Stats::freeze`]
/// latches the elapsed duration so the final report is deterministic
/// regardless of when the display thread catches up.
pub struct Stats {
    start: Instant,
    frozen_elapsed: Mutex<Option<Duration>>,

    success: AtomicU64,
    failed: AtomicU64,
    timeout: AtomicU64,
    skipped: AtomicU64,
    domain_skipped: AtomicU64,
    bytes: AtomicU64,
    fetch_ms_total: AtomicU64,

    dns_live: AtomicU64,
    dns_dead: AtomicU64,
    dns_timeout: AtomicU64,
    probe_reachable: AtomicU64,
    probe_unreachable: AtomicU64,

    status_histogram: Mutex<HashMap<u16, u64>>,
    reached_domains: Mutex<HashSet<String>>,
    unreachable_domains: Mutex<HashSet<String>>,

    rolling: Mutex<VecDeque<(Instant, u64)>>,
}

/// A point-in-time read of every counter, plus derived rolling speed and
/// ETA. Cheap to construct; safe to call from the display loop at 2 Hz.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub success: u64,
    pub failed: u64,
    pub timeout: u64,
    pub skipped: u64,
    pub domain_skipped: u64,
    pub bytes: u64,
    pub avg_fetch_ms: f64,
    pub dns_live: u64,
    pub dns_dead: u64,
    pub dns_timeout: u64,
    pub probe_reachable: u64,
    pub probe_unreachable: u64,
    pub reached_domains: usize,
    pub unreachable_domains: usize,
    pub status_histogram: HashMap<u16, u64>,
    pub elapsed: Duration,
    /// Completions per second over the last 10 seconds.
    pub rolling_speed: f64,
    /// Estimated seconds remaining, computed from the overall average rate
    /// rather than the rolling rate, to avoid jitter.
    pub eta_secs: Option<f64>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            frozen_elapsed: Mutex::new(None),
            success: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timeout: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            domain_skipped: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            fetch_ms_total: AtomicU64::new(0),
            dns_live: AtomicU64::new(0),
            dns_dead: AtomicU64::new(0),
            dns_timeout: AtomicU64::new(0),
            probe_reachable: AtomicU64::new(0),
            probe_unreachable: AtomicU64::new(0),
            status_histogram: Mutex::new(HashMap::new()),
            reached_domains: Mutex::new(HashSet::new()),
            unreachable_domains: Mutex::new(HashSet::new()),
            rolling: Mutex::new(VecDeque::new()),
        }
    }

    fn total_completed(&self) -> u64 {
        self.success.load(Ordering::Relaxed)
            + self.failed.load(Ordering::Relaxed)
            + self.timeout.load(Ordering::Relaxed)
    }

    fn tick_rolling_window(&self) {
        let now = Instant::now();
        let total = self.total_completed();
        let mut rolling = self.rolling.lock().unwrap();
        rolling.push_back((now, total));
        while let Some((t, _)) = rolling.front() {
            if now.duration_since(*t) > ROLLING_WINDOW {
                rolling.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn record_success(&self, status: u16, domain: &str, bytes: u64, fetch_ms: u64) {
        self.success.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.fetch_ms_total.fetch_add(fetch_ms, Ordering::Relaxed);
        *self.status_histogram.lock().unwrap().entry(status).or_insert(0) += 1;
        self.reached_domains.lock().unwrap().insert(domain.to_string());
        self.tick_rolling_window();
    }

    pub fn record_failure(&self, status: u16, domain: &str, timed_out: bool) {
        if timed_out {
            self.timeout.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        if status != 0 {
            *self.status_histogram.lock().unwrap().entry(status).or_insert(0) += 1;
        }
        self.unreachable_domains.lock().unwrap().insert(domain.to_string());
        self.tick_rolling_window();
    }

    pub fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_domain_skip(&self) {
        self.domain_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dns(&self, live: u64, dead: u64, timeout: u64) {
        self.dns_live.fetch_add(live, Ordering::Relaxed);
        self.dns_dead.fetch_add(dead, Ordering::Relaxed);
        self.dns_timeout.fetch_add(timeout, Ordering::Relaxed);
    }

    pub fn record_probe(&self, reachable: bool) {
        if reachable {
            self.probe_reachable.fetch_add(1, Ordering::Relaxed);
        } else {
            self.probe_unreachable.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Latch the elapsed duration. Subsequent snapshots report this frozen
    /// value instead of `Instant::now() - start`.
    pub fn freeze(&self) {
        let mut frozen = self.frozen_elapsed.lock().unwrap();
        if frozen.is_none() {
            *frozen = Some(self.start.elapsed());
        }
    }

    fn elapsed(&self) -> Duration {
        self.frozen_elapsed.lock().unwrap().unwrap_or_else(|| self.start.elapsed())
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let elapsed = self.elapsed();
        let success = self.success.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let timeout = self.timeout.load(Ordering::Relaxed);
        let fetch_ms_total = self.fetch_ms_total.load(Ordering::Relaxed);

        let rolling_speed = {
            let rolling = self.rolling.lock().unwrap();
            match (rolling.front(), rolling.back()) {
                (Some((t0, c0)), Some((t1, c1))) if t1 > t0 => {
                    let dt = t1.duration_since(*t0).as_secs_f64();
                    if dt > 0.0 {
                        (*c1 as f64 - *c0 as f64) / dt
                    } else {
                        0.0
                    }
                }
                _ => 0.0,
            }
        };

        StatsSnapshot {
            success,
            failed,
            timeout,
            skipped: self.skipped.load(Ordering::Relaxed),
            domain_skipped: self.domain_skipped.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            avg_fetch_ms: if success > 0 {
                fetch_ms_total as f64 / success as f64
            } else {
                0.0
            },
            dns_live: self.dns_live.load(Ordering::Relaxed),
            dns_dead: self.dns_dead.load(Ordering::Relaxed),
            dns_timeout: self.dns_timeout.load(Ordering::Relaxed),
            probe_reachable: self.probe_reachable.load(Ordering::Relaxed),
            probe_unreachable: self.probe_unreachable.load(Ordering::Relaxed),
            reached_domains: self.reached_domains.lock().unwrap().len(),
            unreachable_domains: self.unreachable_domains.lock().unwrap().len(),
            status_histogram: self.status_histogram.lock().unwrap().clone(),
            elapsed,
            rolling_speed,
            eta_secs: None,
        }
    }

    /// Like [`Stats::snapshot`] but fills in a real ETA given the known
    /// total amount of work, computed from the overall average rate rather
    /// than the rolling rate to avoid jitter.
    pub fn snapshot_with_total(&self, total_work: u64) -> StatsSnapshot {
        let mut snap = self.snapshot();
        let completed = snap.success + snap.failed + snap.timeout + snap.skipped + snap.domain_skipped;
        let elapsed_secs = snap.elapsed.as_secs_f64();
        snap.eta_secs = if elapsed_secs > 0.0 && completed > 0 && total_work > completed {
            let avg_rate = completed as f64 / elapsed_secs;
            if avg_rate > 0.0 {
                Some((total_work - completed) as f64 / avg_rate)
            } else {
                None
            }
        } else {
            None
        };
        snap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_success_and_failure_counters() {
        let stats = Stats::new();
        stats.record_success(200, "a.com", 1024, 50);
        stats.record_failure(0, "b.com", true);
        stats.record_failure(500, "c.com", false);

        let snap = stats.snapshot();
        assert_eq!(snap.success, 1);
        assert_eq!(snap.timeout, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.bytes, 1024);
        assert_eq!(snap.reached_domains, 1);
        assert_eq!(snap.unreachable_domains, 2);
    }

    #[test]
    fn freeze_latches_elapsed() {
        let stats = Stats::new();
        stats.freeze();
        let first = stats.snapshot().elapsed;
        std::thread::sleep(Duration::from_millis(5));
        let second = stats.snapshot().elapsed;
        assert_eq!(first, second);
    }

    #[test]
    fn eta_uses_average_not_rolling_rate() {
        let stats = Stats::new();
        for _ in 0..10 {
            stats.record_success(200, "a.com", 10, 5);
        }
        let snap = stats.snapshot_with_total(20);
        assert!(snap.eta_secs.is_some());
    }
}
