use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::thread_rng;
use recrawl_core::{
    DomainResolution, ErrorKind, FailStage, FailedDomain, FailedUrl, FetchConfig, FetchStatus,
    RunSummary, SeedUrl,
};
use recrawl_resolver::{DnsResolver, ShardedDnsCache};
use recrawl_stats::Stats;
use recrawl_store::{FailureSink, ResultStore};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::dead_set::DeadSet;
use crate::extract::{DefaultExtractor, Extractor};
use crate::fetch::fetch_one;
use crate::probe::{probe_domain, ProbeOutcome};
use crate::transport::TransportShards;
use crate::PipelineError;

/// Channel depth for the URL queue between DNS workers and fetch workers, in
/// units of `workers` rather than a fixed constant, so fetchers stay
/// saturated without holding unbounded memory regardless of worker count.
const URL_QUEUE_MULTIPLIER: usize = 4;

/// Tunables a [`Pipeline`] needs beyond what its collaborators (stores,
/// stats, resolver) already own, lifted directly from
/// [`recrawl_core::GeneralConfig`] and [`FetchConfig`].
pub struct PipelineOptions {
    pub workers: usize,
    pub dns_workers: usize,
    pub transport_shards: usize,
    pub fetch: FetchConfig,
    pub two_pass: bool,
    pub domain_fail_threshold: u32,
}

/// Owns the transport shards and dead-set for one run and drives either
/// direct-mode or pipelined-mode fetching depending on whether a
/// [`DnsResolver`] is attached.
pub struct Pipeline {
    transports: TransportShards,
    resolver: Option<Arc<DnsResolver>>,
    dead_set: Arc<DeadSet>,
    stats: Arc<Stats>,
    results: Arc<ResultStore>,
    failures: Arc<FailureSink>,
    extractor: Arc<dyn Extractor>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        options: PipelineOptions,
        resolver: Option<Arc<DnsResolver>>,
        results: Arc<ResultStore>,
        failures: Arc<FailureSink>,
        stats: Arc<Stats>,
    ) -> Result<Self, PipelineError> {
        let dns_cache: Arc<ShardedDnsCache> = match &resolver {
            Some(resolver) => resolver.cache(),
            // Direct mode still needs a cache to hand the transport's
            // dialer; an empty one just always falls through to OS
            // resolution, which is exactly direct mode's contract.
            None => Arc::new(ShardedDnsCache::new(64)),
        };
        let transports = TransportShards::build(
            options.transport_shards,
            options.workers,
            Duration::from_secs(options.fetch.timeout_secs),
            &options.fetch.user_agent,
            dns_cache,
        )?;
        Ok(Self {
            transports,
            resolver,
            dead_set: Arc::new(DeadSet::new(options.domain_fail_threshold)),
            stats,
            results,
            failures,
            extractor: Arc::new(DefaultExtractor),
            options,
        })
    }

    pub fn dead_set(&self) -> Arc<DeadSet> {
        Arc::clone(&self.dead_set)
    }

    /// Run every seed through the pipeline, producing a [`RunSummary`] built
    /// from the frozen [`Stats`] snapshot once all workers have drained.
    /// `resume_existing` is the set of URLs already carrying a final result,
    /// consulted before either resolution or fetch.
    pub async fn run(
        &self,
        seeds: Vec<SeedUrl>,
        resume_existing: Option<Arc<HashSet<String>>>,
        cancel: CancellationToken,
    ) -> RunSummary {
        let total_seeds = seeds.len() as u64;

        if seeds.is_empty() {
            self.stats.freeze();
            return RunSummary {
                total_seeds: 0,
                success: 0,
                failed: 0,
                timeout: 0,
                resume_skipped: 0,
                domain_skipped: 0,
                elapsed_secs: 0.0,
                throughput_per_sec: 0.0,
            };
        }

        match self.resolver.clone() {
            Some(resolver) => {
                self.run_pipelined(seeds, resume_existing, resolver, cancel).await
            }
            None => self.run_direct(seeds, resume_existing, cancel).await,
        }

        self.stats.freeze();
        let snap = self.stats.snapshot();
        let elapsed_secs = snap.elapsed.as_secs_f64();
        let completed = snap.success + snap.failed + snap.timeout;
        RunSummary {
            total_seeds,
            success: snap.success,
            failed: snap.failed,
            timeout: snap.timeout,
            resume_skipped: snap.skipped,
            domain_skipped: snap.domain_skipped,
            elapsed_secs,
            throughput_per_sec: if elapsed_secs > 0.0 {
                completed as f64 / elapsed_secs
            } else {
                0.0
            },
        }
    }

    async fn run_direct(
        &self,
        mut seeds: Vec<SeedUrl>,
        resume_existing: Option<Arc<HashSet<String>>>,
        cancel: CancellationToken,
    ) {
        seeds.shuffle(&mut thread_rng());
        let workers = self.options.workers.max(1);
        let (tx, rx) = mpsc::channel::<SeedUrl>(workers * URL_QUEUE_MULTIPLIER);
        let rx = Arc::new(Mutex::new(rx));

        let mut pool = JoinSet::new();
        for worker_id in 0..workers {
            let rx = Arc::clone(&rx);
            let client = self.transports.for_worker(worker_id).clone();
            let dead_set = Arc::clone(&self.dead_set);
            let stats = Arc::clone(&self.stats);
            let results = Arc::clone(&self.results);
            let failures = Arc::clone(&self.failures);
            let extractor = Arc::clone(&self.extractor);
            let fetch_cfg = self.options.fetch.clone();
            let cancel = cancel.clone();
            pool.spawn(async move {
                loop {
                    let seed = { rx.lock().await.recv().await };
                    let Some(seed) = seed else { break };
                    if cancel.is_cancelled() {
                        break;
                    }
                    fetch_and_record(
                        &client, &seed, &fetch_cfg, extractor.as_ref(), &dead_set, &stats,
                        &results, &failures, None,
                    )
                    .await;
                }
            });
        }

        for seed in seeds {
            if cancel.is_cancelled() {
                break;
            }
            if resume_existing
                .as_ref()
                .is_some_and(|existing| existing.contains(&seed.url))
            {
                self.stats.record_skip();
                continue;
            }
            if self.dead_set.is_dead(&seed.domain) {
                record_domain_skip(&seed, &self.dead_set, &self.stats, &self.failures);
                continue;
            }
            if tx.send(seed).await.is_err() {
                break;
            }
        }
        drop(tx);
        while pool.join_next().await.is_some() {}
    }

    async fn run_pipelined(
        &self,
        seeds: Vec<SeedUrl>,
        resume_existing: Option<Arc<HashSet<String>>>,
        resolver: Arc<DnsResolver>,
        cancel: CancellationToken,
    ) {
        let mut by_domain: HashMap<String, Vec<SeedUrl>> = HashMap::new();
        for seed in seeds {
            by_domain.entry(seed.domain.clone()).or_default().push(seed);
        }
        let by_domain = Arc::new(by_domain);

        let mut domain_list: Vec<String> = by_domain.keys().cloned().collect();
        domain_list.shuffle(&mut thread_rng());

        let (domain_tx, domain_rx) = mpsc::unbounded_channel::<String>();
        for domain in domain_list {
            // Never fails: receiver is held below for the lifetime of this run.
            let _ = domain_tx.send(domain);
        }
        drop(domain_tx);
        let domain_rx = Arc::new(Mutex::new(domain_rx));

        let fetch_workers = self.options.workers.max(1);
        let (url_tx, url_rx) = mpsc::channel::<SeedUrl>(fetch_workers * URL_QUEUE_MULTIPLIER);
        let url_rx = Arc::new(Mutex::new(url_rx));

        let mut dns_pool = JoinSet::new();
        for _ in 0..self.options.dns_workers.max(1) {
            let domain_rx = Arc::clone(&domain_rx);
            let by_domain = Arc::clone(&by_domain);
            let resolver = Arc::clone(&resolver);
            let dead_set = Arc::clone(&self.dead_set);
            let stats = Arc::clone(&self.stats);
            let failures = Arc::clone(&self.failures);
            let url_tx = url_tx.clone();
            let two_pass = self.options.two_pass;
            let probe_client = self.transports.for_worker(0).clone();
            let probe_timeout = Duration::from_millis(self.options.fetch.probe_timeout_ms);
            let cancel = cancel.clone();
            dns_pool.spawn(async move {
                loop {
                    let domain = { domain_rx.lock().await.recv().await };
                    let Some(domain) = domain else { break };
                    if cancel.is_cancelled() {
                        break;
                    }

                    let urls = by_domain.get(&domain).cloned().unwrap_or_default();
                    let resolution = resolver.resolve_one(&domain).await;

                    match &resolution {
                        DomainResolution::Resolved { .. } => {
                            stats.record_dns(1, 0, 0);
                        }
                        DomainResolution::Dead { error } => {
                            stats.record_dns(0, 1, 0);
                            dead_set.mark_dead(&domain, ErrorKind::DnsNxdomain, FailStage::Dns);
                            record_domain_dead(
                                &domain,
                                ErrorKind::DnsNxdomain,
                                error,
                                FailStage::Dns,
                                &urls,
                                &failures,
                            );
                            for _ in &urls {
                                stats.record_domain_skip();
                            }
                            continue;
                        }
                        DomainResolution::Timeout { .. } => {
                            stats.record_dns(0, 0, 1);
                            // Marks the run-local dead set only; the DNS
                            // cache already persisted this domain as
                            // `Timeout`, which stays retryable on a later
                            // run regardless of this run's dead-set state.
                            dead_set.mark_dead(&domain, ErrorKind::DnsTimeout, FailStage::Dns);
                            for _ in &urls {
                                stats.record_domain_skip();
                            }
                            continue;
                        }
                    }

                    if two_pass {
                        if let Some(sample) = urls.first() {
                            let outcome =
                                probe_domain(&probe_client, &sample.url, probe_timeout).await;
                            stats.record_probe(outcome == ProbeOutcome::Reachable);
                            if outcome == ProbeOutcome::Unreachable {
                                dead_set.mark_dead(
                                    &domain,
                                    ErrorKind::ProbeUnreachable,
                                    FailStage::Probe,
                                );
                                record_domain_dead(
                                    &domain,
                                    ErrorKind::ProbeUnreachable,
                                    "probe: definitive connection refusal",
                                    FailStage::Probe,
                                    &urls,
                                    &failures,
                                );
                                for _ in &urls {
                                    stats.record_domain_skip();
                                }
                                continue;
                            }
                        }
                    }

                    for seed in urls {
                        if url_tx.send(seed).await.is_err() {
                            break;
                        }
                    }
                }
            });
        }
        drop(url_tx);

        let mut fetch_pool = JoinSet::new();
        for worker_id in 0..fetch_workers {
            let url_rx = Arc::clone(&url_rx);
            let client = self.transports.for_worker(worker_id).clone();
            let dead_set = Arc::clone(&self.dead_set);
            let stats = Arc::clone(&self.stats);
            let results = Arc::clone(&self.results);
            let failures = Arc::clone(&self.failures);
            let extractor = Arc::clone(&self.extractor);
            let fetch_cfg = self.options.fetch.clone();
            let resume_existing = resume_existing.clone();
            let resolver = Arc::clone(&resolver);
            let cancel = cancel.clone();
            fetch_pool.spawn(async move {
                loop {
                    let seed = { url_rx.lock().await.recv().await };
                    let Some(seed) = seed else { break };
                    if cancel.is_cancelled() {
                        break;
                    }
                    if resume_existing
                        .as_ref()
                        .is_some_and(|existing| existing.contains(&seed.url))
                    {
                        stats.record_skip();
                        continue;
                    }
                    if dead_set.is_dead(&seed.domain) {
                        record_domain_skip(&seed, &dead_set, &stats, &failures);
                        continue;
                    }
                    fetch_and_record(
                        &client, &seed, &fetch_cfg, extractor.as_ref(), &dead_set, &stats,
                        &results, &failures, Some(resolver.as_ref()),
                    )
                    .await;
                }
            });
        }

        while dns_pool.join_next().await.is_some() {}
        while fetch_pool.join_next().await.is_some() {}
    }
}

#[allow(clippy::too_many_arguments)]
async fn fetch_and_record(
    client: &reqwest::Client,
    seed: &SeedUrl,
    fetch_cfg: &FetchConfig,
    extractor: &dyn Extractor,
    dead_set: &DeadSet,
    stats: &Stats,
    results: &ResultStore,
    failures: &FailureSink,
    resolver: Option<&DnsResolver>,
) {
    let outcome = fetch_one(client, &seed.url, &seed.domain, fetch_cfg, extractor).await;

    match outcome.result.status {
        FetchStatus::Done => {
            stats.record_success(
                outcome.result.status_code.unwrap_or(0),
                &seed.domain,
                outcome.result.content_length.unwrap_or(0),
                outcome.result.fetch_time_ms,
            );
        }
        FetchStatus::Failed => {
            stats.record_failure(
                outcome.result.status_code.unwrap_or(0),
                &seed.domain,
                outcome.timed_out,
            );
            if let Some(kind) = outcome.error_kind {
                failures.record_url(FailedUrl {
                    url: seed.url.clone(),
                    domain: seed.domain.clone(),
                    reason: kind,
                    error_msg: outcome.result.error.clone().unwrap_or_default(),
                    status_code: outcome.result.status_code,
                    fetch_time_ms: Some(outcome.result.fetch_time_ms),
                    content_type: outcome.result.content_type.clone(),
                    redirect_url: outcome.result.redirect_url.clone(),
                    detected_at: chrono::Utc::now(),
                });
            }
        }
    }

    if outcome.mark_domain_dead {
        let reason = outcome.error_kind.unwrap_or(ErrorKind::HttpError);
        let error_msg = outcome.result.error.clone().unwrap_or_default();
        if dead_set.record_fatal_failure(&seed.domain, reason) {
            failures.record_domain(FailedDomain {
                domain: seed.domain.clone(),
                reason,
                error_msg: error_msg.clone(),
                ips: None,
                affected_url_count: 1,
                stage: FailStage::Http,
                detected_at: chrono::Utc::now(),
            });
            if let Some(resolver) = resolver {
                resolver.merge_http_dead(&seed.domain, error_msg);
            }
        }
    }

    results.add(outcome.result).await;
}

fn record_domain_skip(seed: &SeedUrl, dead_set: &DeadSet, stats: &Stats, failures: &FailureSink) {
    stats.record_domain_skip();
    if let Some((reason, _stage)) = dead_set.reason_for(&seed.domain) {
        failures.record_url(FailedUrl {
            url: seed.url.clone(),
            domain: seed.domain.clone(),
            reason: reason.as_domain_skip(),
            error_msg: "domain already marked dead".to_string(),
            status_code: None,
            fetch_time_ms: None,
            content_type: None,
            redirect_url: None,
            detected_at: chrono::Utc::now(),
        });
    }
}

fn record_domain_dead(
    domain: &str,
    reason: ErrorKind,
    error_msg: &str,
    stage: FailStage,
    urls: &[SeedUrl],
    failures: &FailureSink,
) {
    failures.record_domain(FailedDomain {
        domain: domain.to_string(),
        reason,
        error_msg: error_msg.to_string(),
        ips: None,
        affected_url_count: urls.len() as u64,
        stage,
        detected_at: chrono::Utc::now(),
    });
    for seed in urls {
        failures.record_url(FailedUrl {
            url: seed.url.clone(),
            domain: domain.to_string(),
            reason: reason.as_domain_skip(),
            error_msg: error_msg.to_string(),
            status_code: None,
            fetch_time_ms: None,
            content_type: None,
            redirect_url: None,
            detected_at: chrono::Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetch_config() -> FetchConfig {
        FetchConfig {
            timeout_secs: 5,
            user_agent: "recrawl-test/0.1".to_string(),
            head_only: false,
            status_only: false,
            max_body_bytes: 4096,
            probe_timeout_ms: 200,
        }
    }

    async fn new_pipeline(
        results_dir: &std::path::Path,
        resolver: Option<Arc<DnsResolver>>,
    ) -> Pipeline {
        let results = Arc::new(
            ResultStore::open(results_dir.to_str().unwrap(), 2, 10)
                .await
                .unwrap(),
        );
        let stats = Arc::new(Stats::new());
        Pipeline::new(
            PipelineOptions {
                workers: 4,
                dns_workers: 2,
                transport_shards: 2,
                fetch: fetch_config(),
                two_pass: false,
                domain_fail_threshold: 1,
            },
            resolver,
            results,
            Arc::new(FailureSink::Null),
            stats,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn direct_mode_fetches_every_seed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hi"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let pipeline = new_pipeline(dir.path(), None).await;

        let seeds = vec![
            SeedUrl { url: format!("{}/a", server.uri()), domain: "example.com".to_string() },
            SeedUrl { url: format!("{}/b", server.uri()), domain: "example.com".to_string() },
        ];
        let summary = pipeline.run(seeds, None, CancellationToken::new()).await;

        assert_eq!(summary.total_seeds, 2);
        assert_eq!(summary.success, 2);
        assert_eq!(summary.completed(), 2);
    }

    #[tokio::test]
    async fn empty_seed_list_completes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = new_pipeline(dir.path(), None).await;
        let summary = pipeline.run(Vec::new(), None, CancellationToken::new()).await;
        assert_eq!(summary.total_seeds, 0);
        assert_eq!(summary.completed(), 0);
    }

    #[tokio::test]
    async fn dead_domain_is_skipped_before_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = new_pipeline(dir.path(), None).await;
        pipeline.dead_set().mark_dead(
            "dead.invalid",
            ErrorKind::DnsNxdomain,
            FailStage::Dns,
        );

        let seeds = vec![SeedUrl {
            url: "http://dead.invalid/a".to_string(),
            domain: "dead.invalid".to_string(),
        }];
        let summary = pipeline.run(seeds, None, CancellationToken::new()).await;

        assert_eq!(summary.domain_skipped, 1);
        assert_eq!(summary.success, 0);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn resume_skips_urls_already_present() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hi"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let pipeline = new_pipeline(dir.path(), None).await;

        let url = format!("{}/a", server.uri());
        let mut existing = HashSet::new();
        existing.insert(url.clone());

        let seeds = vec![SeedUrl { url, domain: "example.com".to_string() }];
        let summary = pipeline
            .run(seeds, Some(Arc::new(existing)), CancellationToken::new())
            .await;

        assert_eq!(summary.resume_skipped, 1);
        assert_eq!(summary.success, 0);
    }

    #[tokio::test]
    async fn pipelined_dns_timeout_marks_domain_dead_for_the_run() {
        let resolver = Arc::new(DnsResolver::new(8, Duration::from_millis(50), 2));
        resolver
            .cache()
            .insert_timeout("slow.invalid", "all upstreams timed out".to_string());

        let dir = tempfile::tempdir().unwrap();
        let pipeline = new_pipeline(dir.path(), Some(Arc::clone(&resolver))).await;

        let seeds = vec![SeedUrl {
            url: "http://slow.invalid/a".to_string(),
            domain: "slow.invalid".to_string(),
        }];
        let summary = pipeline.run(seeds, None, CancellationToken::new()).await;

        assert_eq!(summary.domain_skipped, 1);
        assert_eq!(summary.success, 0);
        assert_eq!(summary.failed, 0);
        assert!(pipeline.dead_set().is_dead("slow.invalid"));
        assert_eq!(
            pipeline.dead_set().reason_for("slow.invalid"),
            Some((ErrorKind::DnsTimeout, FailStage::Dns))
        );
    }
}
