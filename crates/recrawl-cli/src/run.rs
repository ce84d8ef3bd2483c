//! The `run`/`resume` operation: wires the seed loader, DNS resolver, fetch
//! pipeline, stores, and terminal display together for one pass over a
//! seed set.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use recrawl_core::{RecrawlConfig, RunSummary};
use recrawl_pipeline::{Pipeline, PipelineOptions};
use recrawl_resolver::DnsResolver;
use recrawl_stats::{Stats, TerminalDisplay};
use recrawl_store::{DnsCacheStore, FailureSink, FailureStore, ResultStore, SeedLoader};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub async fn run(config: RecrawlConfig) -> Result<RunSummary> {
    let seed_loader = SeedLoader::open(&config.storage.seed_db_path).await?;
    let seeds = seed_loader.load_all().await?;
    info!(count = seeds.len(), "loaded seed set");

    let dns_cache_store = DnsCacheStore::open(&config.storage.dns_cache_path).await?;
    let cached_entries = dns_cache_store.load().await?;
    info!(count = cached_entries.len(), "loaded persisted DNS cache");

    let resolver = Arc::new(DnsResolver::new(
        config.dns.shard_count,
        Duration::from_millis(config.dns.timeout_ms),
        config.general.dns_workers,
    ));
    resolver.cache().load(cached_entries);

    let results = Arc::new(
        ResultStore::open(
            &config.storage.result_dir,
            config.storage.result_shards,
            config.storage.batch_size,
        )
        .await?,
    );

    let resume_existing = if config.general.resume {
        let existing = results.load_existing_urls().await?;
        info!(count = existing.len(), "resuming: skipping URLs with a final result");
        Some(Arc::new(existing))
    } else {
        None
    };

    let failure_store = if config.general.record_failures {
        Some(FailureStore::open(&config.storage.failure_db_path).await?)
    } else {
        None
    };
    let failures = Arc::new(FailureSink::from(failure_store));

    let stats = Arc::new(Stats::new());
    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    let display = TerminalDisplay::new(seeds.len() as u64);
    let display_stats = Arc::clone(&stats);
    let display_cancel = cancel.clone();
    let display_handle = tokio::spawn(display.run(display_stats, display_cancel));

    let pipeline = Pipeline::new(
        PipelineOptions {
            workers: config.general.workers,
            dns_workers: config.general.dns_workers,
            transport_shards: config.general.transport_shards,
            fetch: config.fetch.clone(),
            two_pass: config.general.two_pass,
            domain_fail_threshold: config.general.domain_fail_threshold,
        },
        Some(Arc::clone(&resolver)),
        Arc::clone(&results),
        Arc::clone(&failures),
        Arc::clone(&stats),
    )?;

    let summary = pipeline.run(seeds, resume_existing, cancel.clone()).await;

    // The display loop's own render-on-cancel already froze `stats`; this
    // cancel is what lets it return.
    cancel.cancel();
    let _ = display_handle.await;

    // Drop the pipeline's internal clones so the `Arc`s below can be
    // unwrapped for an owned close — nothing else holds a reference once
    // the run has drained.
    drop(pipeline);

    dns_cache_store.save(&resolver.cache().snapshot()).await?;

    match Arc::try_unwrap(results) {
        Ok(store) => store.close().await,
        Err(shared) => shared.flush().await,
    }
    match Arc::try_unwrap(failures) {
        Ok(sink) => sink.close().await,
        Err(shared) => shared.flush(),
    }

    info!(
        success = summary.success,
        failed = summary.failed,
        timeout = summary.timeout,
        domain_skipped = summary.domain_skipped,
        resume_skipped = summary.resume_skipped,
        "run complete"
    );
    Ok(summary)
}

fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling run");
            cancel.cancel();
        }
    });
}
