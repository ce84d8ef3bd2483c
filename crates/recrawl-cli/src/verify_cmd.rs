//! The `verify` operation: slow re-check of every domain the last run
//! marked dead, reporting false positives.

use anyhow::Result;
use recrawl_core::RecrawlConfig;
use recrawl_store::{FailureStore, VerifyStore};
use recrawl_verify::{Verifier, VerifierOptions, VerifySummary};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub async fn run(config: RecrawlConfig) -> Result<VerifySummary> {
    let failure_store = FailureStore::open(&config.storage.failure_db_path).await?;
    let domains = failure_store.load_domains_by_affected_url_count().await?;
    info!(count = domains.len(), "loaded dead domains to verify");

    let verify_store = VerifyStore::open(&config.storage.verify_db_path).await?;
    let verifier = Verifier::new(VerifierOptions::from(&config.verify))?;

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling verification");
            ctrl_c_cancel.cancel();
        }
    });

    let summary = verifier.run(domains, &verify_store, cancel).await?;
    failure_store.close().await;

    info!(
        total = summary.total,
        alive = summary.alive,
        dead = summary.dead,
        false_positive_rate = summary.false_positive_rate,
        "verification complete"
    );
    Ok(summary)
}
