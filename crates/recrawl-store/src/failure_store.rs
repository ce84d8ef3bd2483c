use recrawl_core::{FailStage, FailedDomain, FailedUrl};
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::pool;
use crate::StoreError;

const DOMAIN_BATCH_SIZE: usize = 1_000;
const URL_BATCH_SIZE: usize = 5_000;
/// Channel depth is expressed in batches, not rows: a full channel means the
/// flusher has fallen multiple batches behind, at which point we drop the
/// batch rather than apply backpressure to the fetch workers.
const CHANNEL_DEPTH_BATCHES: usize = 8;

struct Flusher<T> {
    sender: mpsc::Sender<Vec<T>>,
    buffer: std::sync::Mutex<Vec<T>>,
    batch_size: usize,
    handle: JoinHandle<()>,
}

impl<T> Flusher<T> {
    fn push(&self, row: T) {
        let full_batch = {
            let mut buffer = self.buffer.lock().unwrap();
            buffer.push(row);
            if buffer.len() >= self.batch_size {
                Some(std::mem::replace(&mut *buffer, Vec::with_capacity(self.batch_size)))
            } else {
                None
            }
        };
        if let Some(batch) = full_batch {
            if self.sender.try_send(batch).is_err() {
                warn!("failure store flusher channel full or closed, dropping batch");
            }
        }
    }

    fn flush(&self) {
        let batch = {
            let mut buffer = self.buffer.lock().unwrap();
            if buffer.is_empty() {
                return;
            }
            std::mem::take(&mut *buffer)
        };
        if self.sender.try_send(batch).is_err() {
            warn!("failure store flusher channel full or closed, dropping batch");
        }
    }

    async fn close(self) {
        self.flush();
        drop(self.sender);
        if let Err(err) = self.handle.await {
            warn!(error = %err, "failure store flusher task panicked");
        }
    }
}

/// Two independently-flushed tables in one SQLite file: `failed_domains`
/// (PK `domain`) and `failed_urls` (PK `url`). Each table gets its own
/// bounded channel, batch size, and background flusher task.
pub struct FailureStore {
    domains: Flusher<FailedDomain>,
    urls: Flusher<FailedUrl>,
    read_pool: SqlitePool,
}

async fn insert_domains(pool: &SqlitePool, batch: &[FailedDomain]) -> Result<(), StoreError> {
    for row in batch {
        sqlx::query(
            "INSERT OR REPLACE INTO failed_domains
                (domain, reason, error_msg, ips, affected_url_count, stage, detected_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.domain)
        .bind(row.reason.to_string())
        .bind(&row.error_msg)
        .bind(row.ips.as_ref().map(|ips| ips.join(",")))
        .bind(row.affected_url_count as i64)
        .bind(row.stage.to_string())
        .bind(row.detected_at.to_rfc3339())
        .execute(pool)
        .await
        .map_err(StoreError::Query)?;
    }
    Ok(())
}

fn parse_stage(s: &str) -> FailStage {
    match s {
        "probe" => FailStage::Probe,
        "http" => FailStage::Http,
        _ => FailStage::Dns,
    }
}

async fn insert_urls(pool: &SqlitePool, batch: &[FailedUrl]) -> Result<(), StoreError> {
    for row in batch {
        sqlx::query(
            "INSERT OR REPLACE INTO failed_urls
                (url, domain, reason, error_msg, status_code, fetch_time_ms, content_type,
                 redirect_url, detected_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.url)
        .bind(&row.domain)
        .bind(row.reason.to_string())
        .bind(&row.error_msg)
        .bind(row.status_code.map(i64::from))
        .bind(row.fetch_time_ms.map(|v| v as i64))
        .bind(&row.content_type)
        .bind(&row.redirect_url)
        .bind(row.detected_at.to_rfc3339())
        .execute(pool)
        .await
        .map_err(StoreError::Query)?;
    }
    Ok(())
}

impl FailureStore {
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let setup_pool = pool::open(path)
            .await
            .map_err(|e| StoreError::Connect(path.to_string(), e))?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS failed_domains (
                domain TEXT PRIMARY KEY,
                reason TEXT NOT NULL,
                error_msg TEXT NOT NULL,
                ips TEXT,
                affected_url_count INTEGER NOT NULL,
                stage TEXT NOT NULL,
                detected_at TEXT NOT NULL
            )",
        )
        .execute(&setup_pool)
        .await
        .map_err(StoreError::Migrate)?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS failed_urls (
                url TEXT PRIMARY KEY,
                domain TEXT NOT NULL,
                reason TEXT NOT NULL,
                error_msg TEXT NOT NULL,
                status_code INTEGER,
                fetch_time_ms INTEGER,
                content_type TEXT,
                redirect_url TEXT,
                detected_at TEXT NOT NULL
            )",
        )
        .execute(&setup_pool)
        .await
        .map_err(StoreError::Migrate)?;

        let domain_pool = setup_pool.clone();
        let (domain_tx, mut domain_rx) = mpsc::channel::<Vec<FailedDomain>>(CHANNEL_DEPTH_BATCHES);
        let domain_handle = tokio::spawn(async move {
            while let Some(batch) = domain_rx.recv().await {
                if let Err(err) = insert_domains(&domain_pool, &batch).await {
                    warn!(error = %err, "failed_domains flush failed");
                }
            }
        });

        let read_pool = setup_pool.clone();
        let url_pool = setup_pool;
        let (url_tx, mut url_rx) = mpsc::channel::<Vec<FailedUrl>>(CHANNEL_DEPTH_BATCHES);
        let url_handle = tokio::spawn(async move {
            while let Some(batch) = url_rx.recv().await {
                if let Err(err) = insert_urls(&url_pool, &batch).await {
                    warn!(error = %err, "failed_urls flush failed");
                }
            }
        });

        Ok(Self {
            domains: Flusher {
                sender: domain_tx,
                buffer: std::sync::Mutex::new(Vec::with_capacity(DOMAIN_BATCH_SIZE)),
                batch_size: DOMAIN_BATCH_SIZE,
                handle: domain_handle,
            },
            urls: Flusher {
                sender: url_tx,
                buffer: std::sync::Mutex::new(Vec::with_capacity(URL_BATCH_SIZE)),
                batch_size: URL_BATCH_SIZE,
                handle: url_handle,
            },
            read_pool,
        })
    }

    pub fn record_domain(&self, domain: FailedDomain) {
        self.domains.push(domain);
    }

    pub fn record_url(&self, url: FailedUrl) {
        self.urls.push(url);
    }

    /// Load `failed_domains`, sorted descending by `affected_url_count` —
    /// the order the verifier re-checks domains in, so the domains
    /// affecting the most URLs are verified first. Not a runtime path for
    /// the recrawler itself; used only by the verifier's startup load.
    pub async fn load_domains_by_affected_url_count(&self) -> Result<Vec<FailedDomain>, StoreError> {
        let rows = sqlx::query(
            "SELECT domain, reason, error_msg, ips, affected_url_count, stage, detected_at
             FROM failed_domains ORDER BY affected_url_count DESC",
        )
        .fetch_all(&self.read_pool)
        .await
        .map_err(StoreError::Query)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            use sqlx::Row;
            let reason: String = row.try_get("reason").map_err(StoreError::Query)?;
            let stage: String = row.try_get("stage").map_err(StoreError::Query)?;
            let ips: Option<String> = row.try_get("ips").map_err(StoreError::Query)?;
            let detected_at: String = row.try_get("detected_at").map_err(StoreError::Query)?;
            out.push(FailedDomain {
                domain: row.try_get("domain").map_err(StoreError::Query)?,
                reason: reason.parse().map_err(StoreError::Decode)?,
                error_msg: row.try_get("error_msg").map_err(StoreError::Query)?,
                ips: ips.filter(|s| !s.is_empty()).map(|s| s.split(',').map(str::to_string).collect()),
                affected_url_count: {
                    let count: i64 = row.try_get("affected_url_count").map_err(StoreError::Query)?;
                    count as u64
                },
                stage: parse_stage(&stage),
                detected_at: chrono::DateTime::parse_from_rfc3339(&detected_at)
                    .map(|dt| dt.with_timezone(&chrono::Utc))
                    .unwrap_or_else(|_| chrono::Utc::now()),
            });
        }
        Ok(out)
    }

    pub fn flush(&self) {
        self.domains.flush();
        self.urls.flush();
    }

    pub async fn close(self) {
        self.domains.close().await;
        self.urls.close().await;
    }
}

/// Null-safe wrapper so callers can leave failure recording off without
/// branching at every call site: `FailureSink::Null` silently drops
/// everything handed to it.
pub enum FailureSink {
    Active(FailureStore),
    Null,
}

impl FailureSink {
    pub fn record_domain(&self, domain: FailedDomain) {
        if let FailureSink::Active(store) = self {
            store.record_domain(domain);
        }
    }

    pub fn record_url(&self, url: FailedUrl) {
        if let FailureSink::Active(store) = self {
            store.record_url(url);
        }
    }

    pub fn flush(&self) {
        if let FailureSink::Active(store) = self {
            store.flush();
        }
    }

    pub async fn close(self) {
        if let FailureSink::Active(store) = self {
            store.close().await;
        }
    }
}

impl From<Option<FailureStore>> for FailureSink {
    fn from(store: Option<FailureStore>) -> Self {
        match store {
            Some(store) => FailureSink::Active(store),
            None => FailureSink::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recrawl_core::{ErrorKind, FailStage};

    fn sample_domain() -> FailedDomain {
        FailedDomain {
            domain: "dead.example".to_string(),
            reason: ErrorKind::DnsNxdomain,
            error_msg: "no such host".to_string(),
            ips: None,
            affected_url_count: 3,
            stage: FailStage::Dns,
            detected_at: chrono::Utc::now(),
        }
    }

    fn sample_url() -> FailedUrl {
        FailedUrl {
            url: "https://dead.example/a".to_string(),
            domain: "dead.example".to_string(),
            reason: ErrorKind::DomainDnsNxdomain,
            error_msg: "no such host".to_string(),
            status_code: None,
            fetch_time_ms: None,
            content_type: None,
            redirect_url: None,
            detected_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn records_and_flushes_both_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failures.db");
        let store = FailureStore::open(path.to_str().unwrap()).await.unwrap();

        store.record_domain(sample_domain());
        store.record_url(sample_url());
        store.flush();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        store.close().await;

        let verify_pool = pool::open(path.to_str().unwrap()).await.unwrap();
        let domain_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM failed_domains")
            .fetch_one(&verify_pool)
            .await
            .unwrap();
        let url_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM failed_urls")
            .fetch_one(&verify_pool)
            .await
            .unwrap();
        assert_eq!(domain_count, 1);
        assert_eq!(url_count, 1);
    }

    #[tokio::test]
    async fn loads_domains_sorted_by_affected_url_count_desc() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failures.db");
        let store = FailureStore::open(path.to_str().unwrap()).await.unwrap();

        let mut small = sample_domain();
        small.domain = "small.example".to_string();
        small.affected_url_count = 1;
        let mut big = sample_domain();
        big.domain = "big.example".to_string();
        big.affected_url_count = 50;

        store.record_domain(small);
        store.record_domain(big);
        store.flush();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let loaded = store.load_domains_by_affected_url_count().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].domain, "big.example");
        assert_eq!(loaded[1].domain, "small.example");

        store.close().await;
    }

    #[tokio::test]
    async fn null_sink_is_a_no_op() {
        let sink = FailureSink::Null;
        sink.record_domain(sample_domain());
        sink.record_url(sample_url());
        sink.flush();
        sink.close().await;
    }
}
