use recrawl_core::VerifyResult;
use sqlx::{Row, SqlitePool};

use crate::pool;
use crate::StoreError;

const BATCH_SIZE: usize = 200;

/// Verifier output: `verified_domains` rows plus a sibling `meta(key,
/// value)` table for the aggregate summary (total, alive, dead,
/// false-positive rate, run timestamp).
pub struct VerifyStore {
    pool: SqlitePool,
}

impl VerifyStore {
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let pool = pool::open(path)
            .await
            .map_err(|e| StoreError::Connect(path.to_string(), e))?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS verified_domains (
                domain TEXT PRIMARY KEY,
                original_reason TEXT NOT NULL,
                dns_system_ips TEXT,
                dns_google_ips TEXT,
                dns_cloudflare_ips TEXT,
                dns_alive INTEGER NOT NULL,
                http_status INTEGER,
                https_status INTEGER,
                http_error TEXT,
                https_error TEXT,
                http_alive INTEGER NOT NULL,
                is_truly_dead INTEGER NOT NULL,
                false_positive INTEGER NOT NULL,
                verified_at TEXT NOT NULL,
                verify_time_ms INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(StoreError::Migrate)?;
        sqlx::query("CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)")
            .execute(&pool)
            .await
            .map_err(StoreError::Migrate)?;
        Ok(Self { pool })
    }

    /// Write one batch of verification results as a single multi-row
    /// `INSERT OR REPLACE`, chunked to stay under the batch size.
    pub async fn write_batch(&self, results: &[VerifyResult]) -> Result<(), StoreError> {
        for chunk in results.chunks(BATCH_SIZE) {
            if chunk.is_empty() {
                continue;
            }
            let placeholders = std::iter::repeat("(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)")
                .take(chunk.len())
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "INSERT OR REPLACE INTO verified_domains
                    (domain, original_reason, dns_system_ips, dns_google_ips,
                     dns_cloudflare_ips, dns_alive, http_status, https_status, http_error,
                     https_error, http_alive, is_truly_dead, false_positive, verified_at,
                     verify_time_ms)
                 VALUES {placeholders}"
            );
            let mut query = sqlx::query(&sql);
            for r in chunk {
                query = query
                    .bind(&r.domain)
                    .bind(r.original_reason.to_string())
                    .bind(r.dns_system_ips.join(","))
                    .bind(r.dns_google_ips.join(","))
                    .bind(r.dns_cloudflare_ips.join(","))
                    .bind(r.dns_alive)
                    .bind(r.http_status.map(i64::from))
                    .bind(r.https_status.map(i64::from))
                    .bind(&r.http_error)
                    .bind(&r.https_error)
                    .bind(r.http_alive)
                    .bind(r.is_truly_dead)
                    .bind(r.false_positive)
                    .bind(r.verified_at.to_rfc3339())
                    .bind(r.verify_time_ms as i64);
            }
            query.execute(&self.pool).await.map_err(StoreError::Query)?;
        }
        Ok(())
    }

    /// Write the run's aggregate summary into `meta`. Called once, at the
    /// end of a verify run.
    pub async fn write_meta(&self, meta: &VerifyRunMeta) -> Result<(), StoreError> {
        let pairs = [
            ("total", meta.total.to_string()),
            ("alive", meta.alive.to_string()),
            ("dead", meta.dead.to_string()),
            ("false_positive_rate", meta.false_positive_rate.to_string()),
            ("run_timestamp", meta.run_timestamp.to_rfc3339()),
        ];
        for (key, value) in pairs {
            sqlx::query("INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&self.pool)
                .await
                .map_err(StoreError::Query)?;
        }
        Ok(())
    }

    pub async fn read_meta(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT value FROM meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Query)?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }
}

/// Aggregate summary of one verifier run, written to the `meta` table.
#[derive(Debug, Clone)]
pub struct VerifyRunMeta {
    pub total: u64,
    pub alive: u64,
    pub dead: u64,
    pub false_positive_rate: f64,
    pub run_timestamp: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(domain: &str, is_truly_dead: bool) -> VerifyResult {
        VerifyResult {
            domain: domain.to_string(),
            original_reason: recrawl_core::ErrorKind::DnsTimeout,
            dns_system_ips: vec![],
            dns_google_ips: vec![],
            dns_cloudflare_ips: vec![],
            dns_alive: !is_truly_dead,
            http_status: None,
            https_status: None,
            http_error: None,
            https_error: None,
            http_alive: false,
            is_truly_dead,
            false_positive: !is_truly_dead,
            verified_at: chrono::Utc::now(),
            verify_time_ms: 120,
        }
    }

    #[tokio::test]
    async fn writes_batch_and_meta() {
        let dir = tempfile::tempdir().unwrap();
        let store = VerifyStore::open(dir.path().join("verify.db").to_str().unwrap())
            .await
            .unwrap();

        store
            .write_batch(&[sample("a.com", true), sample("b.com", false)])
            .await
            .unwrap();
        store
            .write_meta(&VerifyRunMeta {
                total: 2,
                alive: 1,
                dead: 1,
                false_positive_rate: 0.5,
                run_timestamp: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let total = store.read_meta("total").await.unwrap();
        assert_eq!(total.as_deref(), Some("2"));
    }
}
