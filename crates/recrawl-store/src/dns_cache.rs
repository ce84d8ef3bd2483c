use chrono::Utc;
use recrawl_core::DomainResolution;
use sqlx::{Row, SqlitePool};

use crate::pool;
use crate::StoreError;

/// SQLite's default compiled-in bound parameter limit is 999; each row
/// binds 6 columns, so this leaves headroom for drivers with a lower limit.
const MAX_ROWS_PER_STATEMENT: usize = 150;

/// On-disk half of the DNS Cache Store: table
/// `dns(domain, ips, dead, error, timeout, resolved_at)`; `ips` is stored
/// as a comma-separated list.
pub struct DnsCacheStore {
    pool: SqlitePool,
}

impl DnsCacheStore {
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let pool = pool::open(path)
            .await
            .map_err(|e| StoreError::Connect(path.to_string(), e))?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS dns (
                domain TEXT PRIMARY KEY,
                ips TEXT,
                dead INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                timeout INTEGER NOT NULL DEFAULT 0,
                resolved_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(StoreError::Migrate)?;
        Ok(Self { pool })
    }

    /// Populate an in-memory cache at startup. A missing file is treated as
    /// an empty cache by virtue of `CREATE TABLE IF NOT EXISTS` in `open`; a
    /// missing `timeout` column from an older file is tolerated by this
    /// query defaulting it to `0` via `COALESCE`.
    pub async fn load(&self) -> Result<Vec<(String, DomainResolution)>, StoreError> {
        let rows = sqlx::query(
            "SELECT domain, ips, dead, error, COALESCE(timeout, 0) AS timeout FROM dns",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let domain: String = row.try_get("domain").map_err(StoreError::Query)?;
            let ips_csv: Option<String> = row.try_get("ips").map_err(StoreError::Query)?;
            let dead: i64 = row.try_get("dead").map_err(StoreError::Query)?;
            let error: Option<String> = row.try_get("error").map_err(StoreError::Query)?;
            let timeout: i64 = row.try_get("timeout").map_err(StoreError::Query)?;

            let resolution = if let Some(csv) = ips_csv.filter(|s| !s.is_empty()) {
                DomainResolution::Resolved {
                    ips: csv.split(',').map(str::to_string).collect(),
                }
            } else if dead != 0 {
                DomainResolution::Dead {
                    error: error.unwrap_or_default(),
                }
            } else if timeout != 0 {
                DomainResolution::Timeout {
                    error: error.unwrap_or_default(),
                }
            } else {
                continue;
            };
            out.push((domain, resolution));
        }
        Ok(out)
    }

    /// Bulk-replace the table from the given in-memory snapshot. Rows are
    /// chunked under `MAX_ROWS_PER_STATEMENT` and written as one multi-row
    /// `INSERT OR REPLACE` per chunk inside a single transaction.
    pub async fn save(&self, entries: &[(String, DomainResolution)]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::Query)?;
        sqlx::query("DELETE FROM dns")
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Query)?;

        let now = Utc::now().to_rfc3339();
        for chunk in entries.chunks(MAX_ROWS_PER_STATEMENT) {
            if chunk.is_empty() {
                continue;
            }
            let placeholders = std::iter::repeat("(?, ?, ?, ?, ?, ?)")
                .take(chunk.len())
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "INSERT OR REPLACE INTO dns (domain, ips, dead, error, timeout, resolved_at) VALUES {placeholders}"
            );
            let mut query = sqlx::query(&sql);
            for (domain, resolution) in chunk {
                let (ips, dead, error, timeout) = match resolution {
                    DomainResolution::Resolved { ips } => (Some(ips.join(",")), false, None, false),
                    DomainResolution::Dead { error } => (None, true, Some(escape(error)), false),
                    DomainResolution::Timeout { error } => (None, false, Some(escape(error)), true),
                };
                query = query
                    .bind(domain)
                    .bind(ips)
                    .bind(dead)
                    .bind(error)
                    .bind(timeout)
                    .bind(&now);
            }
            query.execute(&mut *tx).await.map_err(StoreError::Query)?;
        }

        tx.commit().await.map_err(StoreError::Query)
    }
}

/// Escapes tabs and newlines in error strings before writing so the
/// stored value stays on one line.
fn escape(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('\t', "\\t")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dns_cache.db");
        let store = DnsCacheStore::open(path.to_str().unwrap()).await.unwrap();

        let entries = vec![
            (
                "alive.com".to_string(),
                DomainResolution::Resolved {
                    ips: vec!["1.2.3.4".to_string(), "1.2.3.5".to_string()],
                },
            ),
            (
                "dead.com".to_string(),
                DomainResolution::Dead {
                    error: "nxdomain".to_string(),
                },
            ),
            (
                "slow.com".to_string(),
                DomainResolution::Timeout {
                    error: "timed out".to_string(),
                },
            ),
        ];
        store.save(&entries).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 3);
        let alive = loaded.iter().find(|(d, _)| d == "alive.com").unwrap();
        assert_eq!(alive.1.ips(), Some(&["1.2.3.4".to_string(), "1.2.3.5".to_string()][..]));
        let dead = loaded.iter().find(|(d, _)| d == "dead.com").unwrap();
        assert!(dead.1.is_dead());
        let slow = loaded.iter().find(|(d, _)| d == "slow.com").unwrap();
        assert!(slow.1.is_timeout());
    }

    #[tokio::test]
    async fn save_replaces_prior_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dns_cache.db");
        let store = DnsCacheStore::open(path.to_str().unwrap()).await.unwrap();

        store
            .save(&[(
                "a.com".to_string(),
                DomainResolution::Dead {
                    error: "nxdomain".to_string(),
                },
            )])
            .await
            .unwrap();
        store
            .save(&[(
                "b.com".to_string(),
                DomainResolution::Resolved {
                    ips: vec!["9.9.9.9".to_string()],
                },
            )])
            .await
            .unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0, "b.com");
    }

    #[test]
    fn escape_handles_tabs_and_newlines() {
        assert_eq!(escape("a\tb\nc"), "a\\tb\\nc");
    }
}
