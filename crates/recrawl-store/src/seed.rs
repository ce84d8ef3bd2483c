use futures::stream::BoxStream;
use futures::StreamExt;
use recrawl_core::SeedUrl;
use sqlx::{Row, SqlitePool};

use crate::pool;
use crate::StoreError;

/// Read-only access to the seed database's `docs` table.
pub struct SeedLoader {
    pool: SqlitePool,
}

impl SeedLoader {
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let pool = pool::open_read_only(path)
            .await
            .map_err(|e| StoreError::Connect(path.to_string(), e))?;
        Ok(Self { pool })
    }

    /// Stream every `(url, domain)` row from `docs` without buffering the
    /// whole seed set in memory — seed sets are expected to run into the
    /// millions of rows.
    pub fn stream(&self) -> BoxStream<'_, Result<SeedUrl, StoreError>> {
        sqlx::query("SELECT url, domain FROM docs")
            .fetch(&self.pool)
            .map(|row| {
                let row = row.map_err(StoreError::Query)?;
                Ok(SeedUrl {
                    url: row.try_get("url").map_err(StoreError::Query)?,
                    domain: row.try_get("domain").map_err(StoreError::Query)?,
                })
            })
            .boxed()
    }

    /// Load the whole seed set eagerly. Convenient for tests and for small
    /// seed databases; production runs should prefer [`SeedLoader::stream`].
    pub async fn load_all(&self) -> Result<Vec<SeedUrl>, StoreError> {
        let mut stream = self.stream();
        let mut out = Vec::new();
        while let Some(row) = stream.next().await {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_db(dir: &tempfile::TempDir) -> String {
        let path = dir.path().join("seeds.db");
        let path_str = path.to_str().unwrap().to_string();
        let pool = crate::pool::open(&path_str).await.unwrap();
        sqlx::query("CREATE TABLE docs (url TEXT PRIMARY KEY, domain TEXT NOT NULL)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO docs (url, domain) VALUES ('https://a.com/1', 'a.com'), ('https://a.com/2', 'a.com'), ('https://b.com/1', 'b.com')")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;
        path_str
    }

    #[tokio::test]
    async fn loads_all_seed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = seeded_db(&dir).await;

        let loader = SeedLoader::open(&path).await.unwrap();
        let rows = loader.load_all().await.unwrap();

        assert_eq!(rows.len(), 3);
        assert!(rows.iter().any(|r| r.domain == "a.com" && r.url.ends_with("/1")));
    }
}
