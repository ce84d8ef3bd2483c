use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};

/// Open (creating if necessary) a SQLite pool tuned the same way across
/// every on-disk store in this workspace: WAL journaling so the batch
/// flushers never block readers, `synchronous=NORMAL` since a crash losing
/// the last few milliseconds of a recrawl run is an acceptable tradeoff for
/// write throughput, and a generous busy timeout so one shard's flusher
/// never trips `SQLITE_BUSY` against another connection on the same file.
pub async fn open(path: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(4)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
}

/// Same as [`open`] but for a pool that exists purely to stream rows (the
/// seed store): more read connections, no need to hold a writer slot open.
pub async fn open_read_only(path: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))?
        .create_if_missing(false)
        .read_only(true)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(4)
        .min_connections(1)
        .connect_with(options)
        .await
}
