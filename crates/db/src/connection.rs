use std::time::Duration;

use procura_core::config::DatabaseConfig;
use sqlx::sqlite::SqlitePoolOptions;

pub type DbPool = sqlx::SqlitePool;

/// Session settings applied to every pooled connection. WAL keeps
/// readers unblocked while approval transitions write; the busy
/// timeout makes competing conditional updates queue briefly instead
/// of failing on the spot.
const SESSION_PRAGMAS: &[&str] =
    &["PRAGMA foreign_keys = ON", "PRAGMA journal_mode = WAL", "PRAGMA busy_timeout = 5000"];

/// Open the request-store pool described by `config`.
pub async fn connect(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .acquire_timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                for pragma in SESSION_PRAGMAS {
                    sqlx::query(pragma).execute(&mut *conn).await?;
                }
                Ok(())
            })
        })
        .connect(&config.url)
        .await
}

/// Single-connection pool over a bare url, for tests and one-off tooling.
pub async fn connect_single(url: &str) -> Result<DbPool, sqlx::Error> {
    connect(&DatabaseConfig { url: url.to_string(), max_connections: 1, timeout_secs: 5 }).await
}
