//! Readiness endpoint on its own listener. A request is only
//! serviceable when both hard dependencies are up: the request
//! database, and the media directory that receives uploads and
//! generated purchase orders.

use std::path::PathBuf;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use procura_db::DbPool;
use serde::Serialize;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    media_dir: PathBuf,
}

#[derive(Clone, Debug, Serialize)]
pub struct ComponentStatus {
    pub ok: bool,
    pub detail: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ReadinessReport {
    pub ready: bool,
    pub database: ComponentStatus,
    pub document_store: ComponentStatus,
    pub checked_at: DateTime<Utc>,
}

pub fn router(db_pool: DbPool, media_dir: PathBuf) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, media_dir })
}

pub async fn spawn(
    bind_address: &str,
    port: u16,
    db_pool: DbPool,
    media_dir: PathBuf,
) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(db_pool, media_dir)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<ReadinessReport>) {
    let database = check_database(&state.db_pool).await;
    let document_store = check_document_store(&state.media_dir).await;
    let ready = database.ok && document_store.ok;

    let report = ReadinessReport { ready, database, document_store, checked_at: Utc::now() };
    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(report))
}

async fn check_database(pool: &DbPool) -> ComponentStatus {
    match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM purchase_request")
        .fetch_one(pool)
        .await
    {
        Ok(count) => ComponentStatus { ok: true, detail: format!("{count} request(s) on record") },
        Err(error) => {
            ComponentStatus { ok: false, detail: format!("request store unreachable: {error}") }
        }
    }
}

async fn check_document_store(media_dir: &PathBuf) -> ComponentStatus {
    // Same call the document store makes before every write; if it
    // fails here, uploads and purchase orders would fail too.
    match tokio::fs::create_dir_all(media_dir).await {
        Ok(()) => ComponentStatus {
            ok: true,
            detail: format!("media directory `{}` writable", media_dir.display()),
        },
        Err(error) => ComponentStatus {
            ok: false,
            detail: format!("media directory `{}` unavailable: {error}", media_dir.display()),
        },
    }
}

#[cfg(test)]
mod tests {
    use axum::{extract::State, http::StatusCode, Json};
    use procura_db::{connect_single, migrations};

    use crate::health::{health, HealthState};

    async fn ready_pool() -> procura_db::DbPool {
        let pool =
            connect_single("sqlite::memory:?cache=shared").await.expect("pool should connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn reports_ready_when_database_and_media_dir_are_usable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state =
            HealthState { db_pool: ready_pool().await, media_dir: dir.path().join("media") };

        let (status, Json(report)) = health(State(state.clone())).await;

        assert_eq!(status, StatusCode::OK);
        assert!(report.ready);
        assert!(report.database.ok);
        assert!(report.document_store.ok);

        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn unreachable_database_degrades_readiness() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = ready_pool().await;
        pool.close().await;

        let (status, Json(report)) =
            health(State(HealthState { db_pool: pool, media_dir: dir.path().join("media") })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!report.ready);
        assert!(!report.database.ok);
        assert!(report.document_store.ok, "media check is independent of the database");
    }

    #[tokio::test]
    async fn unusable_media_directory_degrades_readiness() {
        let dir = tempfile::tempdir().expect("tempdir");
        let occupied = dir.path().join("media");
        tokio::fs::write(&occupied, b"not a directory").await.expect("write blocker");

        let state = HealthState { db_pool: ready_pool().await, media_dir: occupied };
        let (status, Json(report)) = health(State(state.clone())).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!report.ready);
        assert!(report.database.ok);
        assert!(!report.document_store.ok);

        state.db_pool.close().await;
    }
}
