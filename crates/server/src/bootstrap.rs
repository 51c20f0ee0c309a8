use std::sync::Arc;

use procura_core::config::{AppConfig, ConfigError, LoadOptions};
use procura_core::ApprovalEngine;
use procura_db::repositories::{SqlRequestRepository, SqlUserRepository};
use procura_db::{connect, migrations, DbPool};
use thiserror::Error;
use tracing::info;

use crate::api::AppState;
use crate::artifact::PoGenerator;
use crate::auth::TokenService;
use crate::extraction::HeuristicExtractor;
use crate::storage::FsDocumentStore;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    state: AppState,
}

impl Application {
    pub fn state(&self) -> AppState {
        self.state.clone()
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("template initialization failed: {0}")]
    Template(#[source] tera::Error),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let store = Arc::new(FsDocumentStore::new(
        config.storage.media_dir.clone(),
        config.storage.base_url.clone(),
    ));
    let generator = Arc::new(PoGenerator::new(store.clone()).map_err(BootstrapError::Template)?);
    let extractor = Arc::new(HeuristicExtractor::new(store.clone()));

    let engine = Arc::new(ApprovalEngine::new(
        Arc::new(SqlRequestRepository::new(db_pool.clone())),
        generator,
        extractor,
    ));
    let tokens = Arc::new(TokenService::new(
        &config.auth.token_secret,
        config.auth.access_ttl_secs,
        config.auth.refresh_ttl_secs,
    ));
    let users = Arc::new(SqlUserRepository::new(db_pool.clone()));

    let state = AppState { engine, users, tokens, store };
    Ok(Application { config, db_pool, state })
}
