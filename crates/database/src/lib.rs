pub mod migrations;
pub mod models;
pub mod pool;
pub mod repositories;

pub use models::*;
pub use pool::{create_pool, create_pool_from_url, DbPool};
pub use repositories::{
    PgClientSessionStore, PgLoginStateRepository, PgProfileRepository, PgSessionRepository,
};

use anyhow::Result;
use std::sync::Arc;

/// Database-backed Credential Store
pub struct Database {
    pub profiles: Arc<PgProfileRepository>,
    pub sessions: Arc<PgSessionRepository>,
    pub login_states: Arc<PgLoginStateRepository>,
    pub client_sessions: PgClientSessionStore,
    pool: DbPool,
}

impl Database {
    /// Create a new database service from a connection pool
    pub fn new(pool: DbPool) -> Self {
        Self {
            profiles: Arc::new(PgProfileRepository::new(pool.clone())),
            sessions: Arc::new(PgSessionRepository::new(pool.clone())),
            login_states: Arc::new(PgLoginStateRepository::new(pool.clone())),
            client_sessions: PgClientSessionStore::new(pool.clone()),
            pool,
        }
    }

    /// Create a new database service from configuration
    pub async fn from_config(config: &config::DatabaseConfig) -> Result<Self> {
        let pool = create_pool(config).await?;
        Ok(Self::new(pool))
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run(&self.pool).await
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}
