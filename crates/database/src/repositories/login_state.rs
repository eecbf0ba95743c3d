use crate::pool::DbPool;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use services::auth::PendingLogin;
use tracing::debug;

pub struct PgLoginStateRepository {
    pool: DbPool,
}

impl PgLoginStateRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, pending: &PendingLogin) -> Result<()> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")?;

        client
            .execute(
                r#"
                INSERT INTO login_states (state, provider, return_url, issued_at)
                VALUES ($1, $2, $3, $4)
                "#,
                &[
                    &pending.state,
                    &pending.provider,
                    &pending.return_url,
                    &pending.issued_at,
                ],
            )
            .await
            .context("Failed to create login state")?;

        debug!("Created login state for provider: {}", pending.provider);
        Ok(())
    }

    /// Get and atomically delete state (prevents replay attacks)
    pub async fn get_and_delete(&self, state: &str) -> Result<Option<PendingLogin>> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")?;

        let row = client
            .query_opt(
                r#"
                DELETE FROM login_states
                WHERE state = $1
                RETURNING state, provider, return_url, issued_at
                "#,
                &[&state],
            )
            .await
            .context("Failed to get and delete login state")?;

        Ok(row.map(|row| PendingLogin {
            state: row.get("state"),
            provider: row.get("provider"),
            return_url: row.get("return_url"),
            issued_at: row.get("issued_at"),
        }))
    }

    pub async fn delete_issued_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")?;

        let result = client
            .execute("DELETE FROM login_states WHERE issued_at < $1", &[&cutoff])
            .await
            .context("Failed to clean up login states")?;

        debug!("Cleaned up {} stale login states", result);
        Ok(result as usize)
    }
}

#[async_trait::async_trait]
impl services::auth::LoginStateRepository for PgLoginStateRepository {
    async fn create(&self, pending: &PendingLogin) -> Result<()> {
        self.create(pending).await
    }

    async fn take(&self, state: &str) -> Result<Option<PendingLogin>> {
        self.get_and_delete(state).await
    }

    async fn delete_issued_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.delete_issued_before(cutoff).await
    }
}
