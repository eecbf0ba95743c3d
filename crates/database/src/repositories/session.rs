use crate::models::ClientSessionRow;
use crate::pool::DbPool;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use services::auth::{ProfileId, SessionRecord, SessionToken};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

const SESSION_COLUMNS: &str =
    "id, profile_id, token_hash, provider_token, created_at, last_seen_at";

pub struct PgSessionRepository {
    pool: DbPool,
}

impl PgSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Hash a session token for storage
    pub fn hash_session_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub async fn create(
        &self,
        session_token: &str,
        profile_id: Uuid,
        provider_token: serde_json::Value,
    ) -> Result<ClientSessionRow> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")?;

        let id = Uuid::new_v4();
        let token_hash = Self::hash_session_token(session_token);
        let now = Utc::now();

        let row = client
            .query_one(
                &format!(
                    r#"
            INSERT INTO client_sessions (
                id, profile_id, token_hash, provider_token, created_at, last_seen_at
            )
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING {SESSION_COLUMNS}
            "#
                ),
                &[&id, &profile_id, &token_hash, &provider_token, &now],
            )
            .await
            .context("Failed to create session")?;

        debug!("Created session: {} for profile: {}", id, profile_id);

        Ok(self.row_to_session(&row))
    }

    pub async fn get_by_token(&self, session_token: &str) -> Result<Option<ClientSessionRow>> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")?;

        let token_hash = Self::hash_session_token(session_token);

        let row = client
            .query_opt(
                &format!("SELECT {SESSION_COLUMNS} FROM client_sessions WHERE token_hash = $1"),
                &[&token_hash],
            )
            .await
            .context("Failed to query session")?;

        Ok(row.map(|row| self.row_to_session(&row)))
    }

    pub async fn touch(&self, session_token: &str) -> Result<bool> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")?;

        let result = client
            .execute(
                "UPDATE client_sessions SET last_seen_at = $1 WHERE token_hash = $2",
                &[&Utc::now(), &Self::hash_session_token(session_token)],
            )
            .await
            .context("Failed to update session last seen time")?;

        Ok(result > 0)
    }

    pub async fn delete_by_token(&self, session_token: &str) -> Result<bool> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")?;

        let result = client
            .execute(
                "DELETE FROM client_sessions WHERE token_hash = $1",
                &[&Self::hash_session_token(session_token)],
            )
            .await
            .context("Failed to delete session")?;

        Ok(result > 0)
    }

    /// List sessions for a profile, newest first
    pub async fn list_by_profile(&self, profile_id: Uuid) -> Result<Vec<ClientSessionRow>> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")?;

        let rows = client
            .query(
                &format!(
                    r#"
            SELECT {SESSION_COLUMNS} FROM client_sessions
            WHERE profile_id = $1
            ORDER BY created_at DESC
            "#
                ),
                &[&profile_id],
            )
            .await
            .context("Failed to list profile sessions")?;

        Ok(rows.iter().map(|row| self.row_to_session(row)).collect())
    }

    /// Revoke all sessions for a profile
    pub async fn revoke_all_for_profile(&self, profile_id: Uuid) -> Result<usize> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")?;

        let result = client
            .execute(
                "DELETE FROM client_sessions WHERE profile_id = $1",
                &[&profile_id],
            )
            .await
            .context("Failed to revoke profile sessions")?;

        Ok(result as usize)
    }

    /// Delete sessions created strictly before `cutoff`
    pub async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")?;

        let result = client
            .execute(
                "DELETE FROM client_sessions WHERE created_at < $1",
                &[&cutoff],
            )
            .await
            .context("Failed to delete expired sessions")?;

        debug!("Deleted {} sessions created before {}", result, cutoff);
        Ok(result as usize)
    }

    // Helper function to convert database row to ClientSessionRow
    fn row_to_session(&self, row: &tokio_postgres::Row) -> ClientSessionRow {
        ClientSessionRow {
            id: row.get("id"),
            profile_id: row.get("profile_id"),
            token_hash: row.get("token_hash"),
            provider_token: row.get("provider_token"),
            created_at: row.get("created_at"),
            last_seen_at: row.get("last_seen_at"),
        }
    }
}

// Implement the service trait
#[async_trait::async_trait]
impl services::auth::SessionRepository for PgSessionRepository {
    async fn create(
        &self,
        token: &SessionToken,
        profile_id: ProfileId,
        provider_token: serde_json::Value,
    ) -> Result<SessionRecord> {
        Ok(self
            .create(&token.0, profile_id.0, provider_token)
            .await?
            .into())
    }

    async fn get_by_token(&self, token: &SessionToken) -> Result<Option<SessionRecord>> {
        Ok(self.get_by_token(&token.0).await?.map(Into::into))
    }

    async fn touch(&self, token: &SessionToken) -> Result<bool> {
        self.touch(&token.0).await
    }

    async fn delete_by_token(&self, token: &SessionToken) -> Result<bool> {
        self.delete_by_token(&token.0).await
    }

    async fn list_by_profile(&self, profile_id: ProfileId) -> Result<Vec<SessionRecord>> {
        Ok(self
            .list_by_profile(profile_id.0)
            .await?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    async fn delete_all_for_profile(&self, profile_id: ProfileId) -> Result<usize> {
        self.revoke_all_for_profile(profile_id.0).await
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.delete_created_before(cutoff).await
    }
}
