use crate::models::ClientProfile;
use crate::pool::DbPool;
use anyhow::{Context, Result};
use chrono::Utc;
use services::auth::{ProfileId, UserProfile};
use tracing::debug;
use uuid::Uuid;

const PROFILE_COLUMNS: &str =
    "id, provider, external_uid, provider_data, created_at, updated_at";

pub struct PgProfileRepository {
    pool: DbPool,
}

impl PgProfileRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<ClientProfile>> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")?;

        let row = client
            .query_opt(
                &format!("SELECT {PROFILE_COLUMNS} FROM client_profiles WHERE id = $1"),
                &[&id],
            )
            .await
            .context("Failed to query profile")?;

        Ok(row.map(|row| self.row_to_profile(&row)))
    }

    pub async fn get_by_identifier(
        &self,
        provider: &str,
        external_uid: &str,
    ) -> Result<Option<ClientProfile>> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")?;

        let row = client
            .query_opt(
                &format!(
                    "SELECT {PROFILE_COLUMNS} FROM client_profiles WHERE provider = $1 AND external_uid = $2"
                ),
                &[&provider, &external_uid],
            )
            .await
            .context("Failed to query profile by identifier")?;

        Ok(row.map(|row| self.row_to_profile(&row)))
    }

    /// Insert a profile; a concurrent insert of the same identity turns into
    /// an update of its provider data.
    pub async fn create(
        &self,
        provider: &str,
        external_uid: &str,
        provider_data: serde_json::Value,
    ) -> Result<ClientProfile> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")?;

        let id = Uuid::new_v4();
        let now = Utc::now();

        let row = client
            .query_one(
                &format!(
                    r#"
                INSERT INTO client_profiles (id, provider, external_uid, provider_data, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $5)
                ON CONFLICT (provider, external_uid) DO UPDATE SET
                    provider_data = EXCLUDED.provider_data,
                    updated_at = EXCLUDED.updated_at
                RETURNING {PROFILE_COLUMNS}
                "#
                ),
                &[&id, &provider, &external_uid, &provider_data, &now],
            )
            .await
            .context("Failed to create profile")?;

        let profile = self.row_to_profile(&row);
        debug!("Stored {} profile {}", provider, profile.id);
        Ok(profile)
    }

    pub async fn update_provider_data(
        &self,
        id: Uuid,
        provider_data: serde_json::Value,
    ) -> Result<Option<ClientProfile>> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")?;

        let row = client
            .query_opt(
                &format!(
                    r#"
                UPDATE client_profiles
                SET provider_data = $2, updated_at = $3
                WHERE id = $1
                RETURNING {PROFILE_COLUMNS}
                "#
                ),
                &[&id, &provider_data, &Utc::now()],
            )
            .await
            .context("Failed to update profile")?;

        Ok(row.map(|row| self.row_to_profile(&row)))
    }

    // Helper function to convert database row to ClientProfile
    fn row_to_profile(&self, row: &tokio_postgres::Row) -> ClientProfile {
        ClientProfile {
            id: row.get("id"),
            provider: row.get("provider"),
            external_uid: row.get("external_uid"),
            provider_data: row.get("provider_data"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

// Implement the service trait
#[async_trait::async_trait]
impl services::auth::ProfileRepository for PgProfileRepository {
    async fn get_by_id(&self, id: ProfileId) -> Result<Option<UserProfile>> {
        Ok(self.get_by_id(id.0).await?.map(Into::into))
    }

    async fn get_by_identifier(
        &self,
        provider: &str,
        external_uid: &str,
    ) -> Result<Option<UserProfile>> {
        Ok(self
            .get_by_identifier(provider, external_uid)
            .await?
            .map(Into::into))
    }

    async fn create(
        &self,
        provider: &str,
        external_uid: &str,
        provider_data: serde_json::Value,
    ) -> Result<UserProfile> {
        Ok(self
            .create(provider, external_uid, provider_data)
            .await?
            .into())
    }

    async fn update_provider_data(
        &self,
        id: ProfileId,
        provider_data: serde_json::Value,
    ) -> Result<Option<UserProfile>> {
        Ok(self
            .update_provider_data(id.0, provider_data)
            .await?
            .map(Into::into))
    }
}
