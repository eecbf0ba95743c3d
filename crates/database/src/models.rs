use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Row of `client_profiles`: one identity at one provider
#[derive(Debug, Clone)]
pub struct ClientProfile {
    pub id: Uuid,
    pub provider: String,
    pub external_uid: String,
    pub provider_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row of `client_sessions`. Only the SHA-256 of the session token is stored.
#[derive(Debug, Clone)]
pub struct ClientSessionRow {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub token_hash: String,
    pub provider_token: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl From<ClientProfile> for services::auth::UserProfile {
    fn from(row: ClientProfile) -> Self {
        Self {
            id: services::auth::ProfileId(row.id),
            provider: row.provider,
            external_uid: row.external_uid,
            provider_data: row.provider_data,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<ClientSessionRow> for services::auth::SessionRecord {
    fn from(row: ClientSessionRow) -> Self {
        Self {
            id: services::auth::SessionId(row.id),
            profile_id: services::auth::ProfileId(row.profile_id),
            provider_token: row.provider_token,
            created_at: row.created_at,
            last_seen_at: row.last_seen_at,
        }
    }
}
