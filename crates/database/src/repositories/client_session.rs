//! Cookie session records for `tower-sessions`, kept in PostgreSQL so a
//! client's login survives a restart and is shared between instances.

use crate::pool::DbPool;
use chrono::{DateTime, Utc};
use std::fmt;
use tower_sessions::{
    cookie::time::OffsetDateTime,
    session::{Id, Record},
    session_store::{self, SessionStore},
};
use tracing::debug;

#[derive(Clone)]
pub struct PgClientSessionStore {
    pool: DbPool,
}

impl fmt::Debug for PgClientSessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgClientSessionStore").finish_non_exhaustive()
    }
}

fn backend(e: impl fmt::Display) -> session_store::Error {
    session_store::Error::Backend(e.to_string())
}

fn expiry_to_chrono(expiry: OffsetDateTime) -> session_store::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(expiry.unix_timestamp(), expiry.nanosecond())
        .ok_or_else(|| session_store::Error::Encode("Expiry out of range".to_string()))
}

impl PgClientSessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a record under a fresh id. Returns false when the id is taken.
    async fn insert_new(&self, record: &Record) -> session_store::Result<bool> {
        let client = self.pool.get().await.map_err(backend)?;
        let data = serde_json::to_value(&record.data)
            .map_err(|e| session_store::Error::Encode(e.to_string()))?;

        let inserted = client
            .execute(
                r#"
                INSERT INTO client_transport_sessions (id, data, expiry_date)
                VALUES ($1, $2, $3)
                ON CONFLICT (id) DO NOTHING
                "#,
                &[
                    &record.id.to_string(),
                    &data,
                    &expiry_to_chrono(record.expiry_date)?,
                ],
            )
            .await
            .map_err(backend)?;

        Ok(inserted == 1)
    }

    /// Delete records whose cookie has expired
    pub async fn delete_expired(&self) -> anyhow::Result<usize> {
        let client = self.pool.get().await?;
        let result = client
            .execute(
                "DELETE FROM client_transport_sessions WHERE expiry_date <= $1",
                &[&Utc::now()],
            )
            .await?;

        debug!("Deleted {} expired client sessions", result);
        Ok(result as usize)
    }
}

#[async_trait::async_trait]
impl SessionStore for PgClientSessionStore {
    async fn create(&self, record: &mut Record) -> session_store::Result<()> {
        while !self.insert_new(record).await? {
            record.id = Id::default();
        }
        Ok(())
    }

    async fn save(&self, record: &Record) -> session_store::Result<()> {
        let client = self.pool.get().await.map_err(backend)?;
        let data = serde_json::to_value(&record.data)
            .map_err(|e| session_store::Error::Encode(e.to_string()))?;

        client
            .execute(
                r#"
                INSERT INTO client_transport_sessions (id, data, expiry_date)
                VALUES ($1, $2, $3)
                ON CONFLICT (id) DO UPDATE
                SET data = EXCLUDED.data, expiry_date = EXCLUDED.expiry_date
                "#,
                &[
                    &record.id.to_string(),
                    &data,
                    &expiry_to_chrono(record.expiry_date)?,
                ],
            )
            .await
            .map_err(backend)?;

        Ok(())
    }

    async fn load(&self, session_id: &Id) -> session_store::Result<Option<Record>> {
        let client = self.pool.get().await.map_err(backend)?;
        let row = client
            .query_opt(
                r#"
                SELECT data, expiry_date FROM client_transport_sessions
                WHERE id = $1 AND expiry_date > $2
                "#,
                &[&session_id.to_string(), &Utc::now()],
            )
            .await
            .map_err(backend)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let data = serde_json::from_value(row.get("data"))
            .map_err(|e| session_store::Error::Decode(e.to_string()))?;
        let expiry: DateTime<Utc> = row.get("expiry_date");
        let expiry_date = OffsetDateTime::from_unix_timestamp(expiry.timestamp())
            .map_err(|e| session_store::Error::Decode(e.to_string()))?;

        Ok(Some(Record {
            id: *session_id,
            data,
            expiry_date,
        }))
    }

    async fn delete(&self, session_id: &Id) -> session_store::Result<()> {
        let client = self.pool.get().await.map_err(backend)?;
        client
            .execute(
                "DELETE FROM client_transport_sessions WHERE id = $1",
                &[&session_id.to_string()],
            )
            .await
            .map_err(backend)?;
        Ok(())
    }
}
