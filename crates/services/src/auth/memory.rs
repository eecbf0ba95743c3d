//! Process-local credential store, used when no database is configured and
//! throughout the tests. Sessions do not survive a restart.

use super::ports::{
    LoginStateRepository, PendingLogin, ProfileId, ProfileRepository, SessionId, SessionRecord,
    SessionRepository, SessionToken, UserProfile,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    profiles: HashMap<ProfileId, UserProfile>,
    sessions: HashMap<SessionToken, SessionRecord>,
    states: HashMap<String, PendingLogin>,
}

#[derive(Default)]
pub struct InMemoryCredentialStore {
    inner: RwLock<Inner>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a session's creation time, for exercising expiry.
    pub async fn backdate_session(&self, token: &SessionToken, created_at: DateTime<Utc>) -> bool {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(token) {
            Some(record) => {
                record.created_at = created_at;
                true
            }
            None => false,
        }
    }

    pub async fn session_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    pub async fn profile_count(&self) -> usize {
        self.inner.read().await.profiles.len()
    }

    pub async fn pending_state_count(&self) -> usize {
        self.inner.read().await.states.len()
    }
}

#[async_trait]
impl ProfileRepository for InMemoryCredentialStore {
    async fn get_by_id(&self, id: ProfileId) -> anyhow::Result<Option<UserProfile>> {
        Ok(self.inner.read().await.profiles.get(&id).cloned())
    }

    async fn get_by_identifier(
        &self,
        provider: &str,
        external_uid: &str,
    ) -> anyhow::Result<Option<UserProfile>> {
        let inner = self.inner.read().await;
        Ok(inner
            .profiles
            .values()
            .find(|p| p.provider == provider && p.external_uid == external_uid)
            .cloned())
    }

    async fn create(
        &self,
        provider: &str,
        external_uid: &str,
        provider_data: serde_json::Value,
    ) -> anyhow::Result<UserProfile> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        // Same identity under the write lock means a concurrent create won
        if let Some(existing) = inner
            .profiles
            .values_mut()
            .find(|p| p.provider == provider && p.external_uid == external_uid)
        {
            existing.provider_data = provider_data;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let profile = UserProfile {
            id: ProfileId(Uuid::new_v4()),
            provider: provider.to_string(),
            external_uid: external_uid.to_string(),
            provider_data,
            created_at: now,
            updated_at: now,
        };
        inner.profiles.insert(profile.id, profile.clone());
        Ok(profile)
    }

    async fn update_provider_data(
        &self,
        id: ProfileId,
        provider_data: serde_json::Value,
    ) -> anyhow::Result<Option<UserProfile>> {
        let mut inner = self.inner.write().await;
        Ok(inner.profiles.get_mut(&id).map(|profile| {
            profile.provider_data = provider_data;
            profile.updated_at = Utc::now();
            profile.clone()
        }))
    }
}

#[async_trait]
impl SessionRepository for InMemoryCredentialStore {
    async fn create(
        &self,
        token: &SessionToken,
        profile_id: ProfileId,
        provider_token: serde_json::Value,
    ) -> anyhow::Result<SessionRecord> {
        let mut inner = self.inner.write().await;
        if !inner.profiles.contains_key(&profile_id) {
            anyhow::bail!("Profile {} does not exist", profile_id);
        }
        if inner.sessions.contains_key(token) {
            anyhow::bail!("Session token already in use");
        }

        let now = Utc::now();
        let record = SessionRecord {
            id: SessionId(Uuid::new_v4()),
            profile_id,
            provider_token,
            created_at: now,
            last_seen_at: now,
        };
        inner.sessions.insert(token.clone(), record.clone());
        Ok(record)
    }

    async fn get_by_token(&self, token: &SessionToken) -> anyhow::Result<Option<SessionRecord>> {
        Ok(self.inner.read().await.sessions.get(token).cloned())
    }

    async fn touch(&self, token: &SessionToken) -> anyhow::Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(match inner.sessions.get_mut(token) {
            Some(record) => {
                record.last_seen_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn delete_by_token(&self, token: &SessionToken) -> anyhow::Result<bool> {
        Ok(self.inner.write().await.sessions.remove(token).is_some())
    }

    async fn list_by_profile(&self, profile_id: ProfileId) -> anyhow::Result<Vec<SessionRecord>> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<_> = inner
            .sessions
            .values()
            .filter(|s| s.profile_id == profile_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn delete_all_for_profile(&self, profile_id: ProfileId) -> anyhow::Result<usize> {
        let mut inner = self.inner.write().await;
        let before = inner.sessions.len();
        inner.sessions.retain(|_, s| s.profile_id != profile_id);
        Ok(before - inner.sessions.len())
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<usize> {
        let mut inner = self.inner.write().await;
        let before = inner.sessions.len();
        inner.sessions.retain(|_, s| s.created_at >= cutoff);
        Ok(before - inner.sessions.len())
    }
}

#[async_trait]
impl LoginStateRepository for InMemoryCredentialStore {
    async fn create(&self, pending: &PendingLogin) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        if inner.states.contains_key(&pending.state) {
            anyhow::bail!("State already issued");
        }
        inner.states.insert(pending.state.clone(), pending.clone());
        Ok(())
    }

    async fn take(&self, state: &str) -> anyhow::Result<Option<PendingLogin>> {
        Ok(self.inner.write().await.states.remove(state))
    }

    async fn delete_issued_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<usize> {
        let mut inner = self.inner.write().await;
        let before = inner.states.len();
        inner.states.retain(|_, p| p.issued_at >= cutoff);
        Ok(before - inner.states.len())
    }
}
