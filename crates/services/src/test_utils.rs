// Test utilities for services crate
#![cfg(test)]

use crate::auth::{
    ClientSession, LoginEvent, LoginEventListener, LoginStateRepository, PendingLogin, ProfileId,
    ProfileRepository, SessionRecord, SessionRepository, SessionToken, TokenGenerator,
    UserProfile,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Client session backed by a plain map, standing in for the cookie session.
#[derive(Default)]
pub struct MemoryClientSession {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryClientSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }
}

#[async_trait]
impl ClientSession for MemoryClientSession {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.value(key))
    }

    async fn insert(&self, key: &str, value: String) -> anyhow::Result<()> {
        self.values.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn take(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.values.lock().unwrap().remove(key))
    }
}

/// Hands out `token-1`, `token-2`, ... so tests can predict state values.
#[derive(Default)]
pub struct SequentialTokenGenerator {
    next: AtomicUsize,
}

impl TokenGenerator for SequentialTokenGenerator {
    fn generate(&self) -> String {
        format!("token-{}", self.next.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// Records every event it receives.
#[derive(Default)]
pub struct CapturingListener {
    pub events: Mutex<Vec<LoginEvent>>,
}

impl CapturingListener {
    pub fn events(&self) -> Vec<LoginEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl LoginEventListener for CapturingListener {
    async fn handle(&self, event: &LoginEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub struct FailingListener;

#[async_trait]
impl LoginEventListener for FailingListener {
    async fn handle(&self, _event: &LoginEvent) -> anyhow::Result<()> {
        anyhow::bail!("listener unavailable")
    }
}

/// Credential Store whose every call fails, as if the database were down.
pub struct UnreachableStore;

#[async_trait]
impl ProfileRepository for UnreachableStore {
    async fn get_by_id(&self, _id: ProfileId) -> anyhow::Result<Option<UserProfile>> {
        anyhow::bail!("connection refused")
    }

    async fn get_by_identifier(
        &self,
        _provider: &str,
        _external_uid: &str,
    ) -> anyhow::Result<Option<UserProfile>> {
        anyhow::bail!("connection refused")
    }

    async fn create(
        &self,
        _provider: &str,
        _external_uid: &str,
        _provider_data: serde_json::Value,
    ) -> anyhow::Result<UserProfile> {
        anyhow::bail!("connection refused")
    }

    async fn update_provider_data(
        &self,
        _id: ProfileId,
        _provider_data: serde_json::Value,
    ) -> anyhow::Result<Option<UserProfile>> {
        anyhow::bail!("connection refused")
    }
}

#[async_trait]
impl SessionRepository for UnreachableStore {
    async fn create(
        &self,
        _token: &SessionToken,
        _profile_id: ProfileId,
        _provider_token: serde_json::Value,
    ) -> anyhow::Result<SessionRecord> {
        anyhow::bail!("connection refused")
    }

    async fn get_by_token(&self, _token: &SessionToken) -> anyhow::Result<Option<SessionRecord>> {
        anyhow::bail!("connection refused")
    }

    async fn touch(&self, _token: &SessionToken) -> anyhow::Result<bool> {
        anyhow::bail!("connection refused")
    }

    async fn delete_by_token(&self, _token: &SessionToken) -> anyhow::Result<bool> {
        anyhow::bail!("connection refused")
    }

    async fn list_by_profile(&self, _profile_id: ProfileId) -> anyhow::Result<Vec<SessionRecord>> {
        anyhow::bail!("connection refused")
    }

    async fn delete_all_for_profile(&self, _profile_id: ProfileId) -> anyhow::Result<usize> {
        anyhow::bail!("connection refused")
    }

    async fn delete_created_before(&self, _cutoff: DateTime<Utc>) -> anyhow::Result<usize> {
        anyhow::bail!("connection refused")
    }
}

#[async_trait]
impl LoginStateRepository for UnreachableStore {
    async fn create(&self, _pending: &PendingLogin) -> anyhow::Result<()> {
        anyhow::bail!("connection refused")
    }

    async fn take(&self, _state: &str) -> anyhow::Result<Option<PendingLogin>> {
        anyhow::bail!("connection refused")
    }

    async fn delete_issued_before(&self, _cutoff: DateTime<Utc>) -> anyhow::Result<usize> {
        anyhow::bail!("connection refused")
    }
}
