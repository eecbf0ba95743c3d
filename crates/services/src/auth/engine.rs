//! The login state machine.
//!
//! A login attempt moves from provider selection either to the OAuth redirect
//! round trip or to a password check, and ends in an issued session. The
//! authenticated state lives in the Credential Store, the client only holds
//! the session token (and, during a redirect, the pending state token).

use super::events::EventNotifier;
use super::password::{credentials_well_formed, PasswordAuthenticator, PASSWORD_HASH_KEY};
use super::ports::{
    AuthError, CallbackGrant, ClientSession, LoginEventKind, LoginStateRepository, PendingLogin,
    ProfileId, ProfileRepository, SessionRecord, SessionRepository, SessionToken, TokenGenerator,
    UserProfile,
};
use super::providers::{ProviderEntry, ProviderRegistry};
use super::tokens::constant_time_eq;
use chrono::{Duration, Utc};
use config::{normalize_provider_name, PASSWORD_PROVIDER};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Client session key holding the session token.
pub const SESSION_TOKEN_KEY: &str = "clientlogin_session";
/// Client session key binding the pending OAuth state to the client.
pub const STATE_TOKEN_KEY: &str = "clientlogin_state";
/// A state token older than this no longer validates.
pub const STATE_TOKEN_TTL_SECS: i64 = 10 * 60;

/// What the transport should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginStep {
    /// Send the client to the provider.
    Redirect(String),
    /// The password provider was selected; ask for credentials.
    CredentialsRequired,
    /// A session is established.
    Authenticated {
        profile: UserProfile,
        return_url: String,
    },
}

pub struct SessionEngine {
    profiles: Arc<dyn ProfileRepository>,
    sessions: Arc<dyn SessionRepository>,
    states: Arc<dyn LoginStateRepository>,
    registry: Arc<ProviderRegistry>,
    tokens: Arc<dyn TokenGenerator>,
    notifier: EventNotifier,
    passwords: PasswordAuthenticator,
    debug_mode: bool,
}

impl SessionEngine {
    pub fn new(
        profiles: Arc<dyn ProfileRepository>,
        sessions: Arc<dyn SessionRepository>,
        states: Arc<dyn LoginStateRepository>,
        registry: Arc<ProviderRegistry>,
        tokens: Arc<dyn TokenGenerator>,
        notifier: EventNotifier,
    ) -> Self {
        Self {
            profiles,
            sessions,
            states,
            registry,
            tokens,
            notifier,
            passwords: PasswordAuthenticator::default(),
            debug_mode: false,
        }
    }

    pub fn with_password_authenticator(mut self, passwords: PasswordAuthenticator) -> Self {
        self.passwords = passwords;
        self
    }

    pub fn with_debug_mode(mut self, debug_mode: bool) -> Self {
        self.debug_mode = debug_mode;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Begin a login with the named provider.
    pub async fn start_login(
        &self,
        client: &dyn ClientSession,
        provider: &str,
        return_url: &str,
    ) -> Result<LoginStep, AuthError> {
        let entry = self.registry.resolve(provider)?;

        if let Some(profile) = self.is_logged_in(client).await? {
            debug!("Profile {} already logged in", profile.id);
            self.notifier.notify(LoginEventKind::Login, &profile).await;
            return Ok(LoginStep::Authenticated {
                profile,
                return_url: return_url.to_string(),
            });
        }

        if entry.is_password() {
            return Ok(LoginStep::CredentialsRequired);
        }

        let oauth = entry
            .handle
            .oauth_client()
            .ok_or_else(|| AuthError::InvalidProvider(entry.name().to_string()))?;

        let state = self.tokens.generate();
        let pending = PendingLogin {
            state: state.clone(),
            provider: entry.name().to_string(),
            return_url: return_url.to_string(),
            issued_at: Utc::now(),
        };
        self.states
            .create(&pending)
            .await
            .map_err(|e| AuthError::Store(format!("Failed to record state: {e}")))?;
        client
            .insert(STATE_TOKEN_KEY, state.clone())
            .await
            .map_err(|e| AuthError::Store(format!("Failed to save state: {e}")))?;

        let url = oauth.authorization_url(&state).await.map_err(|e| {
            self.log_exchange_failure(entry, &e);
            e
        })?;

        info!("Redirecting to {} for login", entry.name());
        Ok(LoginStep::Redirect(url))
    }

    /// Consume the pending state and check it against what the provider sent
    /// back. The pending state is removed whether or not it matches.
    ///
    /// The client session only binds the state to this client; the record in
    /// the state store decides which of several concurrent callbacks wins.
    ///
    /// Returns the URL the login should finish on.
    pub async fn check_state_token(
        &self,
        client: &dyn ClientSession,
        provider: &str,
        state: Option<&str>,
    ) -> Result<String, AuthError> {
        let bound = client
            .take(STATE_TOKEN_KEY)
            .await
            .map_err(|e| AuthError::Store(format!("Failed to read state: {e}")))?
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::CsrfMismatch)?;

        let pending = self
            .states
            .take(&bound)
            .await
            .map_err(|e| AuthError::Store(format!("Failed to consume state: {e}")))?;
        let Some(pending) = pending else {
            warn!("OAuth callback state already spent or unknown");
            return Err(AuthError::CsrfMismatch);
        };
        let state = state.filter(|s| !s.is_empty()).ok_or(AuthError::CsrfMismatch)?;

        let fresh = Utc::now() - pending.issued_at < Duration::seconds(STATE_TOKEN_TTL_SECS);
        let matches = constant_time_eq(&pending.state, state);
        let same_provider = pending.provider == normalize_provider_name(provider);

        if !(fresh && matches && same_provider) {
            warn!("Rejected OAuth callback state for {}", provider);
            return Err(AuthError::CsrfMismatch);
        }

        Ok(pending.return_url)
    }

    /// Finish an OAuth login after the provider redirected back.
    pub async fn complete_oauth_callback(
        &self,
        client: &dyn ClientSession,
        provider: &str,
        grant: CallbackGrant,
        state: Option<&str>,
    ) -> Result<LoginStep, AuthError> {
        // The pending state is spent even when the provider turns out invalid
        let checked = self.check_state_token(client, provider, state).await;

        let entry = self.registry.resolve(provider)?;
        let oauth = entry
            .handle
            .oauth_client()
            .ok_or_else(|| AuthError::InvalidProvider(entry.name().to_string()))?;
        let return_url = checked?;

        let identity = oauth.exchange(grant).await.map_err(|e| {
            self.log_exchange_failure(entry, &e);
            e
        })?;

        let provider_data = serde_json::to_value(&identity.profile)
            .map_err(|e| AuthError::ProviderExchange(format!("Unreadable profile: {e}")))?;
        let profile = self
            .upsert_profile(entry.name(), &identity.profile.external_uid, provider_data)
            .await?;
        self.issue_session(client, &profile, identity.token).await?;

        info!("{} login complete for profile {}", entry.name(), profile.id);
        self.notifier.notify(LoginEventKind::Login, &profile).await;

        Ok(LoginStep::Authenticated {
            profile,
            return_url,
        })
    }

    /// Log in with a local username and password.
    pub async fn login_password(
        &self,
        client: &dyn ClientSession,
        username: &str,
        password: &str,
        return_url: &str,
    ) -> Result<LoginStep, AuthError> {
        let entry = self.registry.resolve(PASSWORD_PROVIDER)?;

        if !credentials_well_formed(username, password) {
            debug!("Rejected malformed password credentials");
            return Err(AuthError::InvalidCredentials);
        }

        let profile = self
            .profiles
            .get_by_identifier(entry.name(), username)
            .await
            .map_err(|e| AuthError::Store(format!("Failed to load profile: {e}")))?;
        let stored_hash = profile
            .as_ref()
            .and_then(|p| p.provider_data.get(PASSWORD_HASH_KEY))
            .and_then(|h| h.as_str())
            .map(str::to_string);

        let passwords = self.passwords.clone();
        let candidate = password.to_string();
        let verified = tokio::task::spawn_blocking(move || match stored_hash {
            Some(hash) => passwords.verify(&hash, &candidate),
            None => {
                passwords.verify_dummy(&candidate);
                false
            }
        })
        .await
        .map_err(|e| AuthError::Store(format!("Password check did not finish: {e}")))?;

        let profile = match profile {
            Some(profile) if verified => profile,
            _ => {
                info!("Password login failed");
                return Err(AuthError::InvalidCredentials);
            }
        };

        self.issue_session(client, &profile, serde_json::Value::Null)
            .await?;

        info!("Password login complete for profile {}", profile.id);
        self.notifier.notify(LoginEventKind::Login, &profile).await;

        Ok(LoginStep::Authenticated {
            profile,
            return_url: return_url.to_string(),
        })
    }

    /// The profile behind the client's session token, if that session still
    /// exists.
    pub async fn is_logged_in(
        &self,
        client: &dyn ClientSession,
    ) -> Result<Option<UserProfile>, AuthError> {
        let Some(token) = self.client_token(client).await? else {
            return Ok(None);
        };

        let Some(record) = self.session_record(&token).await? else {
            debug!("Session token has no record");
            return Ok(None);
        };

        let profile = self
            .profiles
            .get_by_id(record.profile_id)
            .await
            .map_err(|e| AuthError::Store(format!("Failed to load profile: {e}")))?;

        if profile.is_some() {
            if let Err(e) = self.sessions.touch(&token).await {
                warn!("Failed to update session last seen time: {}", e);
            }
        }

        Ok(profile)
    }

    /// End the client's session. Returns the profile that was logged out.
    pub async fn logout(
        &self,
        client: &dyn ClientSession,
    ) -> Result<Option<UserProfile>, AuthError> {
        let Some(token) = self.client_token(client).await? else {
            return Ok(None);
        };

        let profile = match self.session_record(&token).await? {
            Some(record) => self
                .profiles
                .get_by_id(record.profile_id)
                .await
                .map_err(|e| AuthError::Store(format!("Failed to load profile: {e}")))?,
            None => None,
        };

        self.sessions
            .delete_by_token(&token)
            .await
            .map_err(|e| AuthError::Store(format!("Failed to delete session: {e}")))?;
        client
            .take(SESSION_TOKEN_KEY)
            .await
            .map_err(|e| AuthError::Store(format!("Failed to clear session token: {e}")))?;

        if let Some(profile) = &profile {
            info!("Profile {} logged out", profile.id);
            self.notifier.notify(LoginEventKind::Logout, profile).await;
        }

        Ok(profile)
    }

    /// Delete every session created more than `retention_days` ago.
    pub async fn prune_expired_sessions(&self, retention_days: u32) -> Result<usize, AuthError> {
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        let removed = self
            .sessions
            .delete_created_before(cutoff)
            .await
            .map_err(|e| AuthError::Store(format!("Failed to prune sessions: {e}")))?;

        info!("Pruned {} sessions created before {}", removed, cutoff);
        Ok(removed)
    }

    /// Drop OAuth states whose callback never arrived.
    pub async fn prune_stale_states(&self) -> Result<usize, AuthError> {
        let cutoff = Utc::now() - Duration::seconds(STATE_TOKEN_TTL_SECS);
        let removed = self
            .states
            .delete_issued_before(cutoff)
            .await
            .map_err(|e| AuthError::Store(format!("Failed to prune states: {e}")))?;

        debug!("Pruned {} stale login states", removed);
        Ok(removed)
    }

    pub async fn list_profile_sessions(
        &self,
        profile_id: ProfileId,
    ) -> Result<Vec<SessionRecord>, AuthError> {
        self.sessions
            .list_by_profile(profile_id)
            .await
            .map_err(|e| AuthError::Store(format!("Failed to list sessions: {e}")))
    }

    /// End every session of a profile, wherever it was issued.
    pub async fn revoke_profile_sessions(&self, profile_id: ProfileId) -> Result<usize, AuthError> {
        let removed = self
            .sessions
            .delete_all_for_profile(profile_id)
            .await
            .map_err(|e| AuthError::Store(format!("Failed to revoke sessions: {e}")))?;

        info!("Revoked {} sessions of profile {}", removed, profile_id);
        Ok(removed)
    }

    async fn client_token(
        &self,
        client: &dyn ClientSession,
    ) -> Result<Option<SessionToken>, AuthError> {
        Ok(client
            .get(SESSION_TOKEN_KEY)
            .await
            .map_err(|e| AuthError::Store(format!("Failed to read session token: {e}")))?
            .filter(|t| !t.is_empty())
            .map(SessionToken))
    }

    async fn session_record(&self, token: &SessionToken) -> Result<Option<SessionRecord>, AuthError> {
        self.sessions
            .get_by_token(token)
            .await
            .map_err(|e| AuthError::Store(format!("Failed to load session: {e}")))
    }

    /// Create the profile on first login, refresh its provider data after.
    async fn upsert_profile(
        &self,
        provider: &str,
        external_uid: &str,
        provider_data: serde_json::Value,
    ) -> Result<UserProfile, AuthError> {
        let existing = self
            .profiles
            .get_by_identifier(provider, external_uid)
            .await
            .map_err(|e| AuthError::Store(format!("Failed to load profile: {e}")))?;

        if let Some(existing) = existing {
            let updated = self
                .profiles
                .update_provider_data(existing.id, provider_data.clone())
                .await
                .map_err(|e| AuthError::Store(format!("Failed to update profile: {e}")))?;
            if let Some(updated) = updated {
                return Ok(updated);
            }
        }

        debug!("Creating {} profile", provider);
        self.profiles
            .create(provider, external_uid, provider_data)
            .await
            .map_err(|e| AuthError::Store(format!("Failed to create profile: {e}")))
    }

    /// Reuse the client's session if it already belongs to this profile,
    /// otherwise issue a new one. The record is written before the client
    /// receives the token.
    async fn issue_session(
        &self,
        client: &dyn ClientSession,
        profile: &UserProfile,
        provider_token: serde_json::Value,
    ) -> Result<SessionToken, AuthError> {
        if let Some(current) = self.client_token(client).await? {
            match self.session_record(&current).await? {
                Some(record) if record.profile_id == profile.id => {
                    debug!("Reusing session of profile {}", profile.id);
                    return Ok(current);
                }
                // The client is switching identity
                Some(_) => {
                    self.sessions
                        .delete_by_token(&current)
                        .await
                        .map_err(|e| AuthError::Store(format!("Failed to delete session: {e}")))?;
                }
                None => {}
            }
        }

        let token = SessionToken(self.tokens.generate());
        self.sessions
            .create(&token, profile.id, provider_token)
            .await
            .map_err(|e| AuthError::Store(format!("Failed to create session: {e}")))?;
        client
            .insert(SESSION_TOKEN_KEY, token.0.clone())
            .await
            .map_err(|e| AuthError::Store(format!("Failed to save session token: {e}")))?;

        Ok(token)
    }

    fn log_exchange_failure(&self, entry: &ProviderEntry, error: &AuthError) {
        if self.debug_mode {
            warn!("{} exchange failed: {:?}", entry.name(), error);
        } else {
            warn!("{} exchange failed: {}", entry.name(), error);
        }
    }
}
