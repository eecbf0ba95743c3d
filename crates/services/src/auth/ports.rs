use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(any(test, feature = "test-mocks"))]
use mockall::automock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Domain ID types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ProfileId(pub Uuid);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

/// Opaque bearer value proving an authenticated session.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SessionToken(pub String);

impl From<Uuid> for ProfileId {
    fn from(uuid: Uuid) -> Self {
        ProfileId(uuid)
    }
}

impl std::fmt::Display for ProfileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Never print the token itself
impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken(..)")
    }
}

// Domain models

/// One identity bound to one provider. Unique on `(provider, external_uid)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub id: ProfileId,
    pub provider: String,
    /// Provider-assigned identifier, or the username for the password provider.
    pub external_uid: String,
    /// Normalized profile material, provider specific.
    pub provider_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable record binding a session token to a profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub id: SessionId,
    pub profile_id: ProfileId,
    /// Credential artifact handed out by the provider.
    pub provider_token: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// An issued OAuth state, recorded server side until the callback spends it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingLogin {
    pub state: String,
    pub provider: String,
    /// Where the client goes once the login completes.
    pub return_url: String,
    pub issued_at: DateTime<Utc>,
}

/// Profile attributes returned by a provider, normalized across providers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NormalizedProfile {
    pub external_uid: String,
    pub name: Option<String>,
    pub nickname: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    /// Raw profile document as returned by the provider.
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// Result of a successful code exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderIdentity {
    pub token: serde_json::Value,
    pub profile: NormalizedProfile,
}

/// What the provider hands back on the callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackGrant {
    /// OAuth2 authorization code.
    AuthorizationCode(String),
    /// OAuth1 request token plus the verifier the user authorized.
    Verifier { token: String, verifier: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoginEventKind {
    Login,
    Logout,
}

impl std::fmt::Display for LoginEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoginEventKind::Login => write!(f, "clientlogin.Login"),
            LoginEventKind::Logout => write!(f, "clientlogin.Logout"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoginEvent {
    pub kind: LoginEventKind,
    pub profile: UserProfile,
}

// Error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Unknown, disabled or missing provider name.
    #[error("Invalid or disabled provider: {0}")]
    InvalidProvider(String),

    /// State token missing, expired or not matching. Deliberately carries no detail.
    #[error("Invalid state parameter")]
    CsrfMismatch,

    #[error("Provider exchange failed: {0}")]
    ProviderExchange(String),

    /// Unknown user and wrong password are indistinguishable.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

// Repository traits

/// Durable storage of user profiles.
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn get_by_id(&self, id: ProfileId) -> anyhow::Result<Option<UserProfile>>;

    async fn get_by_identifier(
        &self,
        provider: &str,
        external_uid: &str,
    ) -> anyhow::Result<Option<UserProfile>>;

    /// Create the profile for `(provider, external_uid)`. If a concurrent
    /// request created it first, its provider data is replaced instead.
    async fn create(
        &self,
        provider: &str,
        external_uid: &str,
        provider_data: serde_json::Value,
    ) -> anyhow::Result<UserProfile>;

    async fn update_provider_data(
        &self,
        id: ProfileId,
        provider_data: serde_json::Value,
    ) -> anyhow::Result<Option<UserProfile>>;
}

/// Durable storage of active sessions, keyed by session token.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(
        &self,
        token: &SessionToken,
        profile_id: ProfileId,
        provider_token: serde_json::Value,
    ) -> anyhow::Result<SessionRecord>;

    async fn get_by_token(&self, token: &SessionToken) -> anyhow::Result<Option<SessionRecord>>;

    /// Refresh `last_seen_at`. Returns false when the session no longer exists.
    async fn touch(&self, token: &SessionToken) -> anyhow::Result<bool>;

    async fn delete_by_token(&self, token: &SessionToken) -> anyhow::Result<bool>;

    async fn list_by_profile(&self, profile_id: ProfileId) -> anyhow::Result<Vec<SessionRecord>>;

    async fn delete_all_for_profile(&self, profile_id: ProfileId) -> anyhow::Result<usize>;

    /// Delete every session created strictly before `cutoff`.
    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<usize>;
}

/// Issued OAuth states, each spent at most once.
#[async_trait]
pub trait LoginStateRepository: Send + Sync {
    async fn create(&self, pending: &PendingLogin) -> anyhow::Result<()>;

    /// Remove and return the state in a single step. Of any number of
    /// concurrent callers presenting the same state, only one gets it back.
    async fn take(&self, state: &str) -> anyhow::Result<Option<PendingLogin>>;

    /// Drop states issued strictly before `cutoff`.
    async fn delete_issued_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<usize>;
}

/// Values scoped to the current client, kept by the transport (cookie
/// session). Must survive the redirect round trip to the provider.
#[async_trait]
pub trait ClientSession: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn insert(&self, key: &str, value: String) -> anyhow::Result<()>;

    /// Remove and return the value in one step.
    async fn take(&self, key: &str) -> anyhow::Result<Option<String>>;
}

/// Source of unguessable tokens.
#[cfg_attr(any(test, feature = "test-mocks"), automock)]
pub trait TokenGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Builds authorization URLs and exchanges callback grants for a profile,
/// hiding each provider's wire format.
#[cfg_attr(any(test, feature = "test-mocks"), automock)]
#[async_trait]
pub trait OAuthClient: Send + Sync {
    async fn authorization_url(&self, state: &str) -> Result<String, AuthError>;

    async fn exchange(&self, grant: CallbackGrant) -> Result<ProviderIdentity, AuthError>;
}

/// Receives login and logout notifications.
#[async_trait]
pub trait LoginEventListener: Send + Sync {
    async fn handle(&self, event: &LoginEvent) -> anyhow::Result<()>;
}
