#![allow(dead_code)]

use api::{build_app, AppState, ClientSessionStore};
use argon2::Params;
use async_trait::async_trait;
use axum_test::{TestRequest, TestResponse, TestServer};
use config::{AuthConfig, ProviderConfig, ProviderSettings};
use services::auth::{
    AuthError, CallbackGrant, EventNotifier, InMemoryCredentialStore, MockOAuthClient,
    NormalizedProfile, OAuthClient, PasswordAuthenticator, ProfileRepository, ProviderHandle,
    ProviderIdentity, ProviderRegistry, RandomTokenGenerator, SessionEngine,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower_sessions::MemoryStore;

pub const GOOD_CODE: &str = "good-code";
pub const GITHUB_UID: &str = "42";

/// Auth configuration with GitHub and the local password provider enabled
pub fn test_auth_config() -> AuthConfig {
    let mut config = AuthConfig::default();
    config.providers.insert(
        "GitHub".to_string(),
        ProviderSettings {
            enabled: true,
            client_id: Some("client-id".to_string()),
            client_secret: Some("client-secret".to_string()),
            ..Default::default()
        },
    );
    config.providers.insert(
        "Password".to_string(),
        ProviderSettings {
            enabled: true,
            ..Default::default()
        },
    );
    config
}

fn provider(name: &str) -> ProviderConfig {
    ProviderConfig {
        name: name.to_string(),
        enabled: true,
        client_id: "client-id".to_string(),
        client_secret: "client-secret".to_string(),
        scopes: vec![],
    }
}

pub fn fast_passwords() -> PasswordAuthenticator {
    PasswordAuthenticator::new(Params::new(1024, 1, 1, None).unwrap())
}

/// GitHub stand-in: echoes the state into the authorize URL and accepts
/// only `good-code`.
pub fn mock_github() -> MockOAuthClient {
    let mut client = MockOAuthClient::new();
    client
        .expect_authorization_url()
        .returning(|state| Ok(format!("https://github.example/authorize?state={state}")));
    client.expect_exchange().returning(|grant| match grant {
        CallbackGrant::AuthorizationCode(code) if code == GOOD_CODE => Ok(ProviderIdentity {
            token: serde_json::json!({"access_token": "gho_test"}),
            profile: NormalizedProfile {
                external_uid: GITHUB_UID.to_string(),
                name: Some("Octo Cat".to_string()),
                nickname: Some("octocat".to_string()),
                email: Some("octo@example.com".to_string()),
                ..Default::default()
            },
        }),
        _ => Err(AuthError::ProviderExchange(
            "bad_verification_code: client_secret=client-secret".to_string(),
        )),
    });
    client
}

pub struct TestApp {
    pub server: TestServer,
    pub store: Arc<InMemoryCredentialStore>,
    pub client_sessions: MemoryStore,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_github(mock_github())
    }

    pub fn with_github(github: MockOAuthClient) -> Self {
        Self::with_oauth_client(Arc::new(github))
    }

    pub fn with_oauth_client(github: Arc<dyn OAuthClient>) -> Self {
        Self::build(
            github,
            Arc::new(InMemoryCredentialStore::new()),
            MemoryStore::default(),
        )
    }

    /// A fresh process over the same durable stores, as after a restart.
    pub fn restarted(&self) -> Self {
        Self::build(
            Arc::new(mock_github()),
            self.store.clone(),
            self.client_sessions.clone(),
        )
    }

    fn build(
        github: Arc<dyn OAuthClient>,
        store: Arc<InMemoryCredentialStore>,
        client_sessions: MemoryStore,
    ) -> Self {
        let config = test_auth_config();

        let mut registry = ProviderRegistry::new();
        registry
            .register(
                provider("GitHub"),
                config.redirect_uri("GitHub"),
                ProviderHandle::OAuth2(github),
            )
            .unwrap();
        registry
            .register(provider("Password"), String::new(), ProviderHandle::Password)
            .unwrap();

        let engine = SessionEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(registry),
            Arc::new(RandomTokenGenerator),
            EventNotifier::new(false),
        )
        .with_password_authenticator(fast_passwords());

        let app = build_app(AppState::new(
            Arc::new(engine),
            config,
            ClientSessionStore::Memory(client_sessions.clone()),
        ));
        let server = TestServer::new(app).unwrap();

        Self {
            server,
            store,
            client_sessions,
        }
    }

    pub async fn add_password_user(&self, username: &str, password: &str) {
        let hash = fast_passwords().hash(password).unwrap();
        ProfileRepository::create(
            self.store.as_ref(),
            "Password",
            username,
            serde_json::json!({ "password": hash }),
        )
        .await
        .unwrap();
    }
}

/// GitHub stand-in whose code exchange takes a while and counts its calls.
#[derive(Default)]
pub struct SlowGithub {
    pub exchanges: AtomicUsize,
}

#[async_trait]
impl OAuthClient for SlowGithub {
    async fn authorization_url(&self, state: &str) -> Result<String, AuthError> {
        Ok(format!("https://github.example/authorize?state={state}"))
    }

    async fn exchange(&self, _grant: CallbackGrant) -> Result<ProviderIdentity, AuthError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(ProviderIdentity {
            token: serde_json::json!({"access_token": "gho_slow"}),
            profile: NormalizedProfile {
                external_uid: GITHUB_UID.to_string(),
                ..Default::default()
            },
        })
    }
}

/// Minimal cookie jar: the session layer keeps one cookie per client.
#[derive(Debug, Default, Clone)]
pub struct Browser {
    cookie: Option<String>,
}

impl Browser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, request: TestRequest) -> TestRequest {
        match &self.cookie {
            Some(cookie) => request.add_header("cookie", cookie.clone()),
            None => request,
        }
    }

    /// Remember the session cookie if the response set one.
    pub fn remember(&mut self, response: &TestResponse) {
        if let Some(value) = response
            .headers()
            .get("set-cookie")
            .and_then(|v| v.to_str().ok())
        {
            let pair = value.split(';').next().unwrap_or_default().trim();
            if !pair.is_empty() {
                self.cookie = Some(pair.to_string());
            }
        }
    }

    pub fn has_cookie(&self) -> bool {
        self.cookie.is_some()
    }
}

pub fn location(response: &TestResponse) -> String {
    response
        .headers()
        .get("location")
        .expect("redirect without a location")
        .to_str()
        .unwrap()
        .to_string()
}

/// Pull the `state` query parameter out of a provider authorize URL.
pub fn state_param(url: &str) -> String {
    url.split("state=")
        .nth(1)
        .expect("authorize URL without state")
        .split('&')
        .next()
        .unwrap()
        .to_string()
}
