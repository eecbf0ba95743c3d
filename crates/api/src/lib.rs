pub mod models;
pub mod routes;
pub mod session;

use crate::routes::{
    auth::{endpoint_get, endpoint_post, login, logout, status},
    health::health_check,
};
use axum::{routing::get, Router};
use config::{ApiConfig, AuthConfig, LoggingConfig};
use database::{Database, PgClientSessionStore};
use services::auth::{
    EventNotifier, InMemoryCredentialStore, LoginStateRepository, ProfileRepository,
    ProviderRegistry, RandomTokenGenerator, SessionEngine, SessionRepository,
    TracingAuditListener,
};
use std::{sync::Arc, time::Duration};
use tower_http::trace::TraceLayer;
use tower_sessions::{
    cookie::SameSite,
    session::{Id, Record},
    session_store, Expiry, MemoryStore, SessionManagerLayer, SessionStore,
};
use tracing::{debug, info, warn};

/// State shared by the login routes
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SessionEngine>,
    pub config: Arc<AuthConfig>,
    pub client_sessions: ClientSessionStore,
}

impl AppState {
    pub fn new(
        engine: Arc<SessionEngine>,
        config: AuthConfig,
        client_sessions: ClientSessionStore,
    ) -> Self {
        Self {
            engine,
            config: Arc::new(config),
            client_sessions,
        }
    }
}

/// Backing store of the cookie sessions. PostgreSQL whenever a database is
/// configured; the process-local store only serves local development.
#[derive(Debug, Clone)]
pub enum ClientSessionStore {
    Memory(MemoryStore),
    Postgres(PgClientSessionStore),
}

impl ClientSessionStore {
    /// Delete expired cookie sessions. The memory store only drops them on load.
    pub async fn delete_expired(&self) -> anyhow::Result<usize> {
        match self {
            ClientSessionStore::Memory(_) => Ok(0),
            ClientSessionStore::Postgres(store) => store.delete_expired().await,
        }
    }
}

#[async_trait::async_trait]
impl SessionStore for ClientSessionStore {
    async fn create(&self, record: &mut Record) -> session_store::Result<()> {
        match self {
            ClientSessionStore::Memory(store) => store.create(record).await,
            ClientSessionStore::Postgres(store) => store.create(record).await,
        }
    }

    async fn save(&self, record: &Record) -> session_store::Result<()> {
        match self {
            ClientSessionStore::Memory(store) => store.save(record).await,
            ClientSessionStore::Postgres(store) => store.save(record).await,
        }
    }

    async fn load(&self, session_id: &Id) -> session_store::Result<Option<Record>> {
        match self {
            ClientSessionStore::Memory(store) => store.load(session_id).await,
            ClientSessionStore::Postgres(store) => store.load(session_id).await,
        }
    }

    async fn delete(&self, session_id: &Id) -> session_store::Result<()> {
        match self {
            ClientSessionStore::Memory(store) => store.delete(session_id).await,
            ClientSessionStore::Postgres(store) => store.delete(session_id).await,
        }
    }
}

/// The Credential Store ports plus the cookie session store that goes with it
pub struct CredentialStore {
    pub profiles: Arc<dyn ProfileRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub login_states: Arc<dyn LoginStateRepository>,
    pub client_sessions: ClientSessionStore,
}

impl CredentialStore {
    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryCredentialStore::new());
        Self {
            profiles: store.clone(),
            sessions: store.clone(),
            login_states: store,
            client_sessions: ClientSessionStore::Memory(MemoryStore::default()),
        }
    }
}

/// Initialize tracing from the logging configuration
pub fn init_tracing(logging_config: &LoggingConfig) {
    // Build the filter string from the logging configuration
    let mut filter = logging_config.level.clone();

    for (module, level) in &logging_config.modules {
        filter.push_str(&format!(",{}={}", module, level));
    }

    // Initialize tracing based on the format specified in config
    match logging_config.format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        "compact" => {
            tracing_subscriber::fmt()
                .compact()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .init();
        }
    }
}

/// Connect the configured Credential Store, running migrations for PostgreSQL
pub async fn init_credential_store(config: &ApiConfig) -> anyhow::Result<CredentialStore> {
    let Some(db_config) = &config.database else {
        warn!("No database configured, sessions will not survive a restart");
        return Ok(CredentialStore::in_memory());
    };

    let database = Database::from_config(db_config).await?;

    tracing::info!("Starting database migrations...");
    database.run_migrations().await?;
    tracing::info!("Database migrations completed.");

    Ok(CredentialStore {
        profiles: database.profiles.clone(),
        sessions: database.sessions.clone(),
        login_states: database.login_states.clone(),
        client_sessions: ClientSessionStore::Postgres(database.client_sessions.clone()),
    })
}

/// Build the provider registry and session engine from configuration
pub fn init_session_engine(
    config: &AuthConfig,
    store: &CredentialStore,
) -> anyhow::Result<Arc<SessionEngine>> {
    // Provider endpoints must not be followed into redirects
    let http_client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;

    let registry = ProviderRegistry::from_config(config, http_client)?;
    info!("Enabled providers: {:?}", registry.enabled_providers());

    let notifier =
        EventNotifier::new(config.debug_mode).with_listener(Arc::new(TracingAuditListener));

    Ok(Arc::new(
        SessionEngine::new(
            store.profiles.clone(),
            store.sessions.clone(),
            store.login_states.clone(),
            Arc::new(registry),
            Arc::new(RandomTokenGenerator),
            notifier,
        )
        .with_debug_mode(config.debug_mode),
    ))
}

/// Build authentication routes
pub fn build_auth_routes(state: AppState) -> Router {
    Router::new()
        .route("/login", get(login))
        .route("/endpoint", get(endpoint_get).post(endpoint_post))
        .route("/logout", get(logout))
        .route("/status", get(status))
        .with_state(state)
}

/// Build the complete application router
pub fn build_app(state: AppState) -> Router {
    let session_layer = SessionManagerLayer::new(state.client_sessions.clone())
        .with_secure(state.config.site_root.starts_with("https://"))
        .with_same_site(SameSite::Lax)
        .with_expiry(session_expiry(state.config.login_expiry));

    let mount_path = state.config.mount_path();

    Router::new()
        .route("/health", get(health_check))
        .nest(&mount_path, build_auth_routes(state))
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
}

/// Cookie lifetime follows the session retention window.
fn session_expiry(login_expiry_days: u32) -> Expiry {
    Duration::from_secs(u64::from(login_expiry_days) * 24 * 60 * 60)
        .try_into()
        .map(Expiry::OnInactivity)
        .unwrap_or(Expiry::OnSessionEnd)
}

/// Periodically remove expired cookie sessions from the backing store
pub fn spawn_client_session_cleanup(
    store: ClientSessionStore,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        loop {
            interval.tick().await;
            match store.delete_expired().await {
                Ok(removed) => debug!("Removed {} expired client sessions", removed),
                Err(e) => warn!("Failed to remove expired client sessions: {}", e),
            }
        }
    })
}
