use serde::Deserialize;
use std::{
    collections::{BTreeMap, HashMap},
    env,
};

/// Name of the local username/password provider.
pub const PASSWORD_PROVIDER: &str = "Password";

/// Providers known out of the box, in their canonical spelling.
pub const KNOWN_PROVIDERS: [&str; 5] = [PASSWORD_PROVIDER, "Google", "Facebook", "Twitter", "GitHub"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    /// Durable credential store. Without it the service keeps profiles and
    /// sessions in memory, which only suits local development.
    pub database: Option<DatabaseConfig>,
    pub auth: AuthConfig,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_max_connections() -> usize {
    5
}

impl DatabaseConfig {
    /// Create a connection URL for this database configuration
    pub fn connection_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            host: env::var("DATABASE_HOST").map_err(|_| "DATABASE_HOST not set")?,
            port: env::var("DATABASE_PORT")
                .map_err(|_| "DATABASE_PORT not set")?
                .parse()
                .map_err(|_| "DATABASE_PORT must be a valid port number")?,
            database: env::var("DATABASE_NAME").map_err(|_| "DATABASE_NAME not set")?,
            username: env::var("DATABASE_USERNAME").map_err(|_| "DATABASE_USERNAME not set")?,
            password: env::var("DATABASE_PASSWORD").map_err(|_| "DATABASE_PASSWORD not set")?,
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| "DATABASE_MAX_CONNECTIONS must be a valid number")?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// Logging Configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub modules: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let mut modules = HashMap::new();
        modules.insert("api".to_string(), "debug".to_string());
        modules.insert("services".to_string(), "debug".to_string());

        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            modules,
        }
    }
}

/// Authentication configuration: providers, mount point and session retention.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Provider settings keyed by provider name, in any letter case.
    pub providers: BTreeMap<String, ProviderSettings>,
    /// Path segment the authentication routes are mounted under.
    pub basepath: String,
    /// Externally visible root URL of the site, used to build redirect URIs.
    pub site_root: String,
    /// Session retention window in days.
    pub login_expiry: u32,
    pub debug_mode: bool,
    /// Legacy query key that may carry the provider name on inbound requests.
    pub response_noun: String,
    pub sweeper_interval_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            providers: BTreeMap::new(),
            basepath: "authenticate".to_string(),
            site_root: "http://localhost:3000".to_string(),
            login_expiry: 14,
            debug_mode: false,
            response_noun: "hauth.done".to_string(),
            sweeper_interval_secs: 24 * 60 * 60,
        }
    }
}

/// Provider settings as written in the configuration file.
///
/// Both the current keys (`clientId`, `clientSecret`, `scopes`) and the
/// older layout (`keys: {id, secret}`, space separated `scope`) are accepted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub enabled: bool,
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
    #[serde(rename = "clientSecret")]
    pub client_secret: Option<String>,
    pub scopes: Option<Vec<String>>,
    pub scope: Option<String>,
    pub keys: Option<ProviderKeys>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderKeys {
    pub id: Option<String>,
    pub secret: Option<String>,
}

/// Normalized provider configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub name: String,
    pub enabled: bool,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
}

impl ProviderSettings {
    fn normalize(&self, name: String) -> ProviderConfig {
        let keys = self.keys.clone().unwrap_or_default();
        let client_id = non_empty(self.client_id.clone())
            .or(keys.id)
            .unwrap_or_default();
        let client_secret = non_empty(self.client_secret.clone())
            .or(keys.secret)
            .unwrap_or_default();
        let scopes = match (&self.scopes, &self.scope) {
            (Some(scopes), _) => scopes.clone(),
            (None, Some(scope)) => scope.split_whitespace().map(str::to_string).collect(),
            (None, None) => Vec::new(),
        };

        ProviderConfig {
            name,
            enabled: self.enabled,
            client_id,
            client_secret,
            scopes,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl AuthConfig {
    /// Normalized provider configurations.
    ///
    /// When no providers are configured at all, every known provider is
    /// listed as disabled.
    pub fn provider_configs(&self) -> Vec<ProviderConfig> {
        if self.providers.is_empty() {
            return KNOWN_PROVIDERS
                .iter()
                .map(|name| ProviderSettings::default().normalize(name.to_string()))
                .collect();
        }

        self.providers
            .iter()
            .map(|(name, settings)| settings.normalize(normalize_provider_name(name)))
            .collect()
    }

    /// Callback URI registered with the provider.
    ///
    /// Every provider returns to the same inbound path, distinguished only by
    /// the `provider` query parameter.
    pub fn redirect_uri(&self, provider: &str) -> String {
        format!(
            "{}/{}/endpoint?provider={}",
            self.site_root.trim_end_matches('/'),
            self.basepath.trim_matches('/'),
            provider
        )
    }

    /// Mount path of the authentication routes, with a leading slash.
    pub fn mount_path(&self) -> String {
        format!("/{}", self.basepath.trim_matches('/'))
    }
}

/// Case-normalize a provider name.
///
/// Known providers map to their canonical spelling ("github" -> "GitHub");
/// anything else gets its first letter of every word upper-cased and the rest
/// lower-cased ("facebook" -> "Facebook").
pub fn normalize_provider_name(raw: &str) -> String {
    let raw = raw.trim();
    if let Some(known) = KNOWN_PROVIDERS
        .iter()
        .find(|known| known.eq_ignore_ascii_case(raw))
    {
        return known.to_string();
    }

    raw.split(' ')
        .map(|word| {
            let lower = word.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
