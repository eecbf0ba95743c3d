use super::oauth::OAuth2Client;
use super::oauth1::OAuth1Client;
use super::ports::{AuthError, CallbackGrant, OAuthClient, ProviderIdentity};
use config::{normalize_provider_name, AuthConfig, ProviderConfig, PASSWORD_PROVIDER};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// How a provider authenticates.
#[derive(Clone)]
pub enum ProviderHandle {
    OAuth1(Arc<dyn OAuthClient>),
    OAuth2(Arc<dyn OAuthClient>),
    Password,
}

impl ProviderHandle {
    pub fn oauth_client(&self) -> Option<&Arc<dyn OAuthClient>> {
        match self {
            ProviderHandle::OAuth1(client) | ProviderHandle::OAuth2(client) => Some(client),
            ProviderHandle::Password => None,
        }
    }
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderHandle::OAuth1(_) => write!(f, "OAuth1"),
            ProviderHandle::OAuth2(_) => write!(f, "OAuth2"),
            ProviderHandle::Password => write!(f, "Password"),
        }
    }
}

/// An enabled provider: its settings plus the capability that serves it.
#[derive(Debug, Clone)]
pub struct ProviderEntry {
    pub config: ProviderConfig,
    pub redirect_uri: String,
    pub handle: ProviderHandle,
}

impl ProviderEntry {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_password(&self) -> bool {
        matches!(self.handle, ProviderHandle::Password)
    }
}

/// Closed mapping from provider name to capability, built once at startup.
///
/// Disabled providers are not registered, so they fail exactly like unknown
/// ones.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderEntry>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from configuration. Unknown provider names are a
    /// configuration error, reported here rather than at request time.
    pub fn from_config(config: &AuthConfig, http_client: reqwest::Client) -> Result<Self, AuthError> {
        let mut registry = Self::new();

        for provider in config.provider_configs() {
            if !provider.enabled {
                debug!("Provider {} is disabled", provider.name);
                continue;
            }

            let redirect_uri = config.redirect_uri(&provider.name);
            let handle = match provider.name.as_str() {
                PASSWORD_PROVIDER => ProviderHandle::Password,
                "Twitter" => ProviderHandle::OAuth1(Arc::new(OAuth1Client::twitter(
                    &provider,
                    redirect_uri.clone(),
                    http_client.clone(),
                ))),
                name => match OAuth2Client::for_provider(&provider, redirect_uri.clone(), http_client.clone())? {
                    Some(client) => ProviderHandle::OAuth2(Arc::new(client)),
                    None => {
                        return Err(AuthError::Config(format!("Unsupported provider: {name}")));
                    }
                },
            };

            info!("{} login configured ({:?})", provider.name, handle);
            registry.register(provider, redirect_uri, handle)?;
        }

        Ok(registry)
    }

    /// Add an enabled provider. Names collide case-insensitively.
    pub fn register(
        &mut self,
        config: ProviderConfig,
        redirect_uri: String,
        handle: ProviderHandle,
    ) -> Result<(), AuthError> {
        let key = config.name.to_lowercase();
        if self.providers.contains_key(&key) {
            return Err(AuthError::Config(format!(
                "Provider {} configured more than once",
                config.name
            )));
        }
        self.providers.insert(
            key,
            ProviderEntry {
                config,
                redirect_uri,
                handle,
            },
        );
        Ok(())
    }

    /// Look up an enabled provider by name, in any letter case.
    pub fn resolve(&self, name: &str) -> Result<&ProviderEntry, AuthError> {
        let name = normalize_provider_name(name);
        if name.is_empty() {
            return Err(AuthError::InvalidProvider("Provider not given".to_string()));
        }
        self.providers
            .get(&name.to_lowercase())
            .ok_or(AuthError::InvalidProvider(name))
    }

    /// Names of all enabled providers, sorted.
    pub fn enabled_providers(&self) -> Vec<String> {
        let mut names: Vec<_> = self.providers.values().map(|p| p.config.name.clone()).collect();
        names.sort();
        names
    }

    pub async fn build_authorization_url(&self, name: &str, state: &str) -> Result<String, AuthError> {
        let entry = self.resolve(name)?;
        let client = entry
            .handle
            .oauth_client()
            .ok_or_else(|| AuthError::InvalidProvider(entry.name().to_string()))?;
        client.authorization_url(state).await
    }

    pub async fn exchange_code(
        &self,
        name: &str,
        grant: CallbackGrant,
    ) -> Result<ProviderIdentity, AuthError> {
        let entry = self.resolve(name)?;
        let client = entry
            .handle
            .oauth_client()
            .ok_or_else(|| AuthError::InvalidProvider(entry.name().to_string()))?;
        client.exchange(grant).await
    }
}
