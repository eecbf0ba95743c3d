use super::ports::{AuthError, CallbackGrant, NormalizedProfile, OAuthClient, ProviderIdentity};
use async_trait::async_trait;
use config::ProviderConfig;
use oauth2::{
    basic::BasicClient, AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    RedirectUrl, Scope, TokenResponse, TokenUrl,
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

// Type alias for a fully configured OAuth client
type ConfiguredClient = oauth2::Client<
    oauth2::basic::BasicErrorResponse,
    oauth2::basic::BasicTokenResponse,
    oauth2::basic::BasicTokenIntrospectionResponse,
    oauth2::StandardRevocableToken,
    oauth2::basic::BasicRevocationErrorResponse,
    oauth2::EndpointSet,
    oauth2::EndpointNotSet,
    oauth2::EndpointNotSet,
    oauth2::EndpointNotSet,
    oauth2::EndpointSet,
>;

/// Where a provider's OAuth2 endpoints live and how to read its profile.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    /// Fallback for providers that may hide the primary email (GitHub).
    pub emails_url: Option<String>,
    pub default_scopes: Vec<String>,
    /// Send client credentials in the request body instead of basic auth.
    pub credentials_in_body: bool,
    pub mapping: ProfileMapping,
}

/// JSON pointers into the provider's profile document, tried in order.
#[derive(Debug, Clone)]
pub struct ProfileMapping {
    pub uid: &'static [&'static str],
    pub name: &'static [&'static str],
    pub nickname: &'static [&'static str],
    pub email: &'static [&'static str],
    pub avatar: &'static [&'static str],
}

fn scopes(scopes: &[&str]) -> Vec<String> {
    scopes.iter().map(|s| s.to_string()).collect()
}

impl ProviderEndpoints {
    pub fn github() -> Self {
        Self {
            auth_url: "https://github.com/login/oauth/authorize".to_string(),
            token_url: "https://github.com/login/oauth/access_token".to_string(),
            userinfo_url: "https://api.github.com/user".to_string(),
            emails_url: Some("https://api.github.com/user/emails".to_string()),
            default_scopes: scopes(&["user:email"]),
            credentials_in_body: false,
            mapping: ProfileMapping {
                uid: &["/id"],
                name: &["/name"],
                nickname: &["/login"],
                email: &["/email"],
                avatar: &["/avatar_url"],
            },
        }
    }

    pub fn google() -> Self {
        Self {
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://www.googleapis.com/oauth2/v3/token".to_string(),
            userinfo_url: "https://www.googleapis.com/oauth2/v2/userinfo".to_string(),
            emails_url: None,
            default_scopes: scopes(&["openid", "email", "profile"]),
            credentials_in_body: false,
            mapping: ProfileMapping {
                uid: &["/sub", "/id"],
                name: &["/name"],
                nickname: &["/given_name"],
                email: &["/email"],
                avatar: &["/picture"],
            },
        }
    }

    pub fn facebook() -> Self {
        Self {
            auth_url: "https://www.facebook.com/v18.0/dialog/oauth".to_string(),
            token_url: "https://graph.facebook.com/v18.0/oauth/access_token".to_string(),
            userinfo_url: "https://graph.facebook.com/v18.0/me?fields=id,name,first_name,email,picture"
                .to_string(),
            emails_url: None,
            default_scopes: scopes(&["public_profile", "email"]),
            credentials_in_body: true,
            mapping: ProfileMapping {
                uid: &["/id"],
                name: &["/name"],
                nickname: &["/first_name"],
                email: &["/email"],
                avatar: &["/picture/data/url"],
            },
        }
    }

    /// Endpoints of a known OAuth2 provider.
    pub fn for_provider(name: &str) -> Option<Self> {
        match name {
            "GitHub" => Some(Self::github()),
            "Google" => Some(Self::google()),
            "Facebook" => Some(Self::facebook()),
            _ => None,
        }
    }
}

/// OAuth2 authorization-code client for one provider
pub struct OAuth2Client {
    provider: String,
    client: ConfiguredClient,
    scopes: Vec<String>,
    endpoints: ProviderEndpoints,
    http_client: Client,
}

impl OAuth2Client {
    /// Client for a known provider, or `None` if the provider does not speak OAuth2.
    pub fn for_provider(
        config: &ProviderConfig,
        redirect_uri: String,
        http_client: Client,
    ) -> Result<Option<Self>, AuthError> {
        ProviderEndpoints::for_provider(&config.name)
            .map(|endpoints| Self::new(config, redirect_uri, endpoints, http_client))
            .transpose()
    }

    pub fn new(
        config: &ProviderConfig,
        redirect_uri: String,
        endpoints: ProviderEndpoints,
        http_client: Client,
    ) -> Result<Self, AuthError> {
        let auth_url = AuthUrl::new(endpoints.auth_url.clone()).map_err(|e| {
            AuthError::Config(format!("Invalid {} auth URL: {}", config.name, e))
        })?;

        let token_url = TokenUrl::new(endpoints.token_url.clone()).map_err(|e| {
            AuthError::Config(format!("Invalid {} token URL: {}", config.name, e))
        })?;

        let redirect_url = RedirectUrl::new(redirect_uri)
            .map_err(|e| AuthError::Config(format!("Invalid redirect URL: {}", e)))?;

        let mut client = BasicClient::new(ClientId::new(config.client_id.clone()))
            .set_client_secret(ClientSecret::new(config.client_secret.clone()))
            .set_auth_uri(auth_url)
            .set_token_uri(token_url)
            .set_redirect_uri(redirect_url);

        if endpoints.credentials_in_body {
            client = client.set_auth_type(AuthType::RequestBody);
        }

        let scopes = if config.scopes.is_empty() {
            endpoints.default_scopes.clone()
        } else {
            config.scopes.clone()
        };

        Ok(Self {
            provider: config.name.clone(),
            client,
            scopes,
            endpoints,
            http_client,
        })
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<Value, AuthError> {
        debug!("Fetching {} user info with access token", self.provider);

        let response = self
            .http_client
            .get(&self.endpoints.userinfo_url)
            .bearer_auth(access_token)
            .header("User-Agent", "clientlogin")
            .send()
            .await
            .map_err(|e| {
                AuthError::ProviderExchange(format!("Failed to fetch {} user: {}", self.provider, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response".to_string());
            return Err(AuthError::ProviderExchange(format!(
                "{} API returned status: {}, body: {}",
                self.provider, status, body
            )));
        }

        response.json().await.map_err(|e| {
            AuthError::ProviderExchange(format!("Failed to parse {} user: {}", self.provider, e))
        })
    }

    /// Primary (or first) address from the provider's email listing.
    async fn fetch_primary_email(&self, access_token: &str) -> Option<String> {
        let url = self.endpoints.emails_url.as_ref()?;
        let response = self
            .http_client
            .get(url)
            .bearer_auth(access_token)
            .header("User-Agent", "clientlogin")
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            return None;
        }

        let emails: Vec<ProviderEmail> = response.json().await.ok()?;
        emails
            .iter()
            .find(|e| e.primary)
            .or_else(|| emails.first())
            .map(|e| e.email.clone())
    }
}

#[async_trait]
impl OAuthClient for OAuth2Client {
    async fn authorization_url(&self, state: &str) -> Result<String, AuthError> {
        let state = state.to_string();
        let (auth_url, _) = self
            .client
            .authorize_url(move || CsrfToken::new(state))
            .add_scopes(self.scopes.iter().cloned().map(Scope::new))
            .url();

        Ok(auth_url.to_string())
    }

    async fn exchange(&self, grant: CallbackGrant) -> Result<ProviderIdentity, AuthError> {
        let CallbackGrant::AuthorizationCode(code) = grant else {
            return Err(AuthError::ProviderExchange(format!(
                "{} expects an authorization code",
                self.provider
            )));
        };

        debug!("Exchanging {} code for token", self.provider);

        let token = self
            .client
            .exchange_code(AuthorizationCode::new(code))
            .request_async(&self.http_client)
            .await
            .map_err(|e| AuthError::ProviderExchange(format!("Token exchange failed: {}", e)))?;

        let access_token = token.access_token().secret().clone();
        let raw = self.fetch_profile(&access_token).await?;
        let mut profile = normalize_profile(raw, &self.endpoints.mapping)?;

        if profile.email.is_none() {
            profile.email = self.fetch_primary_email(&access_token).await;
        }

        let token = serde_json::to_value(&token)
            .map_err(|e| AuthError::ProviderExchange(format!("Unreadable token: {}", e)))?;

        info!("{} user authenticated: {}", self.provider, profile.external_uid);
        Ok(ProviderIdentity { token, profile })
    }
}

#[derive(Deserialize)]
struct ProviderEmail {
    email: String,
    primary: bool,
}

fn lookup(raw: &Value, pointers: &[&str]) -> Option<String> {
    pointers.iter().find_map(|pointer| match raw.pointer(pointer)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Map a provider profile document onto the common profile shape.
pub fn normalize_profile(raw: Value, mapping: &ProfileMapping) -> Result<NormalizedProfile, AuthError> {
    let external_uid = lookup(&raw, mapping.uid).ok_or_else(|| {
        AuthError::ProviderExchange("Provider profile has no user identifier".to_string())
    })?;

    Ok(NormalizedProfile {
        external_uid,
        name: lookup(&raw, mapping.name),
        nickname: lookup(&raw, mapping.nickname),
        email: lookup(&raw, mapping.email),
        avatar_url: lookup(&raw, mapping.avatar),
        raw,
    })
}
