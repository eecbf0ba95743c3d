//! OAuth 1.0a (three-legged) client, as used by Twitter.
//!
//! The flow differs from OAuth2 in two ways that matter here: a request token
//! has to be fetched before the user can be redirected, and the provider
//! calls back with `oauth_token`/`oauth_verifier` instead of a code. Our CSRF
//! state rides on the callback URL. Request-token secrets are held in a
//! short-lived cache until the callback arrives.

use super::oauth::{normalize_profile, ProfileMapping};
use super::ports::{AuthError, CallbackGrant, OAuthClient, ProviderIdentity, TokenGenerator};
use super::tokens::RandomTokenGenerator;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use config::ProviderConfig;
use hmac::{Hmac, Mac};
use moka::future::Cache;
use reqwest::{Client, Method};
use sha1::Sha1;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Request tokens the user has not come back with yet expire after this.
const REQUEST_TOKEN_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
pub struct OAuth1Endpoints {
    pub request_token_url: String,
    pub authorize_url: String,
    pub access_token_url: String,
    pub verify_credentials_url: String,
    pub mapping: ProfileMapping,
}

impl OAuth1Endpoints {
    pub fn twitter() -> Self {
        Self {
            request_token_url: "https://api.twitter.com/oauth/request_token".to_string(),
            authorize_url: "https://api.twitter.com/oauth/authenticate".to_string(),
            access_token_url: "https://api.twitter.com/oauth/access_token".to_string(),
            verify_credentials_url:
                "https://api.twitter.com/1.1/account/verify_credentials.json".to_string(),
            mapping: ProfileMapping {
                uid: &["/id_str", "/id"],
                name: &["/name"],
                nickname: &["/screen_name"],
                email: &["/email"],
                avatar: &["/profile_image_url_https"],
            },
        }
    }
}

pub struct OAuth1Client {
    provider: String,
    consumer_key: String,
    consumer_secret: String,
    redirect_uri: String,
    endpoints: OAuth1Endpoints,
    http_client: Client,
    request_secrets: Cache<String, String>,
}

impl OAuth1Client {
    pub fn twitter(config: &ProviderConfig, redirect_uri: String, http_client: Client) -> Self {
        Self::new(config, redirect_uri, OAuth1Endpoints::twitter(), http_client)
    }

    pub fn new(
        config: &ProviderConfig,
        redirect_uri: String,
        endpoints: OAuth1Endpoints,
        http_client: Client,
    ) -> Self {
        Self {
            provider: config.name.clone(),
            consumer_key: config.client_id.clone(),
            consumer_secret: config.client_secret.clone(),
            redirect_uri,
            endpoints,
            http_client,
            request_secrets: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(REQUEST_TOKEN_TTL)
                .build(),
        }
    }

    /// Callback URL with our state appended to the registered redirect URI.
    fn callback_url(&self, state: &str) -> String {
        let separator = if self.redirect_uri.contains('?') { '&' } else { '?' };
        format!("{}{}state={}", self.redirect_uri, separator, urlencoding::encode(state))
    }

    fn authorization_header(
        &self,
        method: &Method,
        url: &str,
        request_params: &[(&str, &str)],
        token: Option<(&str, &str)>,
    ) -> Result<String, AuthError> {
        let nonce = RandomTokenGenerator.generate();
        let timestamp = Utc::now().timestamp().to_string();

        let mut oauth_params: Vec<(String, String)> = vec![
            ("oauth_consumer_key".to_string(), self.consumer_key.clone()),
            ("oauth_nonce".to_string(), nonce),
            ("oauth_signature_method".to_string(), "HMAC-SHA1".to_string()),
            ("oauth_timestamp".to_string(), timestamp),
            ("oauth_version".to_string(), "1.0".to_string()),
        ];
        if let Some((token, _)) = token {
            oauth_params.push(("oauth_token".to_string(), token.to_string()));
        }

        let mut all_params = oauth_params.clone();
        all_params.extend(
            request_params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        );

        let signature = sign(
            method.as_str(),
            url,
            &all_params,
            &self.consumer_secret,
            token.map(|(_, secret)| secret).unwrap_or(""),
        )?;
        oauth_params.push(("oauth_signature".to_string(), signature));

        // Only oauth_* values belong in the header
        let fields = oauth_params
            .iter()
            .chain(
                all_params
                    .iter()
                    .filter(|(k, _)| k == "oauth_callback" || k == "oauth_verifier"),
            )
            .map(|(k, v)| format!("{}=\"{}\"", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("OAuth {fields}"))
    }

    async fn signed_form_post(
        &self,
        url: &str,
        params: &[(&str, &str)],
        token: Option<(&str, &str)>,
    ) -> Result<HashMap<String, String>, AuthError> {
        let header = self.authorization_header(&Method::POST, url, params, token)?;
        let response = self
            .http_client
            .post(url)
            .header("Authorization", header)
            .send()
            .await
            .map_err(|e| {
                AuthError::ProviderExchange(format!("{} request failed: {}", self.provider, e))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            AuthError::ProviderExchange(format!("{} response unreadable: {}", self.provider, e))
        })?;
        if !status.is_success() {
            return Err(AuthError::ProviderExchange(format!(
                "{} returned status: {}, body: {}",
                self.provider, status, body
            )));
        }

        Ok(url::form_urlencoded::parse(body.as_bytes())
            .into_owned()
            .collect())
    }
}

#[async_trait]
impl OAuthClient for OAuth1Client {
    async fn authorization_url(&self, state: &str) -> Result<String, AuthError> {
        let callback = self.callback_url(state);
        let response = self
            .signed_form_post(
                &self.endpoints.request_token_url,
                &[("oauth_callback", callback.as_str())],
                None,
            )
            .await?;

        let (Some(token), Some(secret)) = (response.get("oauth_token"), response.get("oauth_token_secret"))
        else {
            return Err(AuthError::ProviderExchange(format!(
                "{} did not issue a request token",
                self.provider
            )));
        };

        self.request_secrets
            .insert(token.clone(), secret.clone())
            .await;
        debug!("Obtained {} request token", self.provider);

        Ok(format!(
            "{}?oauth_token={}",
            self.endpoints.authorize_url,
            urlencoding::encode(token)
        ))
    }

    async fn exchange(&self, grant: CallbackGrant) -> Result<ProviderIdentity, AuthError> {
        let CallbackGrant::Verifier { token, verifier } = grant else {
            return Err(AuthError::ProviderExchange(format!(
                "{} expects an oauth_verifier",
                self.provider
            )));
        };

        let request_secret = self.request_secrets.remove(&token).await.ok_or_else(|| {
            AuthError::ProviderExchange(format!("Unknown or expired {} request token", self.provider))
        })?;

        let access = self
            .signed_form_post(
                &self.endpoints.access_token_url,
                &[("oauth_verifier", verifier.as_str())],
                Some((&token, &request_secret)),
            )
            .await?;

        let (Some(access_token), Some(access_secret)) =
            (access.get("oauth_token"), access.get("oauth_token_secret"))
        else {
            return Err(AuthError::ProviderExchange(format!(
                "{} did not issue an access token",
                self.provider
            )));
        };

        let query = [("include_email", "true")];
        let header = self.authorization_header(
            &Method::GET,
            &self.endpoints.verify_credentials_url,
            &query,
            Some((access_token, access_secret)),
        )?;
        let response = self
            .http_client
            .get(&self.endpoints.verify_credentials_url)
            .query(&query)
            .header("Authorization", header)
            .send()
            .await
            .map_err(|e| {
                AuthError::ProviderExchange(format!("Failed to fetch {} user: {}", self.provider, e))
            })?;

        if !response.status().is_success() {
            return Err(AuthError::ProviderExchange(format!(
                "{} API returned status: {}",
                self.provider,
                response.status()
            )));
        }

        let raw = response.json().await.map_err(|e| {
            AuthError::ProviderExchange(format!("Failed to parse {} user: {}", self.provider, e))
        })?;
        let profile = normalize_profile(raw, &self.endpoints.mapping)?;

        let token = serde_json::json!({
            "oauth_token": access_token,
            "oauth_token_secret": access_secret,
            "user_id": access.get("user_id"),
            "screen_name": access.get("screen_name"),
        });

        info!("{} user authenticated: {}", self.provider, profile.external_uid);
        Ok(ProviderIdentity { token, profile })
    }
}

/// RFC 3986 percent-encoding, as OAuth 1.0a requires.
fn encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Signature base string: method, base URL and the sorted, encoded parameters.
pub fn signature_base_string(method: &str, url: &str, params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (encode(k), encode(v)))
        .collect();
    encoded.sort();

    let normalized = encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let base_url = url.split(['?', '#']).next().unwrap_or(url);
    format!(
        "{}&{}&{}",
        method.to_uppercase(),
        encode(base_url),
        encode(&normalized)
    )
}

/// HMAC-SHA1 signature, base64 encoded.
pub fn sign(
    method: &str,
    url: &str,
    params: &[(String, String)],
    consumer_secret: &str,
    token_secret: &str,
) -> Result<String, AuthError> {
    let key = format!("{}&{}", encode(consumer_secret), encode(token_secret));
    let mut mac = Hmac::<Sha1>::new_from_slice(key.as_bytes())
        .map_err(|e| AuthError::Config(format!("Failed to create signer: {}", e)))?;
    mac.update(signature_base_string(method, url, params).as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn config() -> ProviderConfig {
        ProviderConfig {
            name: "Twitter".to_string(),
            enabled: true,
            client_id: "consumer-key".to_string(),
            client_secret: "consumer-secret".to_string(),
            scopes: vec![],
        }
    }

    fn mocked_endpoints(server: &MockServer) -> OAuth1Endpoints {
        OAuth1Endpoints {
            request_token_url: server.url("/oauth/request_token"),
            authorize_url: server.url("/oauth/authenticate"),
            access_token_url: server.url("/oauth/access_token"),
            verify_credentials_url: server.url("/verify_credentials.json"),
            ..OAuth1Endpoints::twitter()
        }
    }

    #[test]
    fn test_signature_base_string_sorts_and_encodes() {
        let base = signature_base_string(
            "post",
            "https://api.example.com/1/update.json?ignored=1",
            &params(&[("status", "Hello World!"), ("a", "b c"), ("oauth_nonce", "n")]),
        );
        assert_eq!(
            base,
            "POST&https%3A%2F%2Fapi.example.com%2F1%2Fupdate.json&a%3Db%2520c%26oauth_nonce%3Dn%26status%3DHello%2520World%2521"
        );
    }

    #[test]
    fn test_signature_depends_on_secrets() {
        let p = params(&[("oauth_nonce", "n")]);
        let a = sign("GET", "https://x/", &p, "cs", "").unwrap();
        let b = sign("GET", "https://x/", &p, "cs", "ts").unwrap();
        assert_ne!(a, b);
        assert_eq!(a, sign("GET", "https://x/", &p, "cs", "").unwrap());
        // base64 of a 20 byte SHA1 digest
        assert_eq!(a.len(), 28);
    }

    #[test]
    fn test_callback_url_carries_state() {
        let client = OAuth1Client::twitter(
            &config(),
            "https://site/authenticate/endpoint?provider=Twitter".to_string(),
            Client::new(),
        );
        assert_eq!(
            client.callback_url("abc123"),
            "https://site/authenticate/endpoint?provider=Twitter&state=abc123"
        );
    }

    #[tokio::test]
    async fn test_full_three_legged_flow() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth/request_token");
                then.status(200)
                    .body("oauth_token=req-token&oauth_token_secret=req-secret&oauth_callback_confirmed=true");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth/access_token");
                then.status(200).body(
                    "oauth_token=acc-token&oauth_token_secret=acc-secret&user_id=99&screen_name=alice",
                );
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/verify_credentials.json")
                    .query_param("include_email", "true");
                then.status(200).json_body(json!({
                    "id": 99, "id_str": "99", "name": "Alice", "screen_name": "alice"
                }));
            })
            .await;

        let client = OAuth1Client::new(
            &config(),
            "https://site/authenticate/endpoint?provider=Twitter".to_string(),
            mocked_endpoints(&server),
            Client::new(),
        );

        let url = client.authorization_url("state-1").await.unwrap();
        assert!(url.ends_with("/oauth/authenticate?oauth_token=req-token"));

        let identity = client
            .exchange(CallbackGrant::Verifier {
                token: "req-token".to_string(),
                verifier: "verifier-1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(identity.profile.external_uid, "99");
        assert_eq!(identity.profile.nickname.as_deref(), Some("alice"));
        assert_eq!(identity.token["oauth_token"], "acc-token");

        // The request token is single use
        let replay = client
            .exchange(CallbackGrant::Verifier {
                token: "req-token".to_string(),
                verifier: "verifier-1".to_string(),
            })
            .await;
        assert!(matches!(replay, Err(AuthError::ProviderExchange(_))));
    }

    #[tokio::test]
    async fn test_unknown_request_token() {
        let client = OAuth1Client::twitter(&config(), "https://site/cb".to_string(), Client::new());
        let result = client
            .exchange(CallbackGrant::Verifier {
                token: "never-issued".to_string(),
                verifier: "v".to_string(),
            })
            .await;
        assert!(matches!(result, Err(AuthError::ProviderExchange(_))));
    }
}
