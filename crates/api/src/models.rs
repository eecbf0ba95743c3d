use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use services::auth::{AuthError, UserProfile};
use tracing::error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>, r#type: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                message: message.into(),
                r#type: r#type.into(),
            },
        }
    }
}

/// Errors returned by the login routes.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Provider not given")]
    MissingProvider,

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, kind) = match &self {
            ApiError::MissingProvider => (
                StatusCode::BAD_REQUEST,
                "Provider not given".to_string(),
                "invalid_request",
            ),
            ApiError::Auth(AuthError::InvalidProvider(name)) => (
                StatusCode::FORBIDDEN,
                format!("Invalid or disabled provider: {name}"),
                "invalid_provider",
            ),
            ApiError::Auth(AuthError::CsrfMismatch) => (
                StatusCode::FORBIDDEN,
                "Invalid state parameter".to_string(),
                "csrf_mismatch",
            ),
            ApiError::Auth(AuthError::InvalidCredentials) => (
                StatusCode::UNAUTHORIZED,
                "Invalid username or password".to_string(),
                "invalid_credentials",
            ),
            ApiError::Auth(AuthError::ProviderExchange(detail)) => {
                error!("Provider exchange failed: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Login with the provider failed".to_string(),
                    "provider_error",
                )
            }
            ApiError::Auth(AuthError::Store(detail)) | ApiError::Auth(AuthError::Config(detail)) => {
                error!("Login failed: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    "server_error",
                )
            }
        };

        (status, Json(ErrorResponse::new(message, kind))).into_response()
    }
}

/// Shown when the password provider needs a username and password.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsRequiredResponse {
    pub status: String,
    pub provider: String,
    /// Where to POST `username` and `password`.
    pub action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub provider: String,
    pub external_uid: String,
    pub name: Option<String>,
    pub nickname: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

impl From<&UserProfile> for ProfileSummary {
    fn from(profile: &UserProfile) -> Self {
        let attribute = |key: &str| {
            profile
                .provider_data
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        Self {
            provider: profile.provider.clone(),
            external_uid: profile.external_uid.clone(),
            name: attribute("name"),
            nickname: attribute("nickname"),
            email: attribute("email"),
            avatar_url: attribute("avatar_url"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub logged_in: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileSummary>,
}
