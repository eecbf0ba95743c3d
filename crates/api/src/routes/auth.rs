use crate::{
    models::{ApiError, CredentialsRequiredResponse, StatusResponse},
    session::TowerClientSession,
    AppState,
};
use axum::{
    extract::{Query, State},
    http::{header::REFERER, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Form, Json,
};
use config::{normalize_provider_name, AuthConfig, PASSWORD_PROVIDER};
use serde::Deserialize;
use services::auth::{AuthError, CallbackGrant, LoginStep};
use std::collections::HashMap;
use tower_sessions::Session;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct LoginParams {
    provider: Option<String>,
    return_to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogoutParams {
    return_to: Option<String>,
}

/// Start a login: `GET /{basepath}/login?provider=<name>`
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    headers: HeaderMap,
    Query(params): Query<LoginParams>,
) -> Result<Response, ApiError> {
    let provider = params
        .provider
        .filter(|p| !p.trim().is_empty())
        .ok_or(ApiError::MissingProvider)?;
    let referer = headers.get(REFERER).and_then(|v| v.to_str().ok());
    let return_url = return_url(&state.config, params.return_to.as_deref(), referer);

    let client = TowerClientSession::new(session);
    let step = state
        .engine
        .start_login(&client, &provider, &return_url)
        .await?;

    Ok(step_response(&state.config, step))
}

/// Provider callback or password form: `GET /{basepath}/endpoint?provider=<name>`
pub async fn endpoint_get(
    State(state): State<AppState>,
    session: Session,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let provider = callback_provider(&state.config, &params)?;

    if normalize_provider_name(&provider) == PASSWORD_PROVIDER {
        state.engine.registry().resolve(&provider)?;
        return Ok(credentials_required(&state.config));
    }

    complete_callback(&state, TowerClientSession::new(session), &provider, &params).await
}

/// Password form submission, or a provider that calls back with a POST.
pub async fn endpoint_post(
    State(state): State<AppState>,
    session: Session,
    Query(mut params): Query<HashMap<String, String>>,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    params.extend(form);
    let provider = callback_provider(&state.config, &params)?;
    let client = TowerClientSession::new(session);

    if normalize_provider_name(&provider) != PASSWORD_PROVIDER {
        return complete_callback(&state, client, &provider, &params).await;
    }

    state.engine.registry().resolve(&provider)?;
    let field = |name: &str| params.get(name).map(String::as_str).filter(|v| !v.is_empty());
    let (Some(username), Some(password)) = (field("username"), field("password")) else {
        return Ok(credentials_required(&state.config));
    };

    let return_url = return_url(&state.config, field("return_to"), None);
    let step = state
        .engine
        .login_password(&client, username, password, &return_url)
        .await?;

    Ok(step_response(&state.config, step))
}

/// End the session: `GET /{basepath}/logout`
pub async fn logout(
    State(state): State<AppState>,
    session: Session,
    Query(params): Query<LogoutParams>,
) -> Result<Redirect, ApiError> {
    let client = TowerClientSession::new(session);
    state.engine.logout(&client).await?;

    Ok(Redirect::to(&return_url(
        &state.config,
        params.return_to.as_deref(),
        None,
    )))
}

/// Who is logged in: `GET /{basepath}/status`
pub async fn status(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<StatusResponse>, ApiError> {
    let client = TowerClientSession::new(session);
    let profile = state.engine.is_logged_in(&client).await?;

    Ok(Json(StatusResponse {
        logged_in: profile.is_some(),
        profile: profile.as_ref().map(Into::into),
    }))
}

async fn complete_callback(
    state: &AppState,
    client: TowerClientSession,
    provider: &str,
    params: &HashMap<String, String>,
) -> Result<Response, ApiError> {
    let returned_state = params.get("state").map(String::as_str);

    let grant = match (
        params.get("code"),
        params.get("oauth_token"),
        params.get("oauth_verifier"),
    ) {
        (Some(code), _, _) => CallbackGrant::AuthorizationCode(code.clone()),
        (None, Some(token), Some(verifier)) => CallbackGrant::Verifier {
            token: token.clone(),
            verifier: verifier.clone(),
        },
        _ => {
            // Denied at the provider: the pending state is spent all the same
            if let Err(e) = state
                .engine
                .check_state_token(&client, provider, returned_state)
                .await
            {
                debug!("Discarded state of an abandoned login: {}", e);
            }
            state.engine.registry().resolve(provider)?;
            let reason = params
                .get("error_description")
                .or_else(|| params.get("error"))
                .map(String::as_str)
                .unwrap_or(if params.contains_key("denied") {
                    "access denied"
                } else {
                    "no authorization grant"
                });
            return Err(AuthError::ProviderExchange(format!(
                "{provider} returned without a grant: {reason}"
            ))
            .into());
        }
    };

    let step = state
        .engine
        .complete_oauth_callback(&client, provider, grant, returned_state)
        .await?;

    Ok(step_response(&state.config, step))
}

fn callback_provider(
    config: &AuthConfig,
    params: &HashMap<String, String>,
) -> Result<String, ApiError> {
    params
        .get("provider")
        .or_else(|| params.get(&config.response_noun))
        .filter(|p| !p.trim().is_empty())
        .cloned()
        .ok_or(ApiError::MissingProvider)
}

fn step_response(config: &AuthConfig, step: LoginStep) -> Response {
    match step {
        LoginStep::Redirect(url) => Redirect::to(&url).into_response(),
        LoginStep::CredentialsRequired => credentials_required(config),
        LoginStep::Authenticated { return_url, .. } => Redirect::to(&return_url).into_response(),
    }
}

fn credentials_required(config: &AuthConfig) -> Response {
    (
        StatusCode::OK,
        Json(CredentialsRequiredResponse {
            status: "credentials_required".to_string(),
            provider: PASSWORD_PROVIDER.to_string(),
            action: format!(
                "{}/endpoint?provider={}",
                config.mount_path(),
                PASSWORD_PROVIDER
            ),
        }),
    )
        .into_response()
}

/// Where to send the client after the login. Only paths on this site are
/// honoured: an explicit `return_to`, then the referring page, then `/`.
fn return_url(config: &AuthConfig, return_to: Option<&str>, referer: Option<&str>) -> String {
    if let Some(path) = return_to.filter(|p| is_local_path(p)) {
        return path.to_string();
    }

    referer
        .and_then(|r| r.strip_prefix(config.site_root.trim_end_matches('/')))
        .filter(|p| is_local_path(p))
        .map(str::to_string)
        .unwrap_or_else(|| "/".to_string())
}

fn is_local_path(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//") && !path.contains('\\')
}
