// ABOUTME: OAuth authorization-code flow, dev-mode test login, session status and logout
// ABOUTME: Implements the `/auth/*` surface
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session & OAuth handler
//!
//! Binds a human's upstream GitHub identity to a [`crate::session::Session`].
//! The authorization-code exchange and the upstream user-profile fetch are
//! the only outbound calls made from this module; everything else is
//! `Persistence` and the in-memory stores.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use axum_extra::extract::CookieJar;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::build_session_cookie;
use crate::errors::{AppError, AppResult};
use crate::models::{AuditAction, AuditEntry, Role, UpstreamCredential, User};
use crate::state::AppState;

const GITHUB_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_USER_URL: &str = "https://api.github.com/user";
const DEFAULT_ACCESS_EXPIRES_IN_SECS: i64 = 28_800;
const REFRESH_EXPIRY_ASSUMPTION_DAYS: i64 = 180;
const DEFAULT_OAUTH_SCOPES: &str = "repo read:user";

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"))
}

/// `GET /auth/{provider}` — allocate a state nonce and send the caller to
/// the provider's authorize URL (or return it as JSON for CLI callers).
pub async fn start(State(state): State<Arc<AppState>>, Path(provider): Path<String>, headers: HeaderMap) -> Response {
    if provider != "github" {
        return AppError::not_found(format!("unknown oauth provider: {provider}")).into_response();
    }

    let nonce = state.oauth_states.issue();
    let mut url = url::Url::parse(GITHUB_AUTHORIZE_URL).expect("static url is valid");
    url.query_pairs_mut()
        .append_pair("client_id", &state.config.github_client_id)
        .append_pair("scope", DEFAULT_OAUTH_SCOPES)
        .append_pair("state", &nonce);

    if wants_json(&headers) {
        Json(json!({ "url": url.as_str() })).into_response()
    } else {
        Redirect::to(url.as_str()).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    installation_id: Option<String>,
    format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubTokenExchangeResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubUserProfile {
    id: i64,
    login: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    authenticated: bool,
    user_id: Uuid,
    username: String,
    role: Role,
}

/// `GET /auth/{provider}/callback` — exchanges the authorization code,
/// fetches the upstream profile, and mints a session.
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Response {
    if provider != "github" {
        return AppError::not_found(format!("unknown oauth provider: {provider}")).into_response();
    }

    if let Some(installation_id) = params.installation_id {
        tracing::info!(installation_id, "github app installation callback, ignoring");
        return Redirect::to("/").into_response();
    }

    let (Some(code), Some(nonce)) = (params.code, params.state) else {
        return AppError::invalid_input("missing code or state").into_response();
    };
    if !state.oauth_states.consume(&nonce) {
        return AppError::invalid_input("invalid or expired oauth state").into_response();
    }

    match complete_login(&state, &code).await {
        Ok((user, session_token)) => {
            if params.format.as_deref() == Some("json") {
                Json(LoginResponse {
                    authenticated: true,
                    user_id: user.id,
                    username: user.username,
                    role: user.role,
                })
                .into_response()
            } else {
                let jar = CookieJar::new().add(build_session_cookie(session_token));
                (jar, Redirect::to("/")).into_response()
            }
        }
        Err(err) => err.into_response(),
    }
}

async fn complete_login(state: &AppState, code: &str) -> AppResult<(User, String)> {
    let started = Instant::now();
    let exchanged = exchange_code(state, code).await?;
    let profile = fetch_github_profile(state, &exchanged.access_token).await?;

    let role = if state.config.is_admin_username(&profile.login) {
        Role::Admin
    } else {
        Role::User
    };
    let now = Utc::now();
    let user = state
        .persistence
        .upsert_user(&User {
            id: Uuid::nil(),
            upstream_id: profile.id,
            username: profile.login,
            email: profile.email,
            role,
            created_at: now,
            updated_at: now,
        })
        .await?;

    let expires_in = exchanged.expires_in.filter(|v| *v > 0).unwrap_or(DEFAULT_ACCESS_EXPIRES_IN_SECS);
    let access_ciphertext = state.crypto.encrypt_str(&exchanged.access_token)?;
    let refresh_ciphertext = state
        .crypto
        .encrypt_str(exchanged.refresh_token.as_deref().unwrap_or(&exchanged.access_token))?;
    state
        .persistence
        .upsert_upstream_credential(&UpstreamCredential {
            id: Uuid::new_v4(),
            user_id: user.id,
            access_ciphertext,
            refresh_ciphertext,
            access_expires_at: now + Duration::seconds(expires_in),
            refresh_expires_at: now + Duration::days(REFRESH_EXPIRY_ASSUMPTION_DAYS),
            scopes: exchanged.scope.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        })
        .await?;

    let session_token = state.sessions.create(user.id, &user.username, user.role);

    write_login_audit(state, user.id, started).await;
    Ok((user, session_token))
}

async fn exchange_code(state: &AppState, code: &str) -> AppResult<GithubTokenExchangeResponse> {
    let response = state
        .http_client
        .post(GITHUB_TOKEN_URL)
        .header(header::ACCEPT, "application/json")
        .form(&[
            ("client_id", state.config.github_client_id.as_str()),
            ("client_secret", state.config.github_client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(AppError::upstream_unavailable(format!(
            "code exchange failed with status {}",
            response.status()
        )));
    }
    response.json::<GithubTokenExchangeResponse>().await.map_err(Into::into)
}

async fn fetch_github_profile(state: &AppState, access_token: &str) -> AppResult<GithubUserProfile> {
    let response = state
        .http_client
        .get(GITHUB_USER_URL)
        .bearer_auth(access_token)
        .header(header::USER_AGENT, "ghp-reverse-proxy")
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(AppError::upstream_unavailable(format!(
            "profile fetch failed with status {}",
            response.status()
        )));
    }
    response.json::<GithubUserProfile>().await.map_err(Into::into)
}

async fn write_login_audit(state: &AppState, user_id: Uuid, started: Instant) {
    let entry = AuditEntry {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        user_id,
        proxy_token_id: None,
        action: AuditAction::new(AuditAction::AUTH_LOGIN),
        method: "GET".into(),
        path: "/auth/github/callback".into(),
        repository: String::new(),
        status_code: StatusCode::OK.as_u16(),
        duration_ms: i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX),
        session_label: String::new(),
        metadata: json!({}),
    };
    if let Err(err) = state.persistence.create_audit_entry(&entry).await {
        tracing::warn!(error = %err, "failed to write login audit entry");
    }
}

#[derive(Debug, Deserialize)]
pub struct TestLoginBody {
    username: String,
    #[serde(default)]
    role: Option<String>,
}

/// `POST /auth/test-login` — dev mode only. Bootstraps a User and a dummy
/// upstream credential without talking to GitHub.
pub async fn test_login(State(state): State<Arc<AppState>>, Json(body): Json<TestLoginBody>) -> Response {
    if !state.config.dev_mode {
        return AppError::not_found("not found").into_response();
    }

    let role = match body.role.as_deref() {
        Some("admin") => Role::Admin,
        _ => Role::User,
    };
    let now = Utc::now();
    let upstream_id = synthetic_upstream_id(&body.username);

    let user = match state
        .persistence
        .upsert_user(&User {
            id: Uuid::nil(),
            upstream_id,
            username: body.username,
            email: None,
            role,
            created_at: now,
            updated_at: now,
        })
        .await
    {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };

    let dummy_access = match state.crypto.encrypt_str("dev-mode-access-token") {
        Ok(v) => v,
        Err(err) => return err.into_response(),
    };
    let dummy_refresh = match state.crypto.encrypt_str("dev-mode-refresh-token") {
        Ok(v) => v,
        Err(err) => return err.into_response(),
    };
    if let Err(err) = state
        .persistence
        .upsert_upstream_credential(&UpstreamCredential {
            id: Uuid::new_v4(),
            user_id: user.id,
            access_ciphertext: dummy_access,
            refresh_ciphertext: dummy_refresh,
            access_expires_at: now + Duration::days(REFRESH_EXPIRY_ASSUMPTION_DAYS),
            refresh_expires_at: now + Duration::days(REFRESH_EXPIRY_ASSUMPTION_DAYS),
            scopes: String::new(),
            created_at: now,
            updated_at: now,
        })
        .await
    {
        return err.into_response();
    }

    let session_token = state.sessions.create(user.id, &user.username, user.role);
    write_login_audit(&state, user.id, Instant::now()).await;

    Json(json!({
        "session_token": session_token,
        "user_id": user.id,
        "username": user.username,
        "role": user.role,
    }))
    .into_response()
}

/// Stable synthetic `upstream_id` derived from a dev-mode username, so the
/// same username always converges on the same User row.
fn synthetic_upstream_id(username: &str) -> i64 {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(username.as_bytes());
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[0..8]);
    i64::from_be_bytes(buf) & i64::MAX
}

/// `POST /auth/logout` — clears the session and the cookie.
pub async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar, headers: HeaderMap) -> Response {
    if let Some(token) = super::extract_session_token(&jar, &headers) {
        state.sessions.remove(&token);
    }
    let jar = jar.remove(super::SESSION_COOKIE_NAME);
    (jar, Json(json!({ "message": "Logged out" }))).into_response()
}

/// `GET /auth/status` — reports the caller's authentication state.
pub async fn status(State(state): State<Arc<AppState>>, jar: CookieJar, headers: HeaderMap) -> Response {
    match super::current_session(&state, &jar, &headers) {
        Ok(session) => Json(json!({
            "authenticated": true,
            "username": session.username,
            "role": session.role,
            "user_id": session.user_id,
        }))
        .into_response(),
        Err(_) => (StatusCode::UNAUTHORIZED, Json(json!({ "authenticated": false }))).into_response(),
    }
}
