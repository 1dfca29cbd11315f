// ABOUTME: Proxy token CRUD routes — create, list, fetch, revoke
// ABOUTME: Implements the `/api/tokens*` surface, owner-or-admin throughout
//
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::CookieJar;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::{AuditAction, AuditEntry, ProxyToken, ScopeMap};
use crate::state::AppState;
use crate::token_service::{self, CreateTokenRequest};

/// Parses a duration string of the form `"<n><s|m|h|d>"` (e.g. `"1h"`,
/// `"30m"`); a bare integer is treated as seconds.
fn parse_duration(raw: &str) -> AppResult<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::invalid_input("duration must not be empty"));
    }
    let (digits, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => (&raw[..idx], &raw[idx..]),
        None => (raw, "s"),
    };
    let value: i64 = digits
        .parse()
        .map_err(|_| AppError::invalid_input(format!("invalid duration: {raw}")))?;
    let seconds = match unit {
        "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        "d" => value * 86400,
        other => return Err(AppError::invalid_input(format!("unknown duration unit: {other}"))),
    };
    Ok(Duration::seconds(seconds))
}

#[derive(Debug, Deserialize)]
pub struct CreateTokenBody {
    repository: String,
    scopes: String,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateTokenResponse {
    token: String,
    id: Uuid,
    repository: String,
    scopes: ScopeMap,
    expires_at: DateTime<Utc>,
    session_id: String,
}

/// `POST /api/tokens` — mint a new scoped proxy token for the caller.
pub async fn create_token(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: axum::http::HeaderMap,
    Json(body): Json<CreateTokenBody>,
) -> Response {
    let user = match super::current_user(&state, &jar, &headers).await {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };

    let credential = match state.persistence.get_upstream_credential(user.id).await {
        Ok(Some(credential)) => credential,
        Ok(None) => {
            return AppError::invalid_input("no upstream credential on file; log in again").into_response()
        }
        Err(err) => return err.into_response(),
    };

    let scopes = match token_service::parse_scopes(&body.scopes) {
        Ok(scopes) => scopes,
        Err(err) => return err.into_response(),
    };
    let duration = match body.duration {
        Some(raw) => match parse_duration(&raw) {
            Ok(d) => d,
            Err(err) => return err.into_response(),
        },
        None => state.config.tokens_default_duration_chrono(),
    };
    let session_label = body.session_id.unwrap_or_default();

    let created = match state
        .token_service
        .create(CreateTokenRequest {
            user_id: user.id,
            upstream_credential_id: credential.id,
            repository: body.repository,
            scopes,
            duration,
            session_label: session_label.clone(),
        })
        .await
    {
        Ok(created) => created,
        Err(err) => return err.into_response(),
    };

    write_token_audit(&state, AuditAction::TOKEN_CREATED, &created.row).await;

    (
        StatusCode::CREATED,
        Json(CreateTokenResponse {
            token: created.plaintext,
            id: created.row.id,
            repository: created.row.repository,
            scopes: created.row.scopes,
            expires_at: created.row.expires_at,
            session_id: session_label,
        }),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
struct ProxyTokenView {
    id: Uuid,
    token_prefix: String,
    user_id: Uuid,
    repository: String,
    scopes: ScopeMap,
    session_label: String,
    expires_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
    last_used_at: Option<DateTime<Utc>>,
    request_count: i64,
    created_at: DateTime<Utc>,
}

impl From<ProxyToken> for ProxyTokenView {
    fn from(t: ProxyToken) -> Self {
        Self {
            id: t.id,
            token_prefix: t.token_prefix,
            user_id: t.user_id,
            repository: t.repository,
            scopes: t.scopes,
            session_label: t.session_label,
            expires_at: t.expires_at,
            revoked_at: t.revoked_at,
            last_used_at: t.last_used_at,
            request_count: t.request_count,
            created_at: t.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListTokensParams {
    #[serde(default)]
    all: Option<bool>,
}

/// `GET /api/tokens` — the caller's own tokens, or (admin + `?all=true`)
/// every user's tokens.
pub async fn list_tokens(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: axum::http::HeaderMap,
    Query(params): Query<ListTokensParams>,
) -> Response {
    let user = match super::current_user(&state, &jar, &headers).await {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };

    let tokens = if params.all.unwrap_or(false) && user.role.is_admin() {
        state.persistence.list_all_proxy_tokens().await
    } else {
        state.persistence.list_proxy_tokens(user.id).await
    };

    match tokens {
        Ok(tokens) => Json(tokens.into_iter().map(ProxyTokenView::from).collect::<Vec<_>>()).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn load_owned_token(state: &AppState, user: &crate::models::User, id: Uuid) -> AppResult<ProxyToken> {
    let token = state
        .persistence
        .get_proxy_token_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found("token not found"))?;
    if token.user_id != user.id && !user.role.is_admin() {
        return Err(AppError::forbidden("not your token"));
    }
    Ok(token)
}

/// `GET /api/tokens/{id}` — owner or admin.
pub async fn get_token(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: axum::http::HeaderMap,
    Path(id): Path<Uuid>,
) -> Response {
    let user = match super::current_user(&state, &jar, &headers).await {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };
    match load_owned_token(&state, &user, id).await {
        Ok(token) => Json(ProxyTokenView::from(token)).into_response(),
        Err(err) => err.into_response(),
    }
}

/// `DELETE /api/tokens/{id}` — owner or admin; revoke is a one-way,
/// idempotent-checked transition.
pub async fn revoke_token(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: axum::http::HeaderMap,
    Path(id): Path<Uuid>,
) -> Response {
    let user = match super::current_user(&state, &jar, &headers).await {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };
    let token = match load_owned_token(&state, &user, id).await {
        Ok(token) => token,
        Err(err) => return err.into_response(),
    };
    if let Err(err) = state.token_service.revoke(id).await {
        return err.into_response();
    }
    write_token_audit(&state, AuditAction::TOKEN_REVOKED, &token).await;
    Json(json!({ "message": "Token revoked" })).into_response()
}

async fn write_token_audit(state: &AppState, action: &str, token: &ProxyToken) {
    let started = Instant::now();
    let entry = AuditEntry {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        user_id: token.user_id,
        proxy_token_id: Some(token.id),
        action: AuditAction::new(action),
        method: String::new(),
        path: String::new(),
        repository: token.repository.clone(),
        status_code: StatusCode::OK.as_u16(),
        duration_ms: i64::try_from(started.elapsed().as_millis()).unwrap_or(0),
        session_label: token.session_label.clone(),
        metadata: json!({}),
    };
    if let Err(err) = state.persistence.create_audit_entry(&entry).await {
        tracing::warn!(error = %err, "failed to write token audit entry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_supports_unit_suffixes() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::seconds(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::minutes(5));
        assert_eq!(parse_duration("1h").unwrap(), Duration::hours(1));
        assert_eq!(parse_duration("2d").unwrap(), Duration::days(2));
        assert_eq!(parse_duration("3600").unwrap(), Duration::hours(1));
    }

    #[test]
    fn parse_duration_rejects_unknown_unit() {
        assert!(parse_duration("5x").is_err());
    }

    #[test]
    fn parse_duration_rejects_empty() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("   ").is_err());
    }
}
