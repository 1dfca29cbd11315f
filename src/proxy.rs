// ABOUTME: Single entry point for all agent-bound GitHub API traffic
// ABOUTME: Implements the REST request pipeline and the narrower GraphQL branch
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Proxy handler
//!
//! Resolves the bearer, checks repository and scope, refreshes the upstream
//! credential if it is close to expiry, dispatches to `api.github.com`, and
//! mirrors the response back verbatim. Every deny path still writes an audit
//! entry; audit and usage-recording failures are logged and swallowed, never
//! surfaced to the caller.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::errors::{AppError, AppResult};
use crate::models::{AuditAction, AuditEntry, ScopeLevel, UpstreamCredential};
use crate::scope_table;
use crate::state::AppState;

const REFRESH_SKEW: Duration = Duration::minutes(5);
const REFRESH_EXPIRY_ASSUMPTION_DAYS: i64 = 180;
const DEFAULT_EXPIRES_IN_SECS: i64 = 8 * 3600;

const MIRRORED_REQUEST_HEADERS: &[&str] = &["content-type", "accept", "user-agent"];

#[derive(Debug, Deserialize)]
struct TokenExchangeResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

struct ResolvedAuth {
    token: crate::models::ProxyToken,
}

fn extract_bearer(headers: &HeaderMap) -> AppResult<&str> {
    let raw = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::unauthorized("missing Authorization header"))?;

    let lower = raw.to_ascii_lowercase();
    let value = if let Some(rest) = lower.strip_prefix("token ") {
        &raw[raw.len() - rest.len()..]
    } else if let Some(rest) = lower.strip_prefix("bearer ") {
        &raw[raw.len() - rest.len()..]
    } else {
        return Err(AppError::unauthorized("unsupported Authorization scheme"));
    };

    if !value.starts_with(crate::token_service::TOKEN_PREFIX) {
        return Err(AppError::unauthorized("not a proxy token"));
    }
    Ok(value)
}

async fn resolve_bearer(state: &AppState, headers: &HeaderMap) -> AppResult<ResolvedAuth> {
    let plaintext = extract_bearer(headers)?;
    let token = state.token_service.resolve(plaintext).await?;
    Ok(ResolvedAuth { token })
}

async fn write_audit(
    state: &AppState,
    action: &str,
    method: &Method,
    path: &str,
    repository: &str,
    status: StatusCode,
    duration: std::time::Duration,
    session_label: &str,
    user_id: uuid::Uuid,
    proxy_token_id: Option<uuid::Uuid>,
) {
    let entry = AuditEntry {
        id: uuid::Uuid::new_v4(),
        timestamp: Utc::now(),
        user_id,
        proxy_token_id,
        action: AuditAction::new(action),
        method: method.to_string(),
        path: path.to_string(),
        repository: repository.to_string(),
        status_code: status.as_u16(),
        duration_ms: i64::try_from(duration.as_millis()).unwrap_or(i64::MAX),
        session_label: session_label.to_string(),
        metadata: json!({}),
    };
    if let Err(err) = state.persistence.create_audit_entry(&entry).await {
        tracing::warn!(error = %err, "failed to write audit entry");
    }
}

/// Refreshes the upstream credential if it is within 5 minutes of expiry.
/// On success, persists re-encrypted tokens and returns the new plaintext
/// access token. On failure, logs a warning and returns the existing
/// (possibly still valid) decrypted access token.
async fn refresh_if_stale(state: &AppState, credential: UpstreamCredential) -> AppResult<String> {
    let now = Utc::now();
    if credential.access_expires_at - now >= REFRESH_SKEW {
        return state.crypto.decrypt_str(&credential.access_ciphertext);
    }

    let refresh_token = state.crypto.decrypt_str(&credential.refresh_ciphertext)?;
    match exchange_refresh_token(state, &refresh_token).await {
        Ok(exchanged) => {
            let expires_in = exchanged.expires_in.filter(|v| *v > 0).unwrap_or(DEFAULT_EXPIRES_IN_SECS);
            let new_refresh = exchanged.refresh_token.as_deref().unwrap_or(&refresh_token);
            let access_ciphertext = state.crypto.encrypt_str(&exchanged.access_token)?;
            let refresh_ciphertext = state.crypto.encrypt_str(new_refresh)?;
            let updated = UpstreamCredential {
                access_ciphertext,
                refresh_ciphertext,
                access_expires_at: now + Duration::seconds(expires_in),
                refresh_expires_at: now + Duration::days(REFRESH_EXPIRY_ASSUMPTION_DAYS),
                updated_at: now,
                ..credential
            };
            if let Err(err) = state.persistence.upsert_upstream_credential(&updated).await {
                tracing::warn!(error = %err, "failed to persist refreshed upstream credential");
            }
            Ok(exchanged.access_token)
        }
        Err(err) => {
            tracing::warn!(error = %err, "upstream credential refresh failed, falling back to existing token");
            state.crypto.decrypt_str(&credential.access_ciphertext)
        }
    }
}

async fn exchange_refresh_token(state: &AppState, refresh_token: &str) -> AppResult<TokenExchangeResponse> {
    let response = state
        .http_client
        .post("https://github.com/login/oauth/access_token")
        .header(axum::http::header::ACCEPT, "application/json")
        .form(&[
            ("client_id", state.config.github_client_id.as_str()),
            ("client_secret", state.config.github_client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(AppError::upstream_unavailable(format!(
            "token refresh failed with status {}",
            response.status()
        )));
    }
    response.json::<TokenExchangeResponse>().await.map_err(Into::into)
}

fn mirror_request_headers(headers: &HeaderMap) -> Vec<(HeaderName, HeaderValue)> {
    MIRRORED_REQUEST_HEADERS
        .iter()
        .filter_map(|name| {
            let header_name = HeaderName::from_static(name);
            headers.get(&header_name).map(|v| (header_name, v.clone()))
        })
        .collect()
}

fn should_mirror_response_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("x-ratelimit-") || lower.starts_with("x-github-") || lower == "link" || lower == "content-type"
}

async fn dispatch_upstream(
    state: &AppState,
    method: Method,
    upstream_path: &str,
    query: Option<&str>,
    headers: &HeaderMap,
    body: Bytes,
    access_token: &str,
) -> AppResult<Response> {
    let mut url = format!("{}{upstream_path}", state.config.github_api_base);
    if let Some(query) = query {
        if !query.is_empty() {
            url.push('?');
            url.push_str(query);
        }
    }

    let mut request = state
        .http_client
        .request(method, &url)
        .bearer_auth(access_token)
        .body(body);
    for (name, value) in mirror_request_headers(headers) {
        request = request.header(name, value);
    }

    let upstream_response = request.send().await?;
    let status = StatusCode::from_u16(upstream_response.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);

    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream_response.headers() {
        if should_mirror_response_header(name.as_str()) {
            response_headers.insert(name.clone(), value.clone());
        }
    }
    let body = upstream_response.bytes().await?;

    let mut response = (status, body).into_response();
    response.headers_mut().extend(response_headers);
    Ok(response)
}

/// Handles `ANY /api/v3/*path`, the REST branch of the proxy pipeline.
pub async fn rest_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    path: axum::extract::Path<String>,
    axum::extract::RawQuery(query): axum::extract::RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let upstream_path = format!("/{}", path.0.trim_start_matches('/'));
    handle_rest(&state, method, upstream_path, query, &headers, body).await
}

/// Handles the REST branch for a request whose upstream path is already
/// known (no `/api/v3` prefix to strip). Shared by [`rest_handler`] and
/// [`handle_host_routed`]'s `Host: api.github.com` passthrough.
pub async fn handle_rest(
    state: &AppState,
    method: Method,
    upstream_path: String,
    query: Option<String>,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();

    let resolved = match resolve_bearer(state, headers).await {
        Ok(resolved) => resolved,
        Err(err) => return err.into_response(),
    };
    let token = resolved.token;

    let repository = scope_table::extract_repository(&upstream_path);
    if !repository.is_empty() && !repository.eq_ignore_ascii_case(&token.repository) {
        write_audit(
            state,
            AuditAction::PROXY_SCOPE_DENIED,
            &method,
            &upstream_path,
            &repository,
            StatusCode::FORBIDDEN,
            started.elapsed(),
            &token.session_label,
            token.user_id,
            Some(token.id),
        )
        .await;
        return AppError::forbidden(format!(
            "Token is scoped to {}, not {repository}",
            token.repository
        ))
        .into_response();
    }

    if let Some((permission, level)) = scope_table::lookup(&method, &upstream_path) {
        if permission != "metadata" && !token.has_permission(permission, level) {
            write_audit(
                state,
                AuditAction::PROXY_SCOPE_DENIED,
                &method,
                &upstream_path,
                &token.repository,
                StatusCode::FORBIDDEN,
                started.elapsed(),
                &token.session_label,
                token.user_id,
                Some(token.id),
            )
            .await;
            return AppError::forbidden(format!(
                "token lacks {permission}:{level} required for this endpoint"
            ))
            .into_response();
        }
    }

    let response = match serve_via_credential(state, token.upstream_credential_id, method.clone(), &upstream_path, query.as_deref(), headers, body).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    };

    let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    if let Err(err) = state.token_service.record_usage(token.id).await {
        tracing::warn!(error = %err, "failed to record token usage");
    }
    write_audit(
        state,
        AuditAction::PROXY_REQUEST,
        &method,
        &upstream_path,
        &token.repository,
        status,
        started.elapsed(),
        &token.session_label,
        token.user_id,
        Some(token.id),
    )
    .await;

    response
}

/// Handles `POST /api/graphql`, the narrower GraphQL branch of the proxy pipeline.
pub async fn graphql_handler(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    handle_graphql(&state, &headers, body).await
}

/// Handles the GraphQL branch for an already-resolved upstream target.
/// Shared by [`graphql_handler`] and the host-routed passthrough.
pub async fn handle_graphql(state: &AppState, headers: &HeaderMap, body: Bytes) -> Response {
    let started = Instant::now();
    let method = Method::POST;
    let upstream_path = "/graphql";

    let resolved = match resolve_bearer(state, headers).await {
        Ok(resolved) => resolved,
        Err(err) => return err.into_response(),
    };
    let token = resolved.token;

    let response = match serve_via_credential(state, token.upstream_credential_id, method.clone(), upstream_path, None, headers, body).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    };

    let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    if let Err(err) = state.token_service.record_usage(token.id).await {
        tracing::warn!(error = %err, "failed to record token usage");
    }
    write_audit(
        state,
        AuditAction::PROXY_REQUEST,
        &method,
        upstream_path,
        &token.repository,
        status,
        started.elapsed(),
        &token.session_label,
        token.user_id,
        Some(token.id),
    )
    .await;

    response
}

/// Handles a request whose `Host` header matches the upstream's own host:
/// every path routes to the proxy regardless of local prefix. The request
/// carries its real GitHub-shaped path directly, so no `/api/v3` stripping
/// is needed; `/graphql` still gets the GraphQL branch.
pub async fn handle_host_routed(state: &AppState, req: axum::extract::Request) -> Response {
    let method = req.method().clone();
    let headers = req.headers().clone();
    let uri = req.uri().clone();
    let path = uri.path().to_string();
    let query = uri.query().map(ToString::to_string);

    let body = match axum::body::to_bytes(req.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => return AppError::internal(format!("failed to read request body: {err}")).into_response(),
    };

    if path == "/graphql" {
        handle_graphql(state, &headers, body).await
    } else {
        handle_rest(state, method, path, query, &headers, body).await
    }
}

async fn serve_via_credential(
    state: &AppState,
    upstream_credential_id: uuid::Uuid,
    method: Method,
    upstream_path: &str,
    query: Option<&str>,
    headers: &HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let credential = state
        .persistence
        .get_upstream_credential_by_id(upstream_credential_id)
        .await?
        .ok_or_else(|| AppError::internal("upstream credential missing for token"))?;

    let access_token = refresh_if_stale(state, credential).await?;

    dispatch_upstream(state, method, upstream_path, query, headers, body, &access_token).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extract_bearer_accepts_token_scheme_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Token ghp_abc"),
        );
        assert_eq!(extract_bearer(&headers).expect("bearer"), "ghp_abc");
    }

    #[test]
    fn extract_bearer_accepts_bearer_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer ghp_xyz"),
        );
        assert_eq!(extract_bearer(&headers).expect("bearer"), "ghp_xyz");
    }

    #[test]
    fn extract_bearer_rejects_non_proxy_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer sk_something"),
        );
        assert!(extract_bearer(&headers).is_err());
    }

    #[test]
    fn extract_bearer_rejects_missing_header() {
        let headers = HeaderMap::new();
        assert!(extract_bearer(&headers).is_err());
    }

    #[test]
    fn mirrors_only_allowlisted_response_headers() {
        assert!(should_mirror_response_header("X-RateLimit-Remaining"));
        assert!(should_mirror_response_header("x-github-request-id"));
        assert!(should_mirror_response_header("Link"));
        assert!(should_mirror_response_header("Content-Type"));
        assert!(!should_mirror_response_header("Set-Cookie"));
    }
}
