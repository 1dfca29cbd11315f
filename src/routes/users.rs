// ABOUTME: Admin-only user listing and per-user token listing
// ABOUTME: Implements the `/api/users*` surface
//
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::CookieJar;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::middleware::require_admin;
use crate::models::{Role, User};
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct UserView {
    id: Uuid,
    upstream_id: i64,
    username: String,
    email: Option<String>,
    role: Role,
    created_at: DateTime<Utc>,
}

impl From<User> for UserView {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            upstream_id: u.upstream_id,
            username: u.username,
            email: u.email,
            role: u.role,
            created_at: u.created_at,
        }
    }
}

/// `GET /api/users` — admin only.
pub async fn list_users(State(state): State<Arc<AppState>>, jar: CookieJar, headers: HeaderMap) -> Response {
    let user = match super::current_user(&state, &jar, &headers).await {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };
    if let Err(err) = require_admin(user) {
        return err.into_response();
    }
    match state.persistence.list_users().await {
        Ok(users) => Json(users.into_iter().map(UserView::from).collect::<Vec<_>>()).into_response(),
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, Serialize)]
struct ProxyTokenSummary {
    id: Uuid,
    token_prefix: String,
    repository: String,
    expires_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
}

/// `GET /api/users/{id}/tokens` — admin only.
pub async fn user_tokens(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Response {
    let caller = match super::current_user(&state, &jar, &headers).await {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };
    if let Err(err) = require_admin(caller) {
        return err.into_response();
    }
    match state.persistence.list_proxy_tokens(id).await {
        Ok(tokens) => Json(
            tokens
                .into_iter()
                .map(|t| ProxyTokenSummary {
                    id: t.id,
                    token_prefix: t.token_prefix,
                    repository: t.repository,
                    expires_at: t.expires_at,
                    revoked_at: t.revoked_at,
                })
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(err) => err.into_response(),
    }
}
