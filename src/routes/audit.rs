// ABOUTME: Audit log listing — self-scoped for ordinary users, filterable for admins
// ABOUTME: Implements `GET /api/audit`, narrowing non-admin callers to their own user_id
//
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::AuditFilter;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListAuditParams {
    #[serde(default)]
    user_id: Option<Uuid>,
    #[serde(default)]
    limit: Option<u32>,
    #[serde(default)]
    offset: Option<u32>,
}

/// `GET /api/audit` — admins may filter by `user_id`; everyone else is
/// unconditionally narrowed to their own entries.
pub async fn list_audit(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
    Query(params): Query<ListAuditParams>,
) -> Response {
    let user = match super::current_user(&state, &jar, &headers).await {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };

    let user_id = if user.role.is_admin() {
        params.user_id
    } else {
        Some(user.id)
    };

    let filter = AuditFilter {
        user_id,
        limit: params.limit.unwrap_or(100),
        offset: params.offset.unwrap_or(0),
    };

    match state.persistence.list_audit_entries(&filter).await {
        Ok(entries) => Json(entries).into_response(),
        Err(err) => err.into_response(),
    }
}
