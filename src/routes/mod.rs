// ABOUTME: HTTP routes layered on top of the core plus session extraction helpers
// ABOUTME: The CLI, HTML templates, and static assets that normally sit beside these stay out of scope
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Routes
//!
//! Thin `axum` handlers over the core services in [`crate::session`],
//! [`crate::token_service`], and [`crate::persistence`]. Handlers resolve
//! the caller's session, apply the owner-or-admin rule each endpoint
//! calls for, and translate [`crate::errors::AppError`] into the response
//! shape the boundary promises.

pub mod audit;
pub mod auth;
pub mod health;
pub mod tokens;
pub mod users;

use axum::http::HeaderMap;
use axum_extra::extract::CookieJar;

use crate::errors::{AppError, AppResult};
use crate::models::User;
use crate::session::{Session, SESSION_TOKEN_PREFIX};
use crate::state::AppState;

pub const SESSION_COOKIE_NAME: &str = "ghp_session";

/// Pull the session token out of the request: prefer the cookie (browser
/// flow), fall back to `Authorization: Bearer <session-token>` (CLI flow).
/// A proxy token (`ghp_...`) in the header must never authenticate a
/// session.
#[must_use]
pub fn extract_session_token(jar: &CookieJar, headers: &HeaderMap) -> Option<String> {
    if let Some(cookie) = jar.get(SESSION_COOKIE_NAME) {
        return Some(cookie.value().to_string());
    }
    let raw = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())?;
    let token = raw
        .strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))?;
    if token.starts_with(SESSION_TOKEN_PREFIX) {
        Some(token.to_string())
    } else {
        None
    }
}

/// Resolve the caller's [`Session`], failing with `Unauthorized` if absent
/// or expired.
///
/// # Errors
/// Returns `AppError::Unauthorized` if no valid session token is present.
pub fn current_session(state: &AppState, jar: &CookieJar, headers: &HeaderMap) -> AppResult<Session> {
    let token = extract_session_token(jar, headers)
        .ok_or_else(|| AppError::unauthorized("missing or invalid session"))?;
    state
        .sessions
        .lookup(&token)
        .ok_or_else(|| AppError::unauthorized("session expired or unknown"))
}

/// Resolve the caller's full [`User`] row (session plus a persistence
/// lookup), failing with `Unauthorized` if the session or the row is gone.
///
/// # Errors
/// `AppError::Unauthorized` if there is no valid session or the user row
/// backing it has disappeared.
pub async fn current_user(state: &AppState, jar: &CookieJar, headers: &HeaderMap) -> AppResult<User> {
    let session = current_session(state, jar, headers)?;
    state
        .persistence
        .get_user_by_id(session.user_id)
        .await?
        .ok_or_else(|| AppError::unauthorized("session user no longer exists"))
}

fn build_session_cookie(token: String) -> axum_extra::extract::cookie::Cookie<'static> {
    use axum_extra::extract::cookie::{Cookie, SameSite};
    Cookie::build((SESSION_COOKIE_NAME, token))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .build()
}
