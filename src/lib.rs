// ABOUTME: Library entry point for the GitHub API reverse proxy core
// ABOUTME: Exposes the router builder consumed by the `ghp-reverse-proxy` binary
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # GHP Reverse Proxy
//!
//! A GitHub API reverse proxy that issues short-lived, narrowly-scoped
//! opaque tokens to autonomous coding agents. Agents point their standard
//! GitHub tooling at this proxy using an opaque bearer; the proxy
//! authenticates the bearer, enforces a declared repository/permission
//! envelope on every request, transparently substitutes the real upstream
//! credential, forwards the call, and records an audit entry.
//!
//! ## Architecture
//!
//! Five components, composed leaves-first:
//! - [`crypto`] — authenticated symmetric encryption over the upstream
//!   credential at rest.
//! - [`persistence`] — a narrow interface over users, upstream credentials,
//!   proxy tokens, and the audit log; [`persistence::memory`] is the
//!   reference backend, [`persistence::sqlite`] is the durable one.
//! - [`session`] — in-memory session and OAuth-state stores.
//! - [`token_service`] and [`scope_table`] — token minting/resolution and
//!   the static endpoint→scope table.
//! - [`proxy`] — the single entry point for agent-bound GitHub API traffic.
//!
//! [`routes`] wires these into the HTTP surface; [`app`] assembles the
//! final `axum::Router`.

#![deny(unsafe_code)]

pub mod config;
pub mod crypto;
pub mod errors;
pub mod logging;
pub mod middleware;
pub mod models;
pub mod persistence;
pub mod proxy;
pub mod routes;
pub mod scope_table;
pub mod session;
pub mod state;
pub mod token_service;
pub mod utils;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderName};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use state::AppState;

const UPSTREAM_HOST: &str = "api.github.com";
const REQUEST_ID_HEADER: &str = "x-request-id";

/// Pull the `request_id` a request carries (set by [`SetRequestIdLayer`])
/// into the `tracing::Span` every handler logs under, so `RUST_LOG`-driven
/// logs can be correlated to a single inbound call without any handler
/// threading the id through by hand.
fn make_span_with(request: &Request) -> tracing::Span {
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .and_then(|id| id.header_value().to_str().ok())
        .unwrap_or("-")
        .to_string();
    tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    )
}

/// If the inbound `Host` header equals the upstream's own host, every path
/// routes to the proxy handler regardless of local prefix. This middleware
/// runs ahead of normal path routing and short-circuits to the proxy when
/// that's the case.
async fn host_routed_proxy(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let is_upstream_host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|h| h.eq_ignore_ascii_case(UPSTREAM_HOST));

    if is_upstream_host {
        proxy::handle_host_routed(&state, request).await
    } else {
        next.run(request).await
    }
}

/// Assemble the full `axum::Router` over a shared [`AppState`].
///
/// Route table:
/// - `GET /healthz` — liveness probe.
/// - `GET /auth/{provider}`, `GET /auth/{provider}/callback`,
///   `POST /auth/logout`, `GET /auth/status`, `POST /auth/test-login`.
/// - `POST|GET /api/tokens`, `GET|DELETE /api/tokens/{id}`.
/// - `GET /api/users`, `GET /api/users/{id}/tokens`.
/// - `GET /api/audit`.
/// - `ANY /api/v3/*path`, `POST /api/graphql` — proxied.
#[must_use]
pub fn app(state: Arc<AppState>) -> Router {
    let router = Router::new()
        .route("/healthz", get(routes::health::healthz))
        .route("/auth/:provider", get(routes::auth::start))
        .route("/auth/:provider/callback", get(routes::auth::callback))
        .route("/auth/logout", post(routes::auth::logout))
        .route("/auth/status", get(routes::auth::status))
        .route("/auth/test-login", post(routes::auth::test_login))
        .route(
            "/api/tokens",
            get(routes::tokens::list_tokens).post(routes::tokens::create_token),
        )
        .route(
            "/api/tokens/:id",
            get(routes::tokens::get_token).delete(routes::tokens::revoke_token),
        )
        .route("/api/users", get(routes::users::list_users))
        .route("/api/users/:id/tokens", get(routes::users::user_tokens))
        .route("/api/audit", get(routes::audit::list_audit))
        .route("/api/v3/*path", axum::routing::any(proxy::rest_handler))
        .route("/api/graphql", post(proxy::graphql_handler))
        .with_state(state.clone());

    let request_id_header = HeaderName::from_static(REQUEST_ID_HEADER);

    router
        .layer(from_fn_with_state(state, host_routed_proxy))
        .layer(TraceLayer::new_for_http().make_span_with(make_span_with))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::crypto::Crypto;
    use crate::persistence::memory::InMemoryPersistence;
    use crate::session::{OAuthStateStore, SessionStore};
    use crate::token_service::TokenService;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use std::collections::HashSet;
    use std::time::Duration as StdDuration;
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let config = Config {
            encryption_key: "ab".repeat(32),
            github_client_id: "client".into(),
            github_client_secret: "secret".into(),
            tokens_default_duration: StdDuration::from_secs(3600),
            tokens_max_duration: StdDuration::from_secs(30 * 24 * 3600),
            dev_mode: true,
            admins: HashSet::new(),
            http_port: 8080,
            bind_address: "0.0.0.0".into(),
            database_url: "sqlite::memory:".into(),
            log_level: "info".into(),
            log_format: logging::LogFormat::Compact,
        };
        let persistence: Arc<dyn persistence::Persistence> = Arc::new(InMemoryPersistence::new());
        let crypto = Crypto::from_hex(&config.encryption_key).expect("valid key");
        let token_service = TokenService::new(persistence.clone(), config.tokens_max_duration_chrono());
        Arc::new(AppState {
            config,
            persistence,
            crypto,
            sessions: SessionStore::new(),
            oauth_states: OAuthStateStore::new(),
            token_service,
            http_client: reqwest::Client::new(),
        })
    }

    #[tokio::test]
    async fn healthz_is_unauthenticated() {
        let router = app(test_state());
        let response = router
            .oneshot(HttpRequest::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn tokens_endpoint_requires_session() {
        let router = app(test_state());
        let response = router
            .oneshot(HttpRequest::builder().uri("/api/tokens").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_proxy_endpoint_without_bearer_is_unauthorized() {
        let router = app(test_state());
        let response = router
            .oneshot(
                HttpRequest::builder()
                    .uri("/api/v3/repos/acme/widget")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
