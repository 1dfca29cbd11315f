// ABOUTME: Shared test setup for integration tests
// ABOUTME: Builds an in-memory AppState/router and a few request helpers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use ghp_reverse_proxy::config::Config;
use ghp_reverse_proxy::crypto::Crypto;
use ghp_reverse_proxy::logging::LogFormat;
use ghp_reverse_proxy::models::{Role, UpstreamCredential, User};
use ghp_reverse_proxy::persistence::memory::InMemoryPersistence;
use ghp_reverse_proxy::persistence::Persistence;
use ghp_reverse_proxy::session::{OAuthStateStore, SessionStore};
use ghp_reverse_proxy::state::AppState;
use ghp_reverse_proxy::token_service::TokenService;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

/// Builds an `AppState` over the in-memory backend with dev mode enabled,
/// suitable for exercising the full HTTP surface without a database or
/// outbound network access.
pub fn test_state() -> Arc<AppState> {
    test_state_with_upstream("https://api.github.com")
}

/// Same as [`test_state`], but dispatches proxied requests to `upstream_base`
/// instead of the real GitHub API — used by tests that stand up a local mock
/// upstream on an ephemeral port.
pub fn test_state_with_upstream(upstream_base: &str) -> Arc<AppState> {
    let config = Config {
        encryption_key: "ab".repeat(32),
        github_client_id: "test-client-id".into(),
        github_client_secret: "test-client-secret".into(),
        tokens_default_duration: StdDuration::from_secs(3600),
        tokens_max_duration: StdDuration::from_secs(30 * 24 * 3600),
        dev_mode: true,
        admins: HashSet::from(["octo-admin".to_string()]),
        http_port: 8080,
        bind_address: "0.0.0.0".into(),
        database_url: "sqlite::memory:".into(),
        log_level: "warn".into(),
        log_format: LogFormat::Compact,
        github_api_base: upstream_base.to_string(),
    };
    let persistence: Arc<dyn Persistence> = Arc::new(InMemoryPersistence::new());
    let crypto = Crypto::from_hex(&config.encryption_key).expect("valid encryption key");
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

pub fn router(state: Arc<AppState>) -> Router {
    ghp_reverse_proxy::app(state)
}

/// Logs a dev-mode user in via `/auth/test-login` and returns the session
/// token that authenticates subsequent requests.
pub async fn test_login(router: Router, username: &str, role: Option<&str>) -> (Router, String) {
    let mut body = serde_json::json!({ "username": username });
    if let Some(role) = role {
        body["role"] = Value::String(role.to_string());
    }
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/test-login")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let token = json["session_token"].as_str().expect("session_token").to_string();
    (router, token)
}

/// Seeds a user and an upstream credential carrying `access_token`, then
/// mints a proxy token scoped to `repository`/`scopes` against it. Used by
/// tests that dispatch through [`spawn_mock_upstream`] rather than real
/// GitHub credentials.
pub async fn seed_token(state: &Arc<AppState>, repository: &str, scopes: &str, access_token: &str) -> String {
    use chrono::{Duration, Utc};

    let now = Utc::now();
    let user = state
        .persistence
        .upsert_user(&User {
            id: Uuid::nil(),
            upstream_id: 1,
            username: "mock-upstream-user".into(),
            email: None,
            role: Role::User,
            created_at: now,
            updated_at: now,
        })
        .await
        .expect("seed user");

    let access_ciphertext = state.crypto.encrypt_str(access_token).expect("encrypt");
    let refresh_ciphertext = state.crypto.encrypt_str("unused-refresh-token").expect("encrypt");
    state
        .persistence
        .upsert_upstream_credential(&UpstreamCredential {
            id: Uuid::new_v4(),
            user_id: user.id,
            access_ciphertext,
            refresh_ciphertext,
            access_expires_at: now + Duration::days(1),
            refresh_expires_at: now + Duration::days(180),
            scopes: String::new(),
            created_at: now,
            updated_at: now,
        })
        .await
        .expect("seed credential");
    let credential = state
        .persistence
        .get_upstream_credential(user.id)
        .await
        .expect("fetch credential")
        .expect("credential present");

    let created = state
        .token_service
        .create(ghp_reverse_proxy::token_service::CreateTokenRequest {
            user_id: user.id,
            upstream_credential_id: credential.id,
            repository: repository.to_string(),
            scopes: ghp_reverse_proxy::token_service::parse_scopes(scopes).expect("scopes"),
            duration: chrono::Duration::hours(1),
            session_label: "mock-upstream-test".into(),
        })
        .await
        .expect("create proxy token");
    created.plaintext
}

/// Spawns a tiny local axum server standing in for "upstream GitHub" and
/// returns its `http://127.0.0.1:<port>` base URL. Bound to an ephemeral
/// port; the listener task is detached and lives for the process, which is
/// fine for short-lived test binaries.
pub async fn spawn_mock_upstream() -> String {
    async fn get_contents() -> axum::response::Response {
        use axum::response::IntoResponse;
        let mut response = axum::Json(serde_json::json!({
            "name": "README.md",
            "path": "README.md",
            "sha": "deadbeefcafe",
            "content": "bW9jayBjb250ZW50cw==",
            "encoding": "base64",
        }))
        .into_response();
        let headers = response.headers_mut();
        headers.insert("x-ratelimit-remaining", axum::http::HeaderValue::from_static("4999"));
        headers.insert("x-github-request-id", axum::http::HeaderValue::from_static("MOCK:0000:REQID"));
        response
    }

    let router = Router::new().route("/repos/:owner/:repo/contents/*path", get(get_contents));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port for mock upstream");
    let addr = listener.local_addr().expect("mock upstream local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("mock upstream server");
    });
    format!("http://{addr}")
}

pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).expect("valid json body")
}

pub fn authed_request(method: &str, uri: &str, session_token: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {session_token}"))
}

/// Creates a proxy token for `repository`/`scopes` on behalf of the session
/// at `session_token`, returning the plaintext token.
pub async fn create_proxy_token(
    router: &Router,
    session_token: &str,
    repository: &str,
    scopes: &str,
) -> Value {
    let body = serde_json::json!({
        "repository": repository,
        "scopes": scopes,
        "session_id": "agent-session-1",
    });
    let response = router
        .clone()
        .oneshot(
            authed_request("POST", "/api/tokens", session_token)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await
}
