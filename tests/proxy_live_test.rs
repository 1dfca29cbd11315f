// ABOUTME: Live-upstream coverage of the REST passthrough, credential refresh, and in-scope use
// ABOUTME: Requires real GitHub credentials; run manually with `cargo test -- --ignored`
//
// SPDX-License-Identifier: MIT OR Apache-2.0
//
//! These scenarios dispatch through to `https://api.github.com` for real, so
//! they are gated behind `#[ignore]` rather than run on every `cargo test`.
//! Set `GHP_TEST_ACCESS_TOKEN` to a real GitHub personal access token and
//! `GHP_TEST_REPO` to a repository (`owner/name`) that token can read before
//! running them explicitly.

mod common;

use axum::body::Body;
use axum::http::StatusCode;
use ghp_reverse_proxy::models::{Role, UpstreamCredential, User};
use tower::ServiceExt;
use uuid::Uuid;

fn live_access_token() -> Option<String> {
    std::env::var("GHP_TEST_ACCESS_TOKEN").ok().filter(|v| !v.is_empty())
}

fn live_repo() -> String {
    std::env::var("GHP_TEST_REPO").unwrap_or_else(|_| "octocat/Hello-World".to_string())
}

/// Seeds a user and an upstream credential carrying a real access token,
/// then mints a proxy token scoped to `repository`/`scopes` against it.
async fn seed_live_token(state: &std::sync::Arc<ghp_reverse_proxy::state::AppState>, repository: &str, scopes: &str) -> String {
    use chrono::{Duration, Utc};

    let access_token = live_access_token().expect("GHP_TEST_ACCESS_TOKEN must be set for live tests");
    let now = Utc::now();
    let user = state
        .persistence
        .upsert_user(&User {
            id: Uuid::nil(),
            upstream_id: 1,
            username: "live-test-user".into(),
            email: None,
            role: Role::User,
            created_at: now,
            updated_at: now,
        })
        .await
        .expect("seed user");

    let access_ciphertext = state.crypto.encrypt_str(&access_token).expect("encrypt");
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
            session_label: "live-test".into(),
        })
        .await
        .expect("create proxy token");
    created.plaintext
}

#[tokio::test]
#[ignore = "dispatches a real request to api.github.com"]
async fn in_scope_metadata_request_is_forwarded() {
    let state = common::test_state();
    let repo = live_repo();
    let plaintext = seed_live_token(&state, &repo, "metadata:read").await;
    let router = common::router(state);

    let response = router
        .oneshot(
            axum::http::Request::builder()
                .uri(format!("/api/v3/repos/{repo}"))
                .header("authorization", format!("Bearer {plaintext}"))
                .header("user-agent", "ghp-reverse-proxy-live-test")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = common::body_json(response).await;
    assert_eq!(json["full_name"].as_str().unwrap().to_ascii_lowercase(), repo.to_ascii_lowercase());
}

#[tokio::test]
#[ignore = "dispatches a real request to api.github.com"]
async fn host_routed_request_bypasses_the_api_v3_prefix() {
    let state = common::test_state();
    let repo = live_repo();
    let plaintext = seed_live_token(&state, &repo, "metadata:read").await;
    let router = common::router(state);

    let response = router
        .oneshot(
            axum::http::Request::builder()
                .uri(format!("/repos/{repo}"))
                .header("host", "api.github.com")
                .header("authorization", format!("Bearer {plaintext}"))
                .header("user-agent", "ghp-reverse-proxy-live-test")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
#[ignore = "dispatches a real request to api.github.com"]
async fn contents_read_request_in_scope_succeeds() {
    let state = common::test_state();
    let repo = live_repo();
    let plaintext = seed_live_token(&state, &repo, "contents:read").await;
    let router = common::router(state);

    let response = router
        .oneshot(
            axum::http::Request::builder()
                .uri(format!("/api/v3/repos/{repo}/contents/README.md"))
                .header("authorization", format!("Bearer {plaintext}"))
                .header("user-agent", "ghp-reverse-proxy-live-test")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response.status() == StatusCode::OK || response.status() == StatusCode::NOT_FOUND);
}
