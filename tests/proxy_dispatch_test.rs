// ABOUTME: Success-path coverage of the proxy pipeline against a local mock upstream
// ABOUTME: Exercises dispatch, response header mirroring, usage recording, and audit without live network access
//
// SPDX-License-Identifier: MIT OR Apache-2.0

mod common;

use axum::body::Body;
use axum::http::StatusCode;
use ghp_reverse_proxy::models::AuditFilter;
use tower::ServiceExt;

#[tokio::test]
async fn in_scope_request_is_dispatched_to_upstream_and_mirrored() {
    let upstream_base = common::spawn_mock_upstream().await;
    let state = common::test_state_with_upstream(&upstream_base);
    let plaintext = common::seed_token(&state, "acme/widget", "contents:read", "mock-access-token").await;
    let router = common::router(state.clone());

    let response = router
        .oneshot(
            axum::http::Request::builder()
                .uri("/api/v3/repos/acme/widget/contents/README.md")
                .header("authorization", format!("Bearer {plaintext}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-ratelimit-remaining").unwrap(),
        "4999"
    );
    assert_eq!(
        response.headers().get("x-github-request-id").unwrap(),
        "MOCK:0000:REQID"
    );
    // Set-Cookie and other non-allowlisted upstream headers never appear:
    // only the allowlist in `should_mirror_response_header` is copied.
    assert!(response.headers().get("set-cookie").is_none());

    let json = common::body_json(response).await;
    assert_eq!(json["sha"], "deadbeefcafe");
}

#[tokio::test]
async fn successful_dispatch_records_usage_and_writes_audit_entry() {
    let upstream_base = common::spawn_mock_upstream().await;
    let state = common::test_state_with_upstream(&upstream_base);
    let plaintext = common::seed_token(&state, "acme/widget", "contents:read", "mock-access-token").await;
    let router = common::router(state.clone());

    let response = router
        .oneshot(
            axum::http::Request::builder()
                .uri("/api/v3/repos/acme/widget/contents/README.md")
                .header("authorization", format!("Bearer {plaintext}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let token = state
        .token_service
        .resolve(&plaintext)
        .await
        .expect("token still resolvable");
    assert_eq!(token.request_count, 1);
    assert!(token.last_used_at.is_some());

    let entries = state
        .persistence
        .list_audit_entries(&AuditFilter {
            user_id: Some(token.user_id),
            limit: 10,
            offset: 0,
        })
        .await
        .expect("list audit entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action.0, "proxy_request");
    assert_eq!(entries[0].status_code, 200);
    assert_eq!(entries[0].repository, "acme/widget");
}
