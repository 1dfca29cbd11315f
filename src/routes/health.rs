// ABOUTME: Unauthenticated liveness endpoint
// ABOUTME: Used by orchestrators and load balancers to confirm the process is serving
//
// SPDX-License-Identifier: MIT OR Apache-2.0

/// `GET /healthz` — trivial liveness probe.
pub async fn healthz() -> &'static str {
    "ok"
}
