// ABOUTME: Shared HTTP client construction
// ABOUTME: One client, built once at startup, reused for OAuth exchange and upstream dispatch alike
//
// SPDX-License-Identifier: MIT OR Apache-2.0

use reqwest::{Client, ClientBuilder};
use std::time::Duration;

/// Build the single long-lived client shared across every handler: the
/// OAuth authorization-code exchange, the token-refresh call, and upstream
/// GitHub API dispatch all go through this one client, so connection
/// pooling works and no handler mutates client state per request.
///
/// 30-second request timeout, matching the deadline the core requires for
/// both the upstream GitHub API dispatch and the OAuth provider exchange.
///
/// # Errors
/// Falls back to `Client::new()` if the configured builder fails, which
/// only happens for a malformed TLS backend configuration.
#[must_use]
pub fn api_client() -> Client {
    ClientBuilder::new()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|_| Client::new())
}
