// ABOUTME: Single shared application state passed to every handler
// ABOUTME: Built once at startup and wrapped in an Arc, never a hidden global singleton
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Application state
//!
//! One `AppState` shared via `Arc` across every handler: every handler
//! needs the same small set of collaborators (config, persistence, crypto,
//! in-memory stores, the shared HTTP client), so a single struct keeps call
//! sites simple instead of threading several narrower contexts through.

use std::sync::Arc;

use reqwest::Client;

use crate::config::Config;
use crate::crypto::Crypto;
use crate::persistence::Persistence;
use crate::session::{OAuthStateStore, SessionStore};
use crate::token_service::TokenService;

pub struct AppState {
    pub config: Config,
    pub persistence: Arc<dyn Persistence>,
    pub crypto: Crypto,
    pub sessions: SessionStore,
    pub oauth_states: OAuthStateStore,
    pub token_service: TokenService,
    pub http_client: Client,
}
