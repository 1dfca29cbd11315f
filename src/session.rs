// ABOUTME: In-process session store and single-use OAuth state nonce store
// ABOUTME: Both are mutex-guarded maps; nothing here survives a restart
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session and OAuth state
//!
//! Two global, shared-mutable maps: a logged-in browser session
//! keyed by an opaque session token, and a short-lived OAuth `state` nonce
//! used to bind the callback to the request that started the flow. Neither
//! is persisted; a restart logs every browser session out and aborts any
//! OAuth flow in flight.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use uuid::Uuid;

use crate::models::Role;

pub const SESSION_TOKEN_PREFIX: &str = "ghs_";
const SESSION_TOKEN_BYTES: usize = 32;
const SESSION_TTL_DAYS: i64 = 30;
const OAUTH_STATE_TTL_MINUTES: i64 = 10;

/// A logged-in browser session. `username`/`role` are cached at creation
/// time so session lookups never need a persistence round trip.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

fn random_token(prefix: &str, len_bytes: usize) -> String {
    let mut bytes = vec![0u8; len_bytes];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{prefix}{}", hex::encode(bytes))
}

/// Mutex-guarded session map. Lookups lazily evict expired entries; no
/// background sweeper runs.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a new session for `user_id`, returning the opaque session token.
    #[must_use]
    pub fn create(&self, user_id: Uuid, username: impl Into<String>, role: Role) -> String {
        let token = random_token(SESSION_TOKEN_PREFIX, SESSION_TOKEN_BYTES);
        let now = Utc::now();
        let session = Session {
            user_id,
            username: username.into(),
            role,
            created_at: now,
            expires_at: now + Duration::days(SESSION_TTL_DAYS),
        };
        self.sessions
            .lock()
            .expect("session store lock poisoned")
            .insert(token.clone(), session);
        token
    }

    /// Look up a session by its token, evicting it first if expired.
    #[must_use]
    pub fn lookup(&self, token: &str) -> Option<Session> {
        let mut sessions = self.sessions.lock().expect("session store lock poisoned");
        let now = Utc::now();
        match sessions.get(token) {
            Some(session) if session.expires_at > now => Some(session.clone()),
            Some(_) => {
                sessions.remove(token);
                None
            }
            None => None,
        }
    }

    /// Remove a session unconditionally (logout).
    pub fn remove(&self, token: &str) {
        self.sessions
            .lock()
            .expect("session store lock poisoned")
            .remove(token);
    }
}

/// Mutex-guarded `state_nonce -> not_after` map used during the OAuth
/// authorization-code handshake. Single-use: a nonce is removed the first
/// time it is matched, successfully or not, so it can never be replayed.
#[derive(Default)]
pub struct OAuthStateStore {
    states: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl OAuthStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new state nonce valid for the next 10 minutes.
    #[must_use]
    pub fn issue(&self) -> String {
        let nonce = random_token("", 24);
        let not_after = Utc::now() + Duration::minutes(OAUTH_STATE_TTL_MINUTES);
        self.states
            .lock()
            .expect("oauth state store lock poisoned")
            .insert(nonce.clone(), not_after);
        nonce
    }

    /// Consume `nonce`, returning `true` iff it existed and had not expired.
    /// Removes the entry unconditionally so it cannot be replayed.
    #[must_use]
    pub fn consume(&self, nonce: &str) -> bool {
        let not_after = self
            .states
            .lock()
            .expect("oauth state store lock poisoned")
            .remove(nonce);
        match not_after {
            Some(not_after) => Utc::now() <= not_after,
            None => false,
        }
    }
}
