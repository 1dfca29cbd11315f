// ABOUTME: Data model for users, upstream credentials, proxy tokens, and audit entries
// ABOUTME: Session and OAuthState live only in process memory; see session.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Data model
//!
//! All timestamps are `DateTime<Utc>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Access level granted for a permission category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeLevel {
    Read,
    Write,
}

impl ScopeLevel {
    /// `write` satisfies both `read` and `write` checks; `read` satisfies only `read`.
    #[must_use]
    pub const fn satisfies(self, required: Self) -> bool {
        match (self, required) {
            (Self::Write, _) | (Self::Read, Self::Read) => true,
            (Self::Read, Self::Write) => false,
        }
    }
}

impl std::fmt::Display for ScopeLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
        })
    }
}

impl std::str::FromStr for ScopeLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            _ => Err(()),
        }
    }
}

/// `permission -> level` map, e.g. `{"contents": Read, "pulls": Write}`.
pub type ScopeMap = HashMap<String, ScopeLevel>;

/// Role granted to a User at login time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

/// One row per upstream identity, keyed stably by `upstream_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub upstream_id: i64,
    pub username: String,
    pub email: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The real OAuth access/refresh pair for the upstream provider, at most one
/// live row per user, held only by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamCredential {
    pub id: Uuid,
    pub user_id: Uuid,
    pub access_ciphertext: String,
    pub refresh_ciphertext: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub scopes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A short-lived, narrowly-scoped bearer token issued to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyToken {
    pub id: Uuid,
    pub token_hash: String,
    pub token_prefix: String,
    pub user_id: Uuid,
    pub upstream_credential_id: Uuid,
    pub repository: String,
    pub scopes: ScopeMap,
    pub session_label: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub request_count: i64,
    pub created_at: DateTime<Utc>,
}

impl ProxyToken {
    /// A token is usable iff it has not been revoked and has not expired.
    #[must_use]
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && now < self.expires_at
    }

    /// Checks that `scopes[permission]` exists and satisfies `required`.
    #[must_use]
    pub fn has_permission(&self, permission: &str, required: ScopeLevel) -> bool {
        self.scopes
            .get(permission)
            .is_some_and(|granted| granted.satisfies(required))
    }
}

/// Audit action kinds. Readers must treat unknown values as opaque, so this
/// is modeled as a plain string newtype rather than a closed enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditAction(pub String);

impl AuditAction {
    pub const AUTH_LOGIN: &'static str = "auth_login";
    pub const TOKEN_CREATED: &'static str = "token_created";
    pub const TOKEN_REVOKED: &'static str = "token_revoked";
    pub const PROXY_REQUEST: &'static str = "proxy_request";
    pub const PROXY_SCOPE_DENIED: &'static str = "proxy_scope_denied";

    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        Self(action.into())
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Append-only audit log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_id: Uuid,
    pub proxy_token_id: Option<Uuid>,
    pub action: AuditAction,
    pub method: String,
    pub path: String,
    pub repository: String,
    pub status_code: u16,
    pub duration_ms: i64,
    pub session_label: String,
    pub metadata: serde_json::Value,
}

/// Filter applied when listing audit entries. An empty filter combined with
/// a non-admin requester is narrowed to that requester's own entries by the
/// caller, not by this type.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub user_id: Option<Uuid>,
    pub limit: u32,
    pub offset: u32,
}
