// ABOUTME: Narrow persistence contract over four relations plus a migration hook
// ABOUTME: The SQL dialect and migration loader are out of scope; only semantics are specified
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence
//!
//! An interface, not a schema. [`Persistence`] is the contract every
//! backend must satisfy; [`memory::InMemoryPersistence`] is the reference
//! implementation used by tests and [`sqlite::SqlitePersistence`] is the
//! durable backend that ships by default.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::AppResult;
use crate::models::{AuditEntry, AuditFilter, ProxyToken, UpstreamCredential, User};

/// The four relations and migration executor required by the core.
///
/// Implementations must be safe for concurrent use; each mutation commits
/// before returning (no cross-entity transactional promise is required
/// beyond "revoke is atomic").
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Run this backend's migrations (idempotent). Out of scope: migration
    /// *file* loading; a backend may hardcode its schema here.
    async fn migrate(&self) -> AppResult<()>;

    /// Insert-or-update keyed by `upstream_id`; assigns `id` on insert,
    /// preserves the existing `id` on update.
    async fn upsert_user(&self, user: &User) -> AppResult<User>;
    async fn get_user_by_upstream_id(&self, upstream_id: i64) -> AppResult<Option<User>>;
    async fn get_user_by_id(&self, id: Uuid) -> AppResult<Option<User>>;
    /// Ordered by `created_at` ascending.
    async fn list_users(&self) -> AppResult<Vec<User>>;

    /// Keyed by `user_id`; replaces ciphertexts and expiries in place.
    async fn upsert_upstream_credential(&self, credential: &UpstreamCredential) -> AppResult<()>;
    async fn get_upstream_credential(&self, user_id: Uuid) -> AppResult<Option<UpstreamCredential>>;
    async fn get_upstream_credential_by_id(&self, id: Uuid) -> AppResult<Option<UpstreamCredential>>;

    /// Inserts a new row. `token_hash` is unique; a colliding insert is a
    /// fatal error.
    async fn create_proxy_token(&self, token: &ProxyToken) -> AppResult<()>;
    /// Returns the row regardless of revoked/expired state; the caller
    /// checks usability.
    async fn get_proxy_token_by_hash(&self, hash: &str) -> AppResult<Option<ProxyToken>>;
    async fn get_proxy_token_by_id(&self, id: Uuid) -> AppResult<Option<ProxyToken>>;
    /// Newest-first by `created_at`.
    async fn list_proxy_tokens(&self, user_id: Uuid) -> AppResult<Vec<ProxyToken>>;
    async fn list_all_proxy_tokens(&self) -> AppResult<Vec<ProxyToken>>;
    /// Sets `revoked_at = now()` only where it is currently null. Returns
    /// `Conflict` if already revoked or `NotFound` if absent.
    async fn revoke_proxy_token(&self, id: Uuid) -> AppResult<()>;
    /// Sets `last_used_at = now()` and increments `request_count`.
    async fn update_proxy_token_usage(&self, id: Uuid) -> AppResult<()>;

    /// Best-effort: failures are logged by the caller, never surfaced.
    async fn create_audit_entry(&self, entry: &AuditEntry) -> AppResult<()>;
    /// Newest-first, `filter.limit` capped at 100.
    async fn list_audit_entries(&self, filter: &AuditFilter) -> AppResult<Vec<AuditEntry>>;
}

/// Clamp a caller-supplied limit to the persistence contract's ceiling.
#[must_use]
pub const fn clamp_limit(limit: u32) -> u32 {
    if limit == 0 || limit > 100 {
        100
    } else {
        limit
    }
}
