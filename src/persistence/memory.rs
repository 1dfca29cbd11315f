// ABOUTME: Reference in-memory Persistence implementation, primarily for tests
// ABOUTME: Simplifies testing; the durable backend is sqlite.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::{AuditEntry, AuditFilter, ProxyToken, UpstreamCredential, User};

use super::{clamp_limit, Persistence};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    users_by_upstream_id: HashMap<i64, Uuid>,
    credentials: HashMap<Uuid, UpstreamCredential>,
    credentials_by_user: HashMap<Uuid, Uuid>,
    tokens: HashMap<Uuid, ProxyToken>,
    tokens_by_hash: HashMap<String, Uuid>,
    audit: Vec<AuditEntry>,
}

/// Reference implementation of [`Persistence`] backed by in-process maps.
/// No data survives process restart.
#[derive(Default)]
pub struct InMemoryPersistence {
    tables: Mutex<Tables>,
}

impl InMemoryPersistence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn migrate(&self) -> AppResult<()> {
        Ok(())
    }

    async fn upsert_user(&self, user: &User) -> AppResult<User> {
        let mut tables = self.tables.lock().expect("tables lock poisoned");
        if let Some(&existing_id) = tables.users_by_upstream_id.get(&user.upstream_id) {
            let mut stored = tables
                .users
                .get(&existing_id)
                .cloned()
                .ok_or_else(|| AppError::internal("user index inconsistent"))?;
            stored.username = user.username.clone();
            stored.email = user.email.clone();
            stored.role = user.role;
            stored.updated_at = user.updated_at;
            tables.users.insert(existing_id, stored.clone());
            Ok(stored)
        } else {
            let mut stored = user.clone();
            stored.id = Uuid::new_v4();
            tables
                .users_by_upstream_id
                .insert(stored.upstream_id, stored.id);
            tables.users.insert(stored.id, stored.clone());
            Ok(stored)
        }
    }

    async fn get_user_by_upstream_id(&self, upstream_id: i64) -> AppResult<Option<User>> {
        let tables = self.tables.lock().expect("tables lock poisoned");
        Ok(tables
            .users_by_upstream_id
            .get(&upstream_id)
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    async fn get_user_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        let tables = self.tables.lock().expect("tables lock poisoned");
        Ok(tables.users.get(&id).cloned())
    }

    async fn list_users(&self) -> AppResult<Vec<User>> {
        let tables = self.tables.lock().expect("tables lock poisoned");
        let mut users: Vec<User> = tables.users.values().cloned().collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }

    async fn upsert_upstream_credential(&self, credential: &UpstreamCredential) -> AppResult<()> {
        let mut tables = self.tables.lock().expect("tables lock poisoned");
        let id = tables
            .credentials_by_user
            .get(&credential.user_id)
            .copied()
            .unwrap_or(credential.id);
        let mut stored = credential.clone();
        stored.id = id;
        tables.credentials_by_user.insert(stored.user_id, id);
        tables.credentials.insert(id, stored);
        Ok(())
    }

    async fn get_upstream_credential(&self, user_id: Uuid) -> AppResult<Option<UpstreamCredential>> {
        let tables = self.tables.lock().expect("tables lock poisoned");
        Ok(tables
            .credentials_by_user
            .get(&user_id)
            .and_then(|id| tables.credentials.get(id))
            .cloned())
    }

    async fn get_upstream_credential_by_id(&self, id: Uuid) -> AppResult<Option<UpstreamCredential>> {
        let tables = self.tables.lock().expect("tables lock poisoned");
        Ok(tables.credentials.get(&id).cloned())
    }

    async fn create_proxy_token(&self, token: &ProxyToken) -> AppResult<()> {
        let mut tables = self.tables.lock().expect("tables lock poisoned");
        if tables.tokens_by_hash.contains_key(&token.token_hash) {
            return Err(AppError::internal("token_hash collision"));
        }
        tables
            .tokens_by_hash
            .insert(token.token_hash.clone(), token.id);
        tables.tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn get_proxy_token_by_hash(&self, hash: &str) -> AppResult<Option<ProxyToken>> {
        let tables = self.tables.lock().expect("tables lock poisoned");
        Ok(tables
            .tokens_by_hash
            .get(hash)
            .and_then(|id| tables.tokens.get(id))
            .cloned())
    }

    async fn get_proxy_token_by_id(&self, id: Uuid) -> AppResult<Option<ProxyToken>> {
        let tables = self.tables.lock().expect("tables lock poisoned");
        Ok(tables.tokens.get(&id).cloned())
    }

    async fn list_proxy_tokens(&self, user_id: Uuid) -> AppResult<Vec<ProxyToken>> {
        let tables = self.tables.lock().expect("tables lock poisoned");
        let mut tokens: Vec<ProxyToken> = tables
            .tokens
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        tokens.sort_by_key(|t| std::cmp::Reverse(t.created_at));
        Ok(tokens)
    }

    async fn list_all_proxy_tokens(&self) -> AppResult<Vec<ProxyToken>> {
        let tables = self.tables.lock().expect("tables lock poisoned");
        let mut tokens: Vec<ProxyToken> = tables.tokens.values().cloned().collect();
        tokens.sort_by_key(|t| std::cmp::Reverse(t.created_at));
        Ok(tokens)
    }

    async fn revoke_proxy_token(&self, id: Uuid) -> AppResult<()> {
        let mut tables = self.tables.lock().expect("tables lock poisoned");
        let token = tables
            .tokens
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("token not found"))?;
        if token.revoked_at.is_some() {
            return Err(AppError::conflict("token already revoked"));
        }
        token.revoked_at = Some(Utc::now());
        Ok(())
    }

    async fn update_proxy_token_usage(&self, id: Uuid) -> AppResult<()> {
        let mut tables = self.tables.lock().expect("tables lock poisoned");
        if let Some(token) = tables.tokens.get_mut(&id) {
            token.last_used_at = Some(Utc::now());
            token.request_count += 1;
        }
        Ok(())
    }

    async fn create_audit_entry(&self, entry: &AuditEntry) -> AppResult<()> {
        let mut tables = self.tables.lock().expect("tables lock poisoned");
        tables.audit.push(entry.clone());
        Ok(())
    }

    async fn list_audit_entries(&self, filter: &AuditFilter) -> AppResult<Vec<AuditEntry>> {
        let tables = self.tables.lock().expect("tables lock poisoned");
        let mut entries: Vec<AuditEntry> = tables
            .audit
            .iter()
            .filter(|e| filter.user_id.map_or(true, |uid| e.user_id == uid))
            .cloned()
            .collect();
        entries.sort_by_key(|e| std::cmp::Reverse(e.timestamp));
        let limit = clamp_limit(filter.limit) as usize;
        let offset = filter.offset as usize;
        Ok(entries.into_iter().skip(offset).take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn sample_user(upstream_id: i64, username: &str) -> User {
        let now = Utc::now();
        User {
            id: Uuid::nil(),
            upstream_id,
            username: username.into(),
            email: None,
            role: Role::User,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn upsert_user_converges_on_upstream_id() {
        let db = InMemoryPersistence::new();
        let first = db.upsert_user(&sample_user(42, "alice")).await.expect("insert");
        let mut renamed = sample_user(42, "alice2");
        renamed.id = first.id;
        let second = db.upsert_user(&renamed).await.expect("update");
        assert_eq!(first.id, second.id);
        assert_eq!(second.username, "alice2");
        assert_eq!(db.list_users().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn revoke_is_idempotent_guard() {
        let db = InMemoryPersistence::new();
        let now = Utc::now();
        let user = db.upsert_user(&sample_user(1, "bob")).await.expect("insert");
        let token = ProxyToken {
            id: Uuid::new_v4(),
            token_hash: "h1".into(),
            token_prefix: "ghp_abcd".into(),
            user_id: user.id,
            upstream_credential_id: Uuid::new_v4(),
            repository: "acme/widget".into(),
            scopes: HashMap::new(),
            session_label: "s".into(),
            expires_at: now + chrono::Duration::hours(1),
            revoked_at: None,
            last_used_at: None,
            request_count: 0,
            created_at: now,
        };
        db.create_proxy_token(&token).await.expect("create");
        db.revoke_proxy_token(token.id).await.expect("first revoke");
        let err = db
            .revoke_proxy_token(token.id)
            .await
            .expect_err("second revoke must fail");
        assert_eq!(err.code, crate::errors::ErrorCode::Conflict);
    }

    #[tokio::test]
    async fn duplicate_token_hash_is_rejected() {
        let db = InMemoryPersistence::new();
        let now = Utc::now();
        let make = |id: Uuid| ProxyToken {
            id,
            token_hash: "dup".into(),
            token_prefix: "ghp_abcd".into(),
            user_id: Uuid::new_v4(),
            upstream_credential_id: Uuid::new_v4(),
            repository: "acme/widget".into(),
            scopes: HashMap::new(),
            session_label: "s".into(),
            expires_at: now + chrono::Duration::hours(1),
            revoked_at: None,
            last_used_at: None,
            request_count: 0,
            created_at: now,
        };
        db.create_proxy_token(&make(Uuid::new_v4())).await.expect("first insert ok");
        assert!(db.create_proxy_token(&make(Uuid::new_v4())).await.is_err());
    }
}
