// ABOUTME: SQLite-backed Persistence implementation; the durable default
// ABOUTME: Inline schema only — concrete migration-file loading stays out of scope
//
// SPDX-License-Identifier: MIT OR Apache-2.0

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::{AuditAction, AuditEntry, AuditFilter, ProxyToken, Role, ScopeLevel, ScopeMap, UpstreamCredential, User};

use super::{clamp_limit, Persistence};

/// `sqlx::SqlitePool`-backed implementation of [`Persistence`].
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Connect (creating the database file if absent) without running
    /// migrations; call [`Persistence::migrate`] before first use.
    ///
    /// # Errors
    /// Returns `AppError::Internal` if the connection cannot be established.
    pub async fn connect(database_url: &str) -> AppResult<Self> {
        let connect_opts = if database_url.starts_with("sqlite:") {
            format!("{database_url}?mode=rwc")
        } else {
            database_url.to_string()
        };
        let pool = SqlitePool::connect(&connect_opts)
            .await
            .map_err(|e| AppError::internal(format!("failed to connect to database: {e}")))?;
        Ok(Self { pool })
    }
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Admin => "admin",
    }
}

fn role_from_str(s: &str) -> Role {
    if s == "admin" {
        Role::Admin
    } else {
        Role::User
    }
}

fn scopes_to_json(scopes: &ScopeMap) -> String {
    let as_strings: std::collections::HashMap<&String, String> =
        scopes.iter().map(|(k, v)| (k, v.to_string())).collect();
    serde_json::to_string(&as_strings).unwrap_or_else(|_| "{}".to_string())
}

fn scopes_from_json(json: &str) -> ScopeMap {
    let raw: std::collections::HashMap<String, String> =
        serde_json::from_str(json).unwrap_or_default();
    raw.into_iter()
        .filter_map(|(k, v)| v.parse::<ScopeLevel>().ok().map(|lvl| (k, lvl)))
        .collect()
}

#[async_trait]
impl Persistence for SqlitePersistence {
    async fn migrate(&self) -> AppResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                upstream_id INTEGER NOT NULL UNIQUE,
                username TEXT NOT NULL,
                email TEXT,
                role TEXT NOT NULL CHECK (role IN ('user','admin')),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS upstream_credentials (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL UNIQUE REFERENCES users(id),
                access_ciphertext TEXT NOT NULL,
                refresh_ciphertext TEXT NOT NULL,
                access_expires_at TEXT NOT NULL,
                refresh_expires_at TEXT NOT NULL,
                scopes TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS proxy_tokens (
                id TEXT PRIMARY KEY,
                token_hash TEXT NOT NULL UNIQUE,
                token_prefix TEXT NOT NULL,
                user_id TEXT NOT NULL REFERENCES users(id),
                upstream_credential_id TEXT NOT NULL REFERENCES upstream_credentials(id),
                repository TEXT NOT NULL,
                scopes TEXT NOT NULL,
                session_label TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                revoked_at TEXT,
                last_used_at TEXT,
                request_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_proxy_tokens_user_id ON proxy_tokens(user_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                user_id TEXT NOT NULL,
                proxy_token_id TEXT,
                action TEXT NOT NULL,
                method TEXT NOT NULL,
                path TEXT NOT NULL,
                repository TEXT NOT NULL,
                status_code INTEGER NOT NULL,
                duration_ms INTEGER NOT NULL,
                session_label TEXT NOT NULL,
                metadata TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_log_user_id ON audit_log(user_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn upsert_user(&self, user: &User) -> AppResult<User> {
        let existing = sqlx::query("SELECT id FROM users WHERE upstream_id = ?")
            .bind(user.upstream_id)
            .fetch_optional(&self.pool)
            .await?;

        let id = match existing {
            Some(row) => {
                let id: String = row.try_get("id")?;
                let id = Uuid::parse_str(&id).map_err(|e| AppError::internal(e.to_string()))?;
                sqlx::query(
                    "UPDATE users SET username = ?, email = ?, role = ?, updated_at = ? WHERE id = ?",
                )
                .bind(&user.username)
                .bind(&user.email)
                .bind(role_to_str(user.role))
                .bind(user.updated_at.to_rfc3339())
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;
                id
            }
            None => {
                let id = Uuid::new_v4();
                sqlx::query(
                    "INSERT INTO users (id, upstream_id, username, email, role, created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(id.to_string())
                .bind(user.upstream_id)
                .bind(&user.username)
                .bind(&user.email)
                .bind(role_to_str(user.role))
                .bind(user.created_at.to_rfc3339())
                .bind(user.updated_at.to_rfc3339())
                .execute(&self.pool)
                .await?;
                id
            }
        };

        self.get_user_by_id(id)
            .await?
            .ok_or_else(|| AppError::internal("user vanished after upsert"))
    }

    async fn get_user_by_upstream_id(&self, upstream_id: i64) -> AppResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE upstream_id = ?")
            .bind(upstream_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(user_from_row).transpose()
    }

    async fn get_user_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(user_from_row).transpose()
    }

    async fn list_users(&self) -> AppResult<Vec<User>> {
        let rows = sqlx::query("SELECT * FROM users ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(user_from_row).collect()
    }

    async fn upsert_upstream_credential(&self, credential: &UpstreamCredential) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO upstream_credentials
                (id, user_id, access_ciphertext, refresh_ciphertext, access_expires_at, refresh_expires_at, scopes, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                access_ciphertext = excluded.access_ciphertext,
                refresh_ciphertext = excluded.refresh_ciphertext,
                access_expires_at = excluded.access_expires_at,
                refresh_expires_at = excluded.refresh_expires_at,
                scopes = excluded.scopes,
                updated_at = excluded.updated_at",
        )
        .bind(credential.id.to_string())
        .bind(credential.user_id.to_string())
        .bind(&credential.access_ciphertext)
        .bind(&credential.refresh_ciphertext)
        .bind(credential.access_expires_at.to_rfc3339())
        .bind(credential.refresh_expires_at.to_rfc3339())
        .bind(&credential.scopes)
        .bind(credential.created_at.to_rfc3339())
        .bind(credential.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_upstream_credential(&self, user_id: Uuid) -> AppResult<Option<UpstreamCredential>> {
        let row = sqlx::query("SELECT * FROM upstream_credentials WHERE user_id = ?")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(credential_from_row).transpose()
    }

    async fn get_upstream_credential_by_id(&self, id: Uuid) -> AppResult<Option<UpstreamCredential>> {
        let row = sqlx::query("SELECT * FROM upstream_credentials WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(credential_from_row).transpose()
    }

    async fn create_proxy_token(&self, token: &ProxyToken) -> AppResult<()> {
        let result = sqlx::query(
            "INSERT INTO proxy_tokens
                (id, token_hash, token_prefix, user_id, upstream_credential_id, repository, scopes,
                 session_label, expires_at, revoked_at, last_used_at, request_count, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(token.id.to_string())
        .bind(&token.token_hash)
        .bind(&token.token_prefix)
        .bind(token.user_id.to_string())
        .bind(token.upstream_credential_id.to_string())
        .bind(&token.repository)
        .bind(scopes_to_json(&token.scopes))
        .bind(&token.session_label)
        .bind(token.expires_at.to_rfc3339())
        .bind(token.revoked_at.map(|t| t.to_rfc3339()))
        .bind(token.last_used_at.map(|t| t.to_rfc3339()))
        .bind(token.request_count)
        .bind(token.created_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(AppError::internal("token_hash collision"))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_proxy_token_by_hash(&self, hash: &str) -> AppResult<Option<ProxyToken>> {
        let row = sqlx::query("SELECT * FROM proxy_tokens WHERE token_hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        row.map(token_from_row).transpose()
    }

    async fn get_proxy_token_by_id(&self, id: Uuid) -> AppResult<Option<ProxyToken>> {
        let row = sqlx::query("SELECT * FROM proxy_tokens WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(token_from_row).transpose()
    }

    async fn list_proxy_tokens(&self, user_id: Uuid) -> AppResult<Vec<ProxyToken>> {
        let rows = sqlx::query("SELECT * FROM proxy_tokens WHERE user_id = ? ORDER BY created_at DESC")
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(token_from_row).collect()
    }

    async fn list_all_proxy_tokens(&self) -> AppResult<Vec<ProxyToken>> {
        let rows = sqlx::query("SELECT * FROM proxy_tokens ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(token_from_row).collect()
    }

    async fn revoke_proxy_token(&self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("UPDATE proxy_tokens SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL")
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            return Ok(());
        }
        // The conditional UPDATE above is the atomic check-and-set; this
        // SELECT only classifies why it matched zero rows.
        match self.get_proxy_token_by_id(id).await? {
            Some(_) => Err(AppError::conflict("token already revoked")),
            None => Err(AppError::not_found("token not found")),
        }
    }

    async fn update_proxy_token_usage(&self, id: Uuid) -> AppResult<()> {
        sqlx::query(
            "UPDATE proxy_tokens SET last_used_at = ?, request_count = request_count + 1 WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_audit_entry(&self, entry: &AuditEntry) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO audit_log
                (id, timestamp, user_id, proxy_token_id, action, method, path, repository,
                 status_code, duration_ms, session_label, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id.to_string())
        .bind(entry.timestamp.to_rfc3339())
        .bind(entry.user_id.to_string())
        .bind(entry.proxy_token_id.map(|id| id.to_string()))
        .bind(entry.action.to_string())
        .bind(&entry.method)
        .bind(&entry.path)
        .bind(&entry.repository)
        .bind(i64::from(entry.status_code))
        .bind(entry.duration_ms)
        .bind(&entry.session_label)
        .bind(entry.metadata.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_audit_entries(&self, filter: &AuditFilter) -> AppResult<Vec<AuditEntry>> {
        let limit = clamp_limit(filter.limit);
        let rows = if let Some(user_id) = filter.user_id {
            sqlx::query(
                "SELECT * FROM audit_log WHERE user_id = ? ORDER BY timestamp DESC LIMIT ? OFFSET ?",
            )
            .bind(user_id.to_string())
            .bind(i64::from(limit))
            .bind(i64::from(filter.offset))
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query("SELECT * FROM audit_log ORDER BY timestamp DESC LIMIT ? OFFSET ?")
                .bind(i64::from(limit))
                .bind(i64::from(filter.offset))
                .fetch_all(&self.pool)
                .await?
        };
        rows.into_iter().map(audit_from_row).collect()
    }
}

fn parse_rfc3339(s: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::internal(format!("invalid timestamp in database: {e}")))
}

fn user_from_row(row: sqlx::sqlite::SqliteRow) -> AppResult<User> {
    let id: String = row.try_get("id")?;
    let role: String = row.try_get("role")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(User {
        id: Uuid::parse_str(&id).map_err(|e| AppError::internal(e.to_string()))?,
        upstream_id: row.try_get("upstream_id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        role: role_from_str(&role),
        created_at: parse_rfc3339(&created_at)?,
        updated_at: parse_rfc3339(&updated_at)?,
    })
}

fn credential_from_row(row: sqlx::sqlite::SqliteRow) -> AppResult<UpstreamCredential> {
    let id: String = row.try_get("id")?;
    let user_id: String = row.try_get("user_id")?;
    let access_expires_at: String = row.try_get("access_expires_at")?;
    let refresh_expires_at: String = row.try_get("refresh_expires_at")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(UpstreamCredential {
        id: Uuid::parse_str(&id).map_err(|e| AppError::internal(e.to_string()))?,
        user_id: Uuid::parse_str(&user_id).map_err(|e| AppError::internal(e.to_string()))?,
        access_ciphertext: row.try_get("access_ciphertext")?,
        refresh_ciphertext: row.try_get("refresh_ciphertext")?,
        access_expires_at: parse_rfc3339(&access_expires_at)?,
        refresh_expires_at: parse_rfc3339(&refresh_expires_at)?,
        scopes: row.try_get("scopes")?,
        created_at: parse_rfc3339(&created_at)?,
        updated_at: parse_rfc3339(&updated_at)?,
    })
}

fn token_from_row(row: sqlx::sqlite::SqliteRow) -> AppResult<ProxyToken> {
    let id: String = row.try_get("id")?;
    let user_id: String = row.try_get("user_id")?;
    let upstream_credential_id: String = row.try_get("upstream_credential_id")?;
    let scopes: String = row.try_get("scopes")?;
    let expires_at: String = row.try_get("expires_at")?;
    let revoked_at: Option<String> = row.try_get("revoked_at")?;
    let last_used_at: Option<String> = row.try_get("last_used_at")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(ProxyToken {
        id: Uuid::parse_str(&id).map_err(|e| AppError::internal(e.to_string()))?,
        token_hash: row.try_get("token_hash")?,
        token_prefix: row.try_get("token_prefix")?,
        user_id: Uuid::parse_str(&user_id).map_err(|e| AppError::internal(e.to_string()))?,
        upstream_credential_id: Uuid::parse_str(&upstream_credential_id)
            .map_err(|e| AppError::internal(e.to_string()))?,
        repository: row.try_get("repository")?,
        scopes: scopes_from_json(&scopes),
        session_label: row.try_get("session_label")?,
        expires_at: parse_rfc3339(&expires_at)?,
        revoked_at: revoked_at.map(|s| parse_rfc3339(&s)).transpose()?,
        last_used_at: last_used_at.map(|s| parse_rfc3339(&s)).transpose()?,
        request_count: row.try_get("request_count")?,
        created_at: parse_rfc3339(&created_at)?,
    })
}

fn audit_from_row(row: sqlx::sqlite::SqliteRow) -> AppResult<AuditEntry> {
    let id: String = row.try_get("id")?;
    let timestamp: String = row.try_get("timestamp")?;
    let user_id: String = row.try_get("user_id")?;
    let proxy_token_id: Option<String> = row.try_get("proxy_token_id")?;
    let action: String = row.try_get("action")?;
    let status_code: i64 = row.try_get("status_code")?;
    let metadata: String = row.try_get("metadata")?;
    Ok(AuditEntry {
        id: Uuid::parse_str(&id).map_err(|e| AppError::internal(e.to_string()))?,
        timestamp: parse_rfc3339(&timestamp)?,
        user_id: Uuid::parse_str(&user_id).map_err(|e| AppError::internal(e.to_string()))?,
        proxy_token_id: proxy_token_id
            .map(|s| Uuid::parse_str(&s))
            .transpose()
            .map_err(|e| AppError::internal(e.to_string()))?,
        action: AuditAction::new(action),
        method: row.try_get("method")?,
        path: row.try_get("path")?,
        repository: row.try_get("repository")?,
        status_code: u16::try_from(status_code).unwrap_or(0),
        duration_ms: row.try_get("duration_ms")?,
        session_label: row.try_get("session_label")?,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    async fn test_db() -> SqlitePersistence {
        let db = SqlitePersistence::connect("sqlite::memory:").await.expect("connect");
        db.migrate().await.expect("migrate");
        db
    }

    #[tokio::test]
    async fn upsert_and_fetch_user_roundtrips() {
        let db = test_db().await;
        let now = Utc::now();
        let user = User {
            id: Uuid::nil(),
            upstream_id: 7,
            username: "octocat".into(),
            email: Some("octocat@example.com".into()),
            role: Role::User,
            created_at: now,
            updated_at: now,
        };
        let stored = db.upsert_user(&user).await.expect("insert");
        let fetched = db
            .get_user_by_upstream_id(7)
            .await
            .expect("query")
            .expect("present");
        assert_eq!(stored.id, fetched.id);
        assert_eq!(fetched.username, "octocat");
    }

    #[tokio::test]
    async fn revoke_twice_yields_conflict() {
        let db = test_db().await;
        let now = Utc::now();
        let user = db
            .upsert_user(&User {
                id: Uuid::nil(),
                upstream_id: 1,
                username: "a".into(),
                email: None,
                role: Role::User,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("user");
        let credential = UpstreamCredential {
            id: Uuid::new_v4(),
            user_id: user.id,
            access_ciphertext: "x".into(),
            refresh_ciphertext: "y".into(),
            access_expires_at: now,
            refresh_expires_at: now,
            scopes: String::new(),
            created_at: now,
            updated_at: now,
        };
        db.upsert_upstream_credential(&credential).await.expect("cred");
        let token = ProxyToken {
            id: Uuid::new_v4(),
            token_hash: "hash1".into(),
            token_prefix: "ghp_1234".into(),
            user_id: user.id,
            upstream_credential_id: credential.id,
            repository: "acme/widget".into(),
            scopes: ScopeMap::new(),
            session_label: "s".into(),
            expires_at: now + chrono::Duration::hours(1),
            revoked_at: None,
            last_used_at: None,
            request_count: 0,
            created_at: now,
        };
        db.create_proxy_token(&token).await.expect("create");
        db.revoke_proxy_token(token.id).await.expect("first revoke");
        assert!(db.revoke_proxy_token(token.id).await.is_err());
    }
}
