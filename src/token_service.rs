// ABOUTME: Token minting, scope-string parsing, and hash-based resolution
// ABOUTME: The wire format is a fixed prefix plus a base62 body; resolution is hash-first
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Token service
//!
//! Owns format discipline (`ghp_` + 43-char base62 body), duration
//! enforcement, and hash-based lookup. Plaintext is returned to the caller
//! exactly once, at creation time; every other code path only ever sees the
//! hash.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::{ProxyToken, ScopeMap};
use crate::persistence::Persistence;

pub const TOKEN_PREFIX: &str = "ghp_";
const BODY_LEN: usize = 43;
const RANDOM_BYTES: usize = 32;
const BASE62_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Request to mint a new proxy token.
pub struct CreateTokenRequest {
    pub user_id: Uuid,
    pub upstream_credential_id: Uuid,
    pub repository: String,
    pub scopes: ScopeMap,
    pub duration: Duration,
    pub session_label: String,
}

/// Result of a successful [`TokenService::create`] call: the plaintext is
/// surfaced exactly once, alongside the row that was persisted.
pub struct CreatedToken {
    pub plaintext: String,
    pub row: ProxyToken,
}

/// Encodes 32 random bytes as a fixed-width, left-zero-padded base62 string.
fn random_base62_body() -> String {
    let mut bytes = [0u8; RANDOM_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);

    let mut value = num_from_bytes(&bytes);
    let mut digits = Vec::with_capacity(BODY_LEN);
    if value.iter().all(|&limb| limb == 0) {
        digits.push(BASE62_ALPHABET[0]);
    }
    while !value.iter().all(|&limb| limb == 0) {
        let remainder = div_mod_62(&mut value);
        digits.push(BASE62_ALPHABET[remainder as usize]);
    }
    while digits.len() < BODY_LEN {
        digits.push(BASE62_ALPHABET[0]);
    }
    digits.reverse();
    if digits.len() > BODY_LEN {
        let overflow = digits.len() - BODY_LEN;
        digits.drain(0..overflow);
    }
    String::from_utf8(digits).expect("base62 alphabet is ascii")
}

/// Treats the byte slice as a big-endian arbitrary-precision integer,
/// represented as 32-bit limbs (most significant first).
fn num_from_bytes(bytes: &[u8]) -> Vec<u32> {
    bytes.chunks(4).map(|chunk| {
        let mut padded = [0u8; 4];
        padded[4 - chunk.len()..].copy_from_slice(chunk);
        u32::from_be_bytes(padded)
    }).collect()
}

/// Divides the big-endian limb vector by 62 in place, returning the remainder.
fn div_mod_62(value: &mut [u32]) -> u32 {
    let mut remainder: u64 = 0;
    for limb in value.iter_mut() {
        let acc = (remainder << 32) | u64::from(*limb);
        *limb = (acc / 62) as u32;
        remainder = acc % 62;
    }
    remainder as u32
}

fn sha256_hex(plaintext: &str) -> String {
    let digest = Sha256::digest(plaintext.as_bytes());
    hex::encode(digest)
}

/// Parse a `"a:b, c:d"` scope string into a [`ScopeMap`].
///
/// # Errors
/// Returns `AppError::InvalidInput` if any segment does not match
/// `word:level` with `level` in `{read, write}`, or if the result is empty.
pub fn parse_scopes(raw: &str) -> AppResult<ScopeMap> {
    let mut map = ScopeMap::new();
    for segment in raw.split(',') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let (permission, level) = segment
            .split_once(':')
            .ok_or_else(|| AppError::invalid_input(format!("malformed scope segment: {segment}")))?;
        let permission = permission.trim();
        let level = level.trim();
        if permission.is_empty() || !permission.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(AppError::invalid_input(format!("malformed scope segment: {segment}")));
        }
        let level: crate::models::ScopeLevel = level
            .parse()
            .map_err(|()| AppError::invalid_input(format!("unknown scope level in: {segment}")))?;
        map.insert(permission.to_string(), level);
    }
    if map.is_empty() {
        return Err(AppError::invalid_input("scopes must not be empty"));
    }
    Ok(map)
}

/// Token minting and resolution against a [`Persistence`] backend.
pub struct TokenService {
    persistence: Arc<dyn Persistence>,
    max_duration: Duration,
}

impl TokenService {
    #[must_use]
    pub fn new(persistence: Arc<dyn Persistence>, max_duration: Duration) -> Self {
        Self {
            persistence,
            max_duration,
        }
    }

    /// Mint and persist a new token, returning its plaintext exactly once.
    ///
    /// # Errors
    /// `InvalidInput` if `repository`/`scopes` are empty or `duration` is
    /// non-positive or exceeds the configured maximum.
    pub async fn create(&self, request: CreateTokenRequest) -> AppResult<CreatedToken> {
        if request.repository.trim().is_empty() {
            return Err(AppError::invalid_input("repository must not be empty"));
        }
        if request.scopes.is_empty() {
            return Err(AppError::invalid_input("scopes must not be empty"));
        }
        if request.duration <= Duration::zero() {
            return Err(AppError::invalid_input("duration must be positive"));
        }
        if request.duration > self.max_duration {
            return Err(AppError::invalid_input("duration exceeds maximum allowed"));
        }

        let plaintext = format!("{TOKEN_PREFIX}{}", random_base62_body());
        let hash = sha256_hex(&plaintext);
        let prefix = plaintext.chars().take(8).collect::<String>();
        let now = Utc::now();

        let row = ProxyToken {
            id: Uuid::new_v4(),
            token_hash: hash,
            token_prefix: prefix,
            user_id: request.user_id,
            upstream_credential_id: request.upstream_credential_id,
            repository: request.repository,
            scopes: request.scopes,
            session_label: request.session_label,
            expires_at: now + request.duration,
            revoked_at: None,
            last_used_at: None,
            request_count: 0,
            created_at: now,
        };

        self.persistence.create_proxy_token(&row).await?;
        Ok(CreatedToken {
            plaintext,
            row,
        })
    }

    /// Resolve a plaintext token to its stored row.
    ///
    /// Order: prefix check, then hash lookup, then revoked/expired checks
    /// against the row that was found.
    ///
    /// # Errors
    /// `Unauthorized` if the prefix is wrong, the hash is unknown, the token
    /// was revoked, or the token has expired.
    pub async fn resolve(&self, plaintext: &str) -> AppResult<ProxyToken> {
        if !plaintext.starts_with(TOKEN_PREFIX) {
            return Err(AppError::unauthorized("invalid token prefix"));
        }
        let hash = sha256_hex(plaintext);
        let row = self
            .persistence
            .get_proxy_token_by_hash(&hash)
            .await?
            .ok_or_else(|| AppError::unauthorized("unknown token"))?;
        if row.revoked_at.is_some() {
            return Err(AppError::unauthorized("token revoked"));
        }
        if Utc::now() >= row.expires_at {
            return Err(AppError::unauthorized("token expired"));
        }
        Ok(row)
    }

    /// # Errors
    /// Propagates whatever the backend returns (`NotFound`/`Conflict` on
    /// a second revoke, per the persistence contract).
    pub async fn revoke(&self, id: Uuid) -> AppResult<()> {
        self.persistence.revoke_proxy_token(id).await
    }

    /// # Errors
    /// Propagates persistence failures; a missing row is silently ignored
    /// by the backend (best-effort bookkeeping).
    pub async fn record_usage(&self, id: Uuid) -> AppResult<()> {
        self.persistence.update_proxy_token_usage(id).await
    }
}
