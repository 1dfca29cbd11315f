// ABOUTME: Authenticated symmetric encryption over a fixed 32-byte key
// ABOUTME: Used to seal upstream OAuth credentials at rest
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Crypto
//!
//! A fixed 256-bit AES-GCM key, supplied hex-encoded at startup. `encrypt`
//! prepends a fresh random 96-bit nonce to the ciphertext and base64-encodes
//! the result; `decrypt` reverses the process. The key is rejected at
//! construction time unless it decodes to exactly 32 bytes.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;

use crate::errors::{AppError, AppResult};

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Authenticated encryption over a fixed key.
#[derive(Clone)]
pub struct Crypto {
    key: [u8; KEY_LEN],
}

impl Crypto {
    /// Construct from a hex-encoded 32-byte key.
    ///
    /// # Errors
    /// Returns `AppError::Internal` if the string is not valid hex or does
    /// not decode to exactly 32 bytes.
    pub fn from_hex(hex_key: &str) -> AppResult<Self> {
        let bytes = hex::decode(hex_key)?;
        if bytes.len() != KEY_LEN {
            return Err(AppError::internal(format!(
                "encryption key must decode to {KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        Ok(Self { key })
    }

    /// Encrypt `plaintext`, returning `base64(nonce ∥ ciphertext ∥ tag)`.
    ///
    /// # Errors
    /// Returns `AppError::Internal` if the underlying AEAD operation fails
    /// (should not happen for valid inputs).
    pub fn encrypt(&self, plaintext: &[u8]) -> AppResult<String> {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&self.key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = GenericArray::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| AppError::internal(format!("encryption failed: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    /// Decrypt a blob produced by [`Crypto::encrypt`].
    ///
    /// # Errors
    /// Returns `AppError::Internal` (`InvalidCiphertext`) if the input is not
    /// valid base64, too short to contain a nonce, or fails tag verification.
    pub fn decrypt(&self, sealed_b64: &str) -> AppResult<Vec<u8>> {
        let sealed = BASE64.decode(sealed_b64)?;
        if sealed.len() < NONCE_LEN {
            return Err(AppError::internal("ciphertext too short"));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&self.key));
        let nonce = GenericArray::from_slice(nonce_bytes);

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| AppError::internal("invalid ciphertext"))
    }

    /// Convenience: encrypt a UTF-8 string.
    pub fn encrypt_str(&self, plaintext: &str) -> AppResult<String> {
        self.encrypt(plaintext.as_bytes())
    }

    /// Convenience: decrypt into a UTF-8 string.
    pub fn decrypt_str(&self, sealed_b64: &str) -> AppResult<String> {
        let bytes = self.decrypt(sealed_b64)?;
        String::from_utf8(bytes).map_err(|_| AppError::internal("decrypted data is not utf-8"))
    }
}
