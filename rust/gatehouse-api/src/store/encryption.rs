//! Encryption at rest for sensitive fields.
//!
//! Provider API keys and other secrets are sealed with AES-256-GCM before
//! they hit SQLite. The 32-byte key is derived from a configured passphrase
//! with SHA-256; each encryption uses a fresh random nonce prepended to the
//! ciphertext, and the whole blob is base64-encoded. Rotation decrypts with
//! the old key and re-seals with the new one.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Nonce size for AES-GCM.
const NONCE_SIZE: usize = 12;

/// Sentinel plaintext stored encrypted in settings to detect a wrong
/// passphrase at startup instead of on first provider use.
pub const KEY_CHECK_PLAINTEXT: &str = "gatehouse-key-check";

/// Seals and opens sensitive strings with a passphrase-derived key.
#[derive(Clone)]
pub struct SecretBox {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBox").field("cipher", &"<sealed>").finish()
    }
}

impl SecretBox {
    /// Derive the AES-256 key from a passphrase.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let key: [u8; 32] = Sha256::digest(passphrase.as_bytes()).into();
        Self {
            cipher: Aes256Gcm::new(&key.into()),
        }
    }

    /// Build from an already-derived raw key (cluster key broadcast).
    pub fn from_key(key: [u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(&key.into()),
        }
    }

    /// The derived key bytes, for broadcasting to peers after rotation.
    pub fn derive_key(passphrase: &str) -> [u8; 32] {
        Sha256::digest(passphrase.as_bytes()).into()
    }

    /// Encrypt a plaintext. Output is base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("encryption failed: {e}"))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(combined))
    }

    /// Decrypt a base64(nonce || ciphertext) blob.
    pub fn decrypt(&self, encrypted: &str) -> Result<String> {
        let combined = general_purpose::STANDARD
            .decode(encrypted)
            .context("invalid base64")?;
        if combined.len() < NONCE_SIZE {
            anyhow::bail!("invalid encrypted data: too short");
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow::anyhow!("decryption failed: {e}"))?;
        String::from_utf8(plaintext).context("invalid UTF-8 in decrypted data")
    }
}
