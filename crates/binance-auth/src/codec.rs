//! Secret-at-rest encryption
//!
//! `SecretCodec` is the seam the credential store encrypts through.
//! `AesGcmCodec` is the platform implementation: AES-256-GCM with a key kept
//! in a local owner-only key file. Output layout is `nonce (12 bytes) ||
//! ciphertext+tag`.

use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngExt;
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::prefs::write_atomic;

const KEY_BYTES: usize = 32;
const NONCE_BYTES: usize = 12;

/// Encrypts and decrypts individual secret strings.
pub trait SecretCodec: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<String>;
}

/// AES-256-GCM codec with a random nonce per encryption.
pub struct AesGcmCodec {
    cipher: Aes256Gcm,
}

impl AesGcmCodec {
    /// Build a codec from raw key bytes. The key must be exactly 32 bytes.
    pub fn from_key(key: &[u8]) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| Error::Key(format!("expected {KEY_BYTES} bytes, got {}", key.len())))?;
        Ok(Self { cipher })
    }

    /// Build a codec with a fresh random key that is never persisted.
    pub fn ephemeral() -> Self {
        let mut key = [0u8; KEY_BYTES];
        rand::rng().fill(&mut key);
        Self {
            cipher: Aes256Gcm::new(&key.into()),
        }
    }

    /// Load the key from `path`, creating it on first use.
    ///
    /// A newly created key file is written atomically with 0600 permissions.
    /// A key file of the wrong length is replaced with a new key. Losing or
    /// replacing the key makes previously stored tokens undecryptable, which
    /// the credential store treats as "signed out".
    pub async fn from_key_file(path: &Path) -> Result<Self> {
        if path.exists() {
            let key = tokio::fs::read(path)
                .await
                .map_err(|e| Error::Io(format!("reading key file: {e}")))?;
            match Self::from_key(&key) {
                Ok(codec) => return Ok(codec),
                Err(e) => error!(
                    path = %path.display(),
                    error = %e,
                    "key file is unusable, generating a new key"
                ),
            }
        }

        let mut key = [0u8; KEY_BYTES];
        rand::rng().fill(&mut key);
        write_atomic(path, &key).await?;
        info!(path = %path.display(), "created new secret key file");
        Self::from_key(&key)
    }
}

impl SecretCodec for AesGcmCodec {
    fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_BYTES];
        rand::rng().fill(&mut nonce);

        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| Error::Encrypt("AES-GCM seal failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_BYTES + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<String> {
        if ciphertext.len() < NONCE_BYTES {
            return Err(Error::Decrypt(format!(
                "ciphertext too short ({} bytes)",
                ciphertext.len()
            )));
        }
        let (nonce, sealed) = ciphertext.split_at(NONCE_BYTES);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| Error::Decrypt("authentication tag mismatch".into()))?;

        String::from_utf8(plaintext).map_err(|e| Error::Decrypt(format!("not UTF-8: {e}")))
    }
}
