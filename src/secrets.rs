//! Sealing of buyer credentials stored alongside an order.
//!
//! The payload is AES-256-GCM with a key derived through HKDF-SHA256 from
//! `PAYLOAD_ENCRYPTION_KEY`. The order reference is bound as associated
//! data, so a sealed payload cannot be replayed onto another order.
//! Stored form: `v1:` + base64(nonce || ciphertext).

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hkdf::Hkdf;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

const SEALED_PREFIX: &str = "v1:";
const NONCE_LEN: usize = 12;
const HKDF_SALT: &[u8] = b"vpn-panel-provisioning-payload";
const HKDF_INFO: &[u8] = b"aes-256-gcm-v1";

/// Credentials the buyer chose before paying.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftCredentials {
    pub username: String,
    /// Only present for plain-shell accounts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl fmt::Debug for DraftCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DraftCredentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SealError {
    #[error("Key derivation failed")]
    KeyDerivation,

    #[error("Encryption failed")]
    Encrypt,

    #[error("Sealed payload is malformed")]
    Malformed,

    #[error("Sealed payload failed authentication")]
    Authentication,
}

/// Seals and opens [`DraftCredentials`].
#[derive(Clone)]
pub struct PayloadSealer {
    cipher: Aes256Gcm,
}

impl fmt::Debug for PayloadSealer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadSealer").finish_non_exhaustive()
    }
}

impl PayloadSealer {
    pub fn new(master_key: &SecretString) -> Result<Self, SealError> {
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), master_key.expose_secret().as_bytes());
        let mut okm = [0u8; 32];
        hk.expand(HKDF_INFO, &mut okm)
            .map_err(|_| SealError::KeyDerivation)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&okm));
        Ok(Self { cipher })
    }

    pub fn seal(&self, reference: &str, draft: &DraftCredentials) -> Result<String, SealError> {
        let plaintext = serde_json::to_vec(draft).map_err(|_| SealError::Encrypt)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: &plaintext,
                    aad: reference.as_bytes(),
                },
            )
            .map_err(|_| SealError::Encrypt)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(format!("{SEALED_PREFIX}{}", STANDARD.encode(blob)))
    }

    pub fn open(&self, reference: &str, sealed: &str) -> Result<DraftCredentials, SealError> {
        let encoded = sealed
            .strip_prefix(SEALED_PREFIX)
            .ok_or(SealError::Malformed)?;
        let blob = STANDARD.decode(encoded).map_err(|_| SealError::Malformed)?;
        if blob.len() <= NONCE_LEN {
            return Err(SealError::Malformed);
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);

        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: reference.as_bytes(),
                },
            )
            .map_err(|_| SealError::Authentication)?;

        serde_json::from_slice(&plaintext).map_err(|_| SealError::Malformed)
    }
}
