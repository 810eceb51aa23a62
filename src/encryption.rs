//! Encryption at rest for `Cast::Encrypted` attributes.
//!
//! Each value gets its own random salt and nonce. The cipher key is derived from
//! the configured application key with HKDF-SHA256 over that salt, and the
//! stored form is `base64(salt || nonce || ciphertext)`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, KeyInit};
use hkdf::Hkdf;
use quarry_core::{QuarryError, Result};
use sha2::Sha256;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const INFO: &[u8] = b"quarry-attribute-encryption-v1";

/// Symmetric encrypter keyed by the application's encryption key.
#[derive(Clone)]
pub struct Encrypter {
    key: Vec<u8>,
}

impl std::fmt::Debug for Encrypter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encrypter").finish_non_exhaustive()
    }
}

impl Encrypter {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    fn cipher(&self, salt: &[u8]) -> Result<ChaCha20Poly1305> {
        let hk = Hkdf::<Sha256>::new(Some(salt), &self.key);
        let mut derived = [0u8; 32];
        hk.expand(INFO, &mut derived)
            .map_err(|e| QuarryError::Configuration(format!("key derivation failed: {e}")))?;
        ChaCha20Poly1305::new_from_slice(&derived)
            .map_err(|e| QuarryError::Configuration(format!("invalid derived key: {e}")))
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let salt: [u8; SALT_LEN] = rand::random();
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let nonce = chacha20poly1305::Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher(&salt)?
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| QuarryError::Decryption("encryption failed".into()))?;

        let mut payload = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&salt);
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(payload))
    }

    pub fn decrypt(&self, payload: &str) -> Result<String> {
        let data = BASE64
            .decode(payload.trim())
            .map_err(|e| QuarryError::Decryption(format!("payload is not base64: {e}")))?;
        if data.len() < SALT_LEN + NONCE_LEN {
            return Err(QuarryError::Decryption("payload too short".into()));
        }
        let (salt, rest) = data.split_at(SALT_LEN);
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);
        let nonce = chacha20poly1305::Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher(salt)?
            .decrypt(nonce, ciphertext)
            .map_err(|_| QuarryError::Decryption("authentication failed".into()))?;
        String::from_utf8(plaintext)
            .map_err(|e| QuarryError::Decryption(format!("plaintext is not UTF-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_is_randomized() {
        let enc = Encrypter::new(b"app-key".to_vec());
        let a = enc.encrypt("4111 1111 1111 1111").unwrap();
        let b = enc.encrypt("4111 1111 1111 1111").unwrap();
        assert_ne!(a, b);
        assert_eq!(enc.decrypt(&a).unwrap(), "4111 1111 1111 1111");
        assert_eq!(enc.decrypt(&b).unwrap(), "4111 1111 1111 1111");
    }

    #[test]
    fn test_wrong_key_fails() {
        let payload = Encrypter::new(b"one".to_vec()).encrypt("secret").unwrap();
        let err = Encrypter::new(b"two".to_vec()).decrypt(&payload).unwrap_err();
        assert!(matches!(err, QuarryError::Decryption(_)));
    }

    #[test]
    fn test_garbage_payload() {
        let enc = Encrypter::new(b"k".to_vec());
        assert!(enc.decrypt("not base64!").is_err());
        assert!(enc.decrypt("c2hvcnQ=").is_err());
    }
}
