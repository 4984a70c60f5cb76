//! Secret-at-rest encryption for `UpstreamConfig.api_key`.
//!
//! AES-256-GCM with a random 12-byte nonce per value, same AEAD shape as the
//! original token store this was grounded on, but the key itself is a
//! random-once 32-byte blob in a sidecar file rather than derived from
//! machine identity — a relocatable database file should not be bricked by
//! a lost machine fingerprint.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;
use std::path::Path;

use crate::error::AppError;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

pub struct EncryptionKey(Box<[u8; KEY_LEN]>);

impl EncryptionKey {
    /// Load the key from `path`, generating and persisting a fresh random
    /// key on first start. Fails fast (fatal per §7) if the file exists but
    /// is unreadable or malformed, or if it cannot be created.
    pub fn load_or_create(path: &Path) -> Result<Self, AppError> {
        if path.exists() {
            let bytes = std::fs::read(path)?;
            if bytes.len() != KEY_LEN {
                return Err(AppError::Internal(format!(
                    "encryption key at {} has unexpected length {} (want {KEY_LEN})",
                    path.display(),
                    bytes.len()
                )));
            }
            let mut key = [0u8; KEY_LEN];
            key.copy_from_slice(&bytes);
            return Ok(Self(Box::new(key)));
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        std::fs::write(path, key)?;
        set_restrictive_permissions(path)?;
        tracing::info!(path = %path.display(), "generated new encryption key");
        Ok(Self(Box::new(key)))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.0.as_ref()))
    }

    /// Encrypts `plaintext`, returning `(ciphertext, nonce)` for storage as
    /// two sibling BLOB columns.
    pub fn encrypt(&self, plaintext: &str) -> Result<(Vec<u8>, Vec<u8>), AppError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher()
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| AppError::Internal("encryption failure".to_string()))?;
        Ok((ciphertext, nonce_bytes.to_vec()))
    }

    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<String, AppError> {
        if nonce.len() != NONCE_LEN {
            return Err(AppError::Internal("malformed nonce".to_string()));
        }
        let plaintext = self
            .cipher()
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| AppError::Internal("decryption failure".to_string()))?;
        String::from_utf8(plaintext).map_err(|_| AppError::Internal("non-utf8 secret".to_string()))
    }
}

#[cfg(unix)]
fn set_restrictive_permissions(path: &Path) -> Result<(), AppError> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_restrictive_permissions(_path: &Path) -> Result<(), AppError> {
    Ok(())
}

/// Masks a secret for `list()` output: first 4 + last 4 characters, the
/// rest replaced with stars. Short secrets are masked entirely.
pub fn mask_secret(secret: &str) -> String {
    let len = secret.chars().count();
    if len <= 8 {
        return "*".repeat(len.max(4));
    }
    let chars: Vec<char> = secret.chars().collect();
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[len - 4..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(len - 8))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trip_encryption() {
        let dir = tempdir().unwrap();
        let key = EncryptionKey::load_or_create(&dir.path().join(".encryption_key")).unwrap();
        let (ct, nonce) = key.encrypt("sk-super-secret").unwrap();
        assert_ne!(ct, b"sk-super-secret");
        let plain = key.decrypt(&ct, &nonce).unwrap();
        assert_eq!(plain, "sk-super-secret");
    }

    #[test]
    fn key_persists_across_loads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".encryption_key");
        let key1 = EncryptionKey::load_or_create(&path).unwrap();
        let (ct, nonce) = key1.encrypt("hello").unwrap();
        let key2 = EncryptionKey::load_or_create(&path).unwrap();
        assert_eq!(key2.decrypt(&ct, &nonce).unwrap(), "hello");
    }

    #[test]
    fn nonces_differ_between_encryptions() {
        let dir = tempdir().unwrap();
        let key = EncryptionKey::load_or_create(&dir.path().join(".encryption_key")).unwrap();
        let (ct1, nonce1) = key.encrypt("same plaintext").unwrap();
        let (ct2, nonce2) = key.encrypt("same plaintext").unwrap();
        assert_ne!(nonce1, nonce2);
        assert_ne!(ct1, ct2);
    }

    #[test]
    fn mask_keeps_head_and_tail() {
        assert_eq!(mask_secret("sk-abcdefghij"), "sk-a*****ghij");
        assert_eq!(mask_secret("short"), "*****");
    }
}
