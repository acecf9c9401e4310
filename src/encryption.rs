//! Field-level encryption for data at rest.
//!
//! AES-256-GCM with a persisted key file. Every sensitive column and flat
//! log line goes through [`Cipher`] before touching disk.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use rand::rngs::OsRng;
use rand::TryRngCore;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;

use crate::errors::{VaultError, VaultResult};

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// GCM nonce size in bytes (96-bit).
pub const NONCE_SIZE: usize = 12;

/// Placeholder returned by [`Cipher::decrypt_lossy`] for tokens that fail
/// authentication or are malformed, so one corrupted field never aborts a
/// bulk read.
pub const DECRYPTION_ERROR_MARKER: &str = "[DECRYPTION ERROR]";

/// Generate a new random 256-bit key.
pub fn generate_key() -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    let mut rng = OsRng;

    // If OsRng fails here, the environment is badly broken → hard panic is acceptable.
    rng.try_fill_bytes(&mut key)
        .expect("OsRng failed to generate encryption key");

    key
}

/// Symmetric cipher bound to a persisted key file.
///
/// Loss of the key file makes all encrypted data permanently unrecoverable.
/// That is an accepted trade-off, not a bug.
#[derive(Clone)]
pub struct Cipher {
    cipher: Aes256Gcm,
    key_path: PathBuf,
}

impl Cipher {
    /// Load the key from `key_path`, or generate and persist one before any
    /// encryption takes place.
    pub fn load_or_generate(key_path: impl AsRef<Path>) -> VaultResult<Self> {
        let key_path = key_path.as_ref().to_path_buf();

        let key_bytes: Vec<u8> = if key_path.exists() {
            let bytes = fs::read(&key_path)?;
            if bytes.len() != KEY_SIZE {
                return Err(VaultError::Encryption(format!(
                    "key file {} is corrupt: expected {} bytes, got {}",
                    key_path.display(),
                    KEY_SIZE,
                    bytes.len()
                )));
            }
            bytes
        } else {
            let key = generate_key();
            fs::write(&key_path, key)?;
            key.to_vec()
        };

        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
            key_path,
        })
    }

    /// Encrypt a string into a storable token.
    ///
    /// Token format: `base64( [nonce (12 bytes)] || [ciphertext+tag] )`,
    /// with a fresh random nonce per call.
    pub fn encrypt(&self, plaintext: &str) -> VaultResult<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        let mut rng = OsRng;
        rng.try_fill_bytes(&mut nonce_bytes)
            .expect("OsRng failed to generate nonce");
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| VaultError::Encryption(format!("encryption failed: {e}")))?;

        let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        output.extend_from_slice(&nonce_bytes);
        output.append(&mut ciphertext);

        Ok(B64.encode(output))
    }

    /// `None` passes through untouched so optional columns stay NULL.
    pub fn encrypt_opt(&self, plaintext: Option<&str>) -> VaultResult<Option<String>> {
        match plaintext {
            Some(s) => Ok(Some(self.encrypt(s)?)),
            None => Ok(None),
        }
    }

    /// Strict decryption of a token produced by [`Cipher::encrypt`].
    pub fn decrypt(&self, token: &str) -> VaultResult<String> {
        let decoded = B64
            .decode(token)
            .map_err(|e| VaultError::Decryption(format!("base64 decode failed: {e}")))?;

        if decoded.len() <= NONCE_SIZE {
            return Err(VaultError::Decryption("ciphertext too short".to_string()));
        }

        let (nonce_bytes, ct) = decoded.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ct)
            .map_err(|e| VaultError::Decryption(format!("decryption failed: {e}")))?;

        String::from_utf8(plaintext)
            .map_err(|e| VaultError::Decryption(format!("invalid utf-8 in plaintext: {e}")))
    }

    /// Decryption for bulk reads: a damaged token yields the
    /// [`DECRYPTION_ERROR_MARKER`] sentinel instead of an error.
    pub fn decrypt_lossy(&self, token: &str) -> String {
        self.decrypt(token)
            .unwrap_or_else(|_| DECRYPTION_ERROR_MARKER.to_string())
    }

    /// Path of the backing key file.
    pub fn key_path(&self) -> &Path {
        &self.key_path
    }
}

/// Destructively erase a key file for deliberate data-shredding scenarios.
///
/// The file is overwritten with random bytes and fsynced before deletion.
/// Every token encrypted under the key becomes unrecoverable; the next
/// [`Cipher::load_or_generate`] starts over with a fresh key.
pub fn shred_key(key_path: &Path) -> VaultResult<()> {
    if !key_path.exists() {
        return Ok(());
    }

    let size = fs::metadata(key_path)?.len() as usize;
    let mut garbage = vec![0u8; size];
    let mut rng = OsRng;
    rng.try_fill_bytes(&mut garbage)
        .expect("OsRng failed to generate shred pattern");

    let mut file = fs::OpenOptions::new().write(true).open(key_path)?;
    file.write_all(&garbage)?;
    file.sync_all()?;
    drop(file);

    fs::remove_file(key_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_cipher(dir: &tempfile::TempDir) -> Cipher {
        Cipher::load_or_generate(dir.path().join("vault.key")).expect("cipher init")
    }

    #[test]
    fn round_trip_encrypt_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let cipher = temp_cipher(&dir);

        let token = cipher.encrypt("Jan de Vries").expect("encryption should succeed");
        assert_ne!(token, "Jan de Vries", "ciphertext must differ from plaintext");

        let plain = cipher.decrypt(&token).expect("decryption should succeed");
        assert_eq!(plain, "Jan de Vries");
    }

    #[test]
    fn round_trip_empty_string() {
        let dir = tempfile::tempdir().unwrap();
        let cipher = temp_cipher(&dir);

        let token = cipher.encrypt("").unwrap();
        assert_eq!(cipher.decrypt(&token).unwrap(), "");
    }

    #[test]
    fn none_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let cipher = temp_cipher(&dir);

        assert!(cipher.encrypt_opt(None).unwrap().is_none());
        assert!(cipher.encrypt_opt(Some("x")).unwrap().is_some());
    }

    #[test]
    fn key_file_is_persisted_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("vault.key");

        let first = Cipher::load_or_generate(&key_path).unwrap();
        let token = first.encrypt("persistent secret").unwrap();

        // Same key file, fresh cipher instance.
        let second = Cipher::load_or_generate(&key_path).unwrap();
        assert_eq!(second.decrypt(&token).unwrap(), "persistent secret");
    }

    #[test]
    fn tampered_token_fails_strict_and_yields_marker_lossy() {
        let dir = tempfile::tempdir().unwrap();
        let cipher = temp_cipher(&dir);

        let token = cipher.encrypt("sensitive").unwrap();
        let mut bytes = B64.decode(&token).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let tampered = B64.encode(bytes);

        assert!(cipher.decrypt(&tampered).is_err());
        assert_eq!(cipher.decrypt_lossy(&tampered), DECRYPTION_ERROR_MARKER);
        assert_eq!(cipher.decrypt_lossy("not even base64!"), DECRYPTION_ERROR_MARKER);
    }

    #[test]
    fn shred_key_makes_data_unrecoverable() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("vault.key");

        let cipher = Cipher::load_or_generate(&key_path).unwrap();
        let token = cipher.encrypt("doomed").unwrap();

        shred_key(&key_path).unwrap();
        assert!(!key_path.exists());

        let reborn = Cipher::load_or_generate(&key_path).unwrap();
        assert!(reborn.decrypt(&token).is_err());
        assert_eq!(reborn.decrypt_lossy(&token), DECRYPTION_ERROR_MARKER);
    }

    #[test]
    fn rejects_corrupt_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("vault.key");
        fs::write(&key_path, [0u8; 7]).unwrap();

        assert!(Cipher::load_or_generate(&key_path).is_err());
    }
}
