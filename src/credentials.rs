//! One-way password hashing and verification.
//!
//! argon2id with a fresh random salt per hash. Passwords are never
//! decryptable; the only operation against a stored hash is comparison.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::errors::{VaultError, VaultResult};

/// Hash a password using argon2id with a random salt.
///
/// Identical passwords never produce identical hashes.
pub fn hash_password(password: &str) -> VaultResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| VaultError::Encryption(format!("password hashing failed: {e}")))?;
    Ok(hash.to_string())
}

/// Verify a password against a stored argon2id hash.
pub fn verify_password(password: &str, stored_hash: &str) -> VaultResult<bool> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| VaultError::Encryption(format!("stored hash is malformed: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SPECIAL: &[u8] = b"!@#$%&";

/// Generate a 12-character temporary password with at least one lowercase,
/// uppercase, digit and special character, for the reset-password flow.
pub fn generate_temp_password() -> String {
    let mut rng = rand::rng();
    let all: Vec<u8> = [LOWER, UPPER, DIGITS, SPECIAL].concat();

    let mut chars = vec![
        LOWER[rng.random_range(0..LOWER.len())],
        UPPER[rng.random_range(0..UPPER.len())],
        DIGITS[rng.random_range(0..DIGITS.len())],
        SPECIAL[rng.random_range(0..SPECIAL.len())],
    ];
    while chars.len() < 12 {
        chars.push(all[rng.random_range(0..all.len())]);
    }
    chars.shuffle(&mut rng);

    String::from_utf8(chars).expect("temp password alphabet is ascii")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() {
        let hash = hash_password("Str0ng_pass!").unwrap();
        assert!(verify_password("Str0ng_pass!", &hash).unwrap());
        assert!(!verify_password("wrong_password", &hash).unwrap());
    }

    #[test]
    fn same_password_different_hashes() {
        let h1 = hash_password("repeatable").unwrap();
        let h2 = hash_password("repeatable").unwrap();
        assert_ne!(h1, h2, "salts must be fresh per hash");
    }

    #[test]
    fn malformed_stored_hash_is_an_error() {
        assert!(verify_password("anything", "not-a-phc-string").is_err());
    }

    #[test]
    fn temp_password_shape() {
        for _ in 0..20 {
            let pw = generate_temp_password();
            assert_eq!(pw.len(), 12);
            assert!(pw.bytes().any(|b| b.is_ascii_lowercase()));
            assert!(pw.bytes().any(|b| b.is_ascii_uppercase()));
            assert!(pw.bytes().any(|b| b.is_ascii_digit()));
            assert!(pw.bytes().any(|b| SPECIAL.contains(&b)));
        }
    }
}
