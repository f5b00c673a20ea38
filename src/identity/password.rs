//! Salted password hashing for the local identity provider.
//!
//! Stored form: `<salt>$<digest>`, both base64 (standard, no padding),
//! where the digest is SHA-256 over the salt followed by the password.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use rand::Rng;
use sha2::{Digest, Sha256};

pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; 16];
    rand::rng().fill(&mut salt);
    format!(
        "{}${}",
        STANDARD_NO_PAD.encode(salt),
        STANDARD_NO_PAD.encode(digest(&salt, password))
    )
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt, expected)) = stored.split_once('$') else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (STANDARD_NO_PAD.decode(salt), STANDARD_NO_PAD.decode(expected))
    else {
        return false;
    };

    let actual = digest(&salt, password);
    // Constant-time compare
    actual.len() == expected.len()
        && actual
            .iter()
            .zip(expected.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

fn digest(salt: &[u8], password: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let stored = hash_password("secret123");
        assert!(verify_password("secret123", &stored));
        assert!(!verify_password("secret124", &stored));
    }

    #[test]
    fn test_same_password_different_salts() {
        assert_ne!(hash_password("secret123"), hash_password("secret123"));
    }

    #[test]
    fn test_malformed_stored_value() {
        assert!(!verify_password("x", ""));
        assert!(!verify_password("x", "no-separator"));
        assert!(!verify_password("x", "!!!$???"));
    }
}
