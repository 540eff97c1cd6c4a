use crate::error::{CoreError, Result};
use rand::{rngs::OsRng, RngCore};

// ChaCha20Poly1305 for authenticated encryption
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};

const SALT_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;

/// Seal a secret key under the operator passphrase.
/// Blob layout: salt || nonce || ciphertext.
pub fn seal_key(secret: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);

    let key = derive_key(passphrase, &salt);
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let cipher = ChaCha20Poly1305::new(&key);

    let ciphertext = cipher
        .encrypt(&nonce, secret)
        .map_err(|e| CoreError::crypto(format!("Encryption failed: {}", e)))?;

    let mut sealed = Vec::with_capacity(SALT_SIZE + NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&salt);
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);

    Ok(sealed)
}

/// Recover a secret key sealed by `seal_key`. Fails on a wrong passphrase
/// or tampered blob; the AEAD tag covers both.
pub fn open_key(sealed: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    if sealed.len() < SALT_SIZE + NONCE_SIZE {
        return Err(CoreError::crypto("Sealed key is truncated"));
    }

    let (salt, rest) = sealed.split_at(SALT_SIZE);
    let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);

    let key = derive_key(passphrase, salt);
    let cipher = ChaCha20Poly1305::new(&key);

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CoreError::crypto("Failed to decrypt escrow key"))
}

/// Derive encryption key from passphrase using PBKDF2
fn derive_key(passphrase: &str, salt: &[u8]) -> Key {
    use pbkdf2::pbkdf2_hmac;
    use sha2::Sha256;

    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, 100_000, &mut key);
    *Key::from_slice(&key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let secret = b"thirty-two bytes of key material";
        let passphrase = "test_passphrase_123";

        let sealed = seal_key(secret, passphrase).unwrap();
        let opened = open_key(&sealed, passphrase).unwrap();

        assert_eq!(secret, opened.as_slice());
    }

    #[test]
    fn test_wrong_passphrase() {
        let secret = b"thirty-two bytes of key material";

        let sealed = seal_key(secret, "right_passphrase").unwrap();
        let result = open_key(&sealed, "wrong_passphrase");

        assert!(result.is_err());
    }

    #[test]
    fn test_truncated_blob_rejected() {
        let sealed = seal_key(b"secret", "passphrase").unwrap();
        assert!(open_key(&sealed[..SALT_SIZE + NONCE_SIZE - 1], "passphrase").is_err());
    }

    #[test]
    fn test_fresh_salt_and_nonce_per_seal() {
        let secret = b"same secret";
        let passphrase = "passphrase";

        let first = seal_key(secret, passphrase).unwrap();
        let second = seal_key(secret, passphrase).unwrap();

        assert_ne!(first, second);
    }
}
