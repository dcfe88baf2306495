//! Encryption at rest for installation credentials.
//!
//! AES-256-GCM with a key derived from the master key via PBKDF2-HMAC-SHA256.
//! The salt is static, so every installation shares one derived key; the
//! per-call random nonce is the only per-secret randomness. The key is
//! re-derived on every call rather than cached.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

/// Size of the derived AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of the AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

const KDF_ITERATIONS: u32 = 100_000;
const KDF_SALT: &[u8] = b"patchpilot-credential-store";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error("decryption failed: authentication tag did not verify")]
    Decryption,
}

/// An encrypted secret with the tag carried separately from the ciphertext,
/// matching how the three pieces are persisted.
#[derive(Debug, Clone)]
pub struct EncryptedSecret {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
    pub tag: [u8; TAG_SIZE],
}

fn derive_key(master_key: &str) -> Zeroizing<[u8; KEY_SIZE]> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    pbkdf2::pbkdf2_hmac::<Sha256>(master_key.as_bytes(), KDF_SALT, KDF_ITERATIONS, key.as_mut());
    key
}

fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

pub fn encrypt(plaintext: &[u8], master_key: &str) -> Result<EncryptedSecret, CryptoError> {
    let derived = derive_key(master_key);
    let key = Key::<Aes256Gcm>::from_slice(derived.as_ref());
    let cipher = Aes256Gcm::new(key);

    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from_slice(&nonce_bytes);

    // aes-gcm appends the 16-byte tag to the ciphertext; store it separately.
    let mut ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    let tag_bytes = ciphertext.split_off(ciphertext.len() - TAG_SIZE);
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&tag_bytes);

    Ok(EncryptedSecret {
        ciphertext,
        nonce: nonce_bytes,
        tag,
    })
}

pub fn decrypt(secret: &EncryptedSecret, master_key: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let derived = derive_key(master_key);
    let key = Key::<Aes256Gcm>::from_slice(derived.as_ref());
    let cipher = Aes256Gcm::new(key);
    let nonce = Nonce::from_slice(&secret.nonce);

    let mut joined = secret.ciphertext.clone();
    joined.extend_from_slice(&secret.tag);

    let plaintext = cipher
        .decrypt(nonce, joined.as_slice())
        .map_err(|_| CryptoError::Decryption)?;

    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER_KEY: &str = "test-master-key";

    #[test]
    fn test_roundtrip() {
        let secret = encrypt(b"sk-ant-api03-abcdef", MASTER_KEY).unwrap();
        let plaintext = decrypt(&secret, MASTER_KEY).unwrap();
        assert_eq!(plaintext.as_slice(), b"sk-ant-api03-abcdef");
    }

    #[test]
    fn test_roundtrip_empty_plaintext() {
        let secret = encrypt(b"", MASTER_KEY).unwrap();
        let plaintext = decrypt(&secret, MASTER_KEY).unwrap();
        assert!(plaintext.is_empty());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let mut secret = encrypt(b"a token that matters", MASTER_KEY).unwrap();
        secret.ciphertext[0] ^= 0x01;
        assert!(decrypt(&secret, MASTER_KEY).is_err());
    }

    #[test]
    fn test_tampered_tag_fails() {
        let mut secret = encrypt(b"a token that matters", MASTER_KEY).unwrap();
        secret.tag[TAG_SIZE - 1] ^= 0x80;
        assert!(decrypt(&secret, MASTER_KEY).is_err());
    }

    #[test]
    fn test_wrong_master_key_fails() {
        let secret = encrypt(b"a token that matters", MASTER_KEY).unwrap();
        assert!(decrypt(&secret, "another-master-key").is_err());
    }

    #[test]
    fn test_nonce_is_unique_per_call() {
        let a = encrypt(b"same plaintext", MASTER_KEY).unwrap();
        let b = encrypt(b"same plaintext", MASTER_KEY).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }
}
