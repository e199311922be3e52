use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, OsRng},
};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{AppError, Result};

/// The size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// The size of the AES-GCM nonce (IV) in bytes.
pub const NONCE_SIZE: usize = 12;
/// The size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// A secure key wrapper that ensures the key is zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecureKey([u8; KEY_SIZE]);

impl SecureKey {
    /// Creates a new `SecureKey` from a byte array.
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self(key)
    }

    /// Returns a reference to the key as a byte slice.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// Generates a new random AES-256 key.
pub fn generate_key() -> SecureKey {
    let mut key = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut key);
    SecureKey::new(key)
}

/// Generates a new random AES-GCM nonce.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypts a plaintext using AES-256-GCM under a fresh random nonce.
///
/// The returned ciphertext carries the 16-byte GCM tag appended at the end;
/// use [`split_tag`] when the tag must be stored in its own column.
pub fn encrypt(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<(Vec<u8>, [u8; NONCE_SIZE])> {
    let cipher = Aes256Gcm::new(key.into());

    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from(nonce_bytes);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| AppError::Encryption(format!("Encryption failed: {}", e)))?;

    Ok((ciphertext, nonce_bytes))
}

/// Decrypts a tag-suffixed ciphertext produced by [`encrypt`].
///
/// Fails closed on any tamper: a single flipped bit in ciphertext, nonce or
/// tag yields an error and no plaintext.
pub fn decrypt(
    key: &[u8; KEY_SIZE],
    ciphertext: &[u8],
    nonce: &[u8; NONCE_SIZE],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.into());
    let nonce = Nonce::from(*nonce);

    cipher
        .decrypt(&nonce, ciphertext)
        .map_err(|e| AppError::Encryption(format!("Decryption failed: {}", e)))
}

/// Splits a combined `ciphertext || tag` buffer into its two parts.
pub fn split_tag(combined: &[u8]) -> Result<(Vec<u8>, [u8; TAG_SIZE])> {
    if combined.len() < TAG_SIZE {
        return Err(AppError::Encryption("Ciphertext too short".to_string()));
    }
    let (body, tag) = combined.split_at(combined.len() - TAG_SIZE);
    let tag: [u8; TAG_SIZE] = tag
        .try_into()
        .map_err(|_| AppError::Encryption("Invalid tag size".to_string()))?;
    Ok((body.to_vec(), tag))
}

/// Rejoins ciphertext and tag into the combined form [`decrypt`] expects.
pub fn join_tag(ciphertext: &[u8], tag: &[u8; TAG_SIZE]) -> Vec<u8> {
    let mut combined = Vec::with_capacity(ciphertext.len() + TAG_SIZE);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);
    combined
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let key = generate_key();
        let (ciphertext, nonce) = encrypt(key.as_bytes(), b"secret-x").unwrap();
        let plaintext = decrypt(key.as_bytes(), &ciphertext, &nonce).unwrap();
        assert_eq!(plaintext, b"secret-x");
    }

    #[test]
    fn tampered_ciphertext_fails_closed() {
        let key = generate_key();
        let (mut ciphertext, nonce) = encrypt(key.as_bytes(), b"secret-x").unwrap();
        ciphertext[0] ^= 0x01;
        assert!(decrypt(key.as_bytes(), &ciphertext, &nonce).is_err());
    }

    #[test]
    fn tampered_nonce_fails_closed() {
        let key = generate_key();
        let (ciphertext, mut nonce) = encrypt(key.as_bytes(), b"secret-x").unwrap();
        nonce[3] ^= 0x10;
        assert!(decrypt(key.as_bytes(), &ciphertext, &nonce).is_err());
    }

    #[test]
    fn wrong_key_fails_closed() {
        let key = generate_key();
        let other = generate_key();
        let (ciphertext, nonce) = encrypt(key.as_bytes(), b"secret-x").unwrap();
        assert!(decrypt(other.as_bytes(), &ciphertext, &nonce).is_err());
    }

    #[test]
    fn split_and_join_tag_round_trip() {
        let key = generate_key();
        let (combined, nonce) = encrypt(key.as_bytes(), b"payload").unwrap();
        let (body, tag) = split_tag(&combined).unwrap();
        assert_eq!(body.len(), combined.len() - TAG_SIZE);

        let rejoined = join_tag(&body, &tag);
        assert_eq!(rejoined, combined);
        assert_eq!(decrypt(key.as_bytes(), &rejoined, &nonce).unwrap(), b"payload");
    }

    #[test]
    fn split_tag_rejects_short_input() {
        assert!(split_tag(&[0u8; 4]).is_err());
    }

    #[test]
    fn tampered_tag_fails_closed() {
        let key = generate_key();
        let (combined, nonce) = encrypt(key.as_bytes(), b"secret-x").unwrap();
        let (body, mut tag) = split_tag(&combined).unwrap();
        tag[15] ^= 0x80;
        let rejoined = join_tag(&body, &tag);
        assert!(decrypt(key.as_bytes(), &rejoined, &nonce).is_err());
    }
}
