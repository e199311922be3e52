use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::aes;
use crate::error::{AppError, Result};
use crate::services::keys::KeyManager;

/// The size of the random per-envelope salt in bytes.
pub const SALT_SIZE: usize = 64;
/// PBKDF2-HMAC-SHA512 iteration count for working-key derivation.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// A recoverable ciphertext envelope.
///
/// Immutable once produced: re-encryption emits a new envelope under the
/// then-current key and never mutates the old one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// AES-256-GCM ciphertext (tag stored separately).
    pub ciphertext: Vec<u8>,
    /// The 96-bit GCM IV.
    pub iv: [u8; aes::NONCE_SIZE],
    /// The 128-bit GCM authentication tag.
    pub auth_tag: [u8; aes::TAG_SIZE],
    /// The encryption key this envelope was sealed under.
    pub key_id: Uuid,
    /// The 512-bit salt fed to the working-key derivation.
    pub salt: Vec<u8>,
}

/// Derives the 256-bit working key from stored key material and a salt.
fn derive_working_key(key_material: &[u8; aes::KEY_SIZE], salt: &[u8]) -> Zeroizing<[u8; aes::KEY_SIZE]> {
    let mut working_key = [0u8; aes::KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha512>(key_material, salt, PBKDF2_ITERATIONS, &mut working_key);
    Zeroizing::new(working_key)
}

/// Seals a plaintext into an envelope under the given key material.
///
/// CPU-bound (PBKDF2); callers on the async runtime should go through
/// [`EnvelopeService::encrypt`], which moves this off the scheduler threads.
pub fn seal(
    key_id: Uuid,
    key_material: &[u8; aes::KEY_SIZE],
    plaintext: &[u8],
) -> Result<EncryptedEnvelope> {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);

    let working_key = derive_working_key(key_material, &salt);
    let (combined, iv) = aes::encrypt(&working_key, plaintext)?;
    let (ciphertext, auth_tag) = aes::split_tag(&combined)?;

    Ok(EncryptedEnvelope {
        ciphertext,
        iv,
        auth_tag,
        key_id,
        salt: salt.to_vec(),
    })
}

/// Opens an envelope under the given key material.
///
/// Fails closed: any tamper of ciphertext, IV, tag or salt yields
/// `AppError::Encryption` and no plaintext.
pub fn open(
    key_material: &[u8; aes::KEY_SIZE],
    envelope: &EncryptedEnvelope,
) -> Result<Zeroizing<Vec<u8>>> {
    let working_key = derive_working_key(key_material, &envelope.salt);
    let combined = aes::join_tag(&envelope.ciphertext, &envelope.auth_tag);
    aes::decrypt(&working_key, &combined, &envelope.iv).map(Zeroizing::new)
}

/// Envelope encryption over key-manager-owned keys.
///
/// Envelopes are always opened under the key they name (`key_id`), so a key
/// rotation never strands live ciphertext; only key purging does.
#[derive(Clone)]
pub struct EnvelopeService {
    keys: KeyManager,
}

impl EnvelopeService {
    /// Creates a new `EnvelopeService` on top of a key manager.
    pub fn new(keys: KeyManager) -> Self {
        Self { keys }
    }

    /// Encrypts a secret string into an envelope under the current key.
    pub async fn encrypt(&self, plaintext: &str) -> Result<EncryptedEnvelope> {
        let (key_id, key_material) = self.keys.get_active_key().await?;
        let plaintext = Zeroizing::new(plaintext.as_bytes().to_vec());

        tokio::task::spawn_blocking(move || seal(key_id, &key_material, &plaintext))
            .await
            .map_err(|e| AppError::Internal(format!("KDF worker failed: {}", e)))?
    }

    /// Decrypts an envelope back into the secret string.
    pub async fn decrypt(&self, envelope: &EncryptedEnvelope) -> Result<Zeroizing<String>> {
        let key_material = self.keys.get_key_by_id(envelope.key_id).await?;
        let envelope = envelope.clone();

        let plaintext = tokio::task::spawn_blocking(move || open(&key_material, &envelope))
            .await
            .map_err(|e| AppError::Internal(format!("KDF worker failed: {}", e)))??;

        String::from_utf8(plaintext.to_vec())
            .map(Zeroizing::new)
            .map_err(|_| AppError::Encryption("Decrypted payload is not valid UTF-8".to_string()))
    }

    /// Re-encrypts an envelope under the now-current key. Used to migrate
    /// ciphertext onto new keys; the input envelope is left untouched.
    pub async fn reencrypt(&self, envelope: &EncryptedEnvelope) -> Result<EncryptedEnvelope> {
        let plaintext = self.decrypt(envelope).await?;
        self.encrypt(&plaintext).await
    }

    /// Whether the envelope was sealed under the current key. Compares key
    /// ids only; never decrypts.
    pub async fn is_current_key(&self, envelope: &EncryptedEnvelope) -> Result<bool> {
        let (current_id, _) = self.keys.get_active_key().await?;
        Ok(current_id == envelope.key_id)
    }
}
