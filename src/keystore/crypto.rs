//! Machine-derived encryption-at-rest for the keystore's signing keypair.
//!
//! Same envelope shape as OAuth-token-at-rest encryption in assistant
//! clients: a random data-encryption key (DEK) wrapped by a machine-bound
//! key-encryption key (KEK), itself derived from host/user entropy through
//! scrypt. AES-256-GCM-SIV is used for both layers so nonce reuse from a
//! faulty RNG degrades gracefully instead of catastrophically.

use aes_gcm_siv::aead::{Aead, KeyInit};
use aes_gcm_siv::{Aes256GcmSiv, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use rand::RngCore;
use scrypt::{scrypt, Params as ScryptParams};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::KeystoreError;

const KEYSTORE_SALT_LEN: usize = 16;
const KEYSTORE_NONCE_LEN: usize = 12;
const KEYSTORE_KEY_LEN: usize = 32;
/// Domain-separation label mixed into machine-derived key material.
const MACHINE_KEY_CONTEXT: &str = "useaid-keystore-machine-kek-v1";

/// On-disk envelope wrapping a random DEK with a machine-derived KEK.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Base64-encoded KDF salt.
    #[serde(default)]
    pub salt: String,
    /// Base64-encoded nonce used when wrapping the DEK.
    #[serde(default)]
    pub wrapped_dek_nonce: String,
    /// Base64-encoded wrapped DEK ciphertext.
    #[serde(default)]
    pub wrapped_dek_ciphertext: String,
    /// Base64-encoded nonce used for the payload record.
    #[serde(default)]
    pub payload_nonce: String,
    /// Base64-encoded encrypted payload.
    #[serde(default)]
    pub payload_ciphertext: String,
}

/// Encrypt `plaintext` under a fresh machine-bound envelope.
pub fn encrypt_payload(plaintext: &[u8]) -> Result<EncryptedEnvelope, KeystoreError> {
    let mut salt = [0u8; KEYSTORE_SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let kek = derive_machine_kek(&salt)?;

    let mut dek = [0u8; KEYSTORE_KEY_LEN];
    rand::thread_rng().fill_bytes(&mut dek);
    let (wrapped_dek_nonce, wrapped_dek_ciphertext) = encrypt_blob(&kek, &dek)?;
    let (payload_nonce, payload_ciphertext) = encrypt_blob(&dek, plaintext)?;

    Ok(EncryptedEnvelope {
        salt: B64.encode(salt),
        wrapped_dek_nonce: B64.encode(wrapped_dek_nonce),
        wrapped_dek_ciphertext: B64.encode(wrapped_dek_ciphertext),
        payload_nonce: B64.encode(payload_nonce),
        payload_ciphertext: B64.encode(payload_ciphertext),
    })
}

/// Decrypt a machine-bound envelope back into plaintext bytes.
///
/// Fails when the local machine identity has changed since encryption (new
/// host, new user, or a reinstalled OS with a fresh `/etc/machine-id`) — the
/// keystore treats this the same way the daemon treats any other decryption
/// failure: regenerate silently, per the keystore's fallback semantics.
pub fn decrypt_payload(envelope: &EncryptedEnvelope) -> Result<Vec<u8>, KeystoreError> {
    let salt = decode_fixed::<KEYSTORE_SALT_LEN>(&envelope.salt, "salt")?;
    let kek = derive_machine_kek(&salt)?;
    let wrapped_nonce =
        decode_fixed::<KEYSTORE_NONCE_LEN>(&envelope.wrapped_dek_nonce, "wrapped_dek_nonce")?;
    let wrapped_dek = decode_bytes(&envelope.wrapped_dek_ciphertext, "wrapped_dek_ciphertext")?;
    let dek_raw = decrypt_blob(&kek, &wrapped_nonce, &wrapped_dek)
        .map_err(|_| KeystoreError::Crypto("failed to unwrap data-encryption key".to_string()))?;
    if dek_raw.len() != KEYSTORE_KEY_LEN {
        return Err(KeystoreError::Crypto("invalid unwrapped key length".to_string()));
    }
    let mut dek = [0u8; KEYSTORE_KEY_LEN];
    dek.copy_from_slice(&dek_raw);

    let payload_nonce = decode_fixed::<KEYSTORE_NONCE_LEN>(&envelope.payload_nonce, "payload_nonce")?;
    let payload_ciphertext = decode_bytes(&envelope.payload_ciphertext, "payload_ciphertext")?;
    decrypt_blob(&dek, &payload_nonce, &payload_ciphertext)
        .map_err(|_| KeystoreError::Crypto("failed to decrypt keystore payload".to_string()))
}

/// Derive a machine-bound key-encryption key (KEK) from host/user material.
fn derive_machine_kek(salt: &[u8; KEYSTORE_SALT_LEN]) -> Result<[u8; KEYSTORE_KEY_LEN], KeystoreError> {
    let mut material = machine_secret_material();
    material.extend_from_slice(salt);

    let mut hashed = Sha256::new();
    hashed.update(MACHINE_KEY_CONTEXT.as_bytes());
    hashed.update(&material);
    let seed = hashed.finalize();

    let params = ScryptParams::recommended();
    let mut key = [0u8; KEYSTORE_KEY_LEN];
    scrypt(&seed, salt, &params, &mut key)
        .map_err(|err| KeystoreError::Crypto(format!("failed to derive machine key: {err}")))?;
    Ok(key)
}

/// Build a best-effort machine identity string used for key derivation.
fn machine_secret_material() -> Vec<u8> {
    let hostname = hostname::get()
        .map(|value| value.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown-host".to_string());
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown-user".to_string());
    let home = dirs::home_dir()
        .map(|path| path.display().to_string())
        .unwrap_or_default();
    let machine_id = read_machine_id().unwrap_or_default();
    let joined = format!(
        "os={}|host={}|user={}|home={}|machine_id={}",
        std::env::consts::OS,
        hostname,
        username,
        home,
        machine_id
    );
    joined.into_bytes()
}

/// Read a platform machine identifier from common Unix locations.
fn read_machine_id() -> Option<String> {
    for path in ["/etc/machine-id", "/var/lib/dbus/machine-id", "/etc/hostid"] {
        if let Ok(value) = std::fs::read_to_string(path) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

fn encrypt_blob(key: &[u8; KEYSTORE_KEY_LEN], plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), KeystoreError> {
    let cipher = Aes256GcmSiv::new_from_slice(key)
        .map_err(|_| KeystoreError::Crypto("invalid encryption key length".to_string()))?;
    let mut nonce = [0u8; KEYSTORE_NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| KeystoreError::Crypto("failed to encrypt keystore data".to_string()))?;
    Ok((nonce.to_vec(), ciphertext))
}

fn decrypt_blob(
    key: &[u8; KEYSTORE_KEY_LEN],
    nonce: &[u8; KEYSTORE_NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Vec<u8>, KeystoreError> {
    let cipher = Aes256GcmSiv::new_from_slice(key)
        .map_err(|_| KeystoreError::Crypto("invalid encryption key length".to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| KeystoreError::Crypto("failed to decrypt keystore data".to_string()))
}

fn decode_bytes(value: &str, field: &str) -> Result<Vec<u8>, KeystoreError> {
    B64.decode(value)
        .map_err(|err| KeystoreError::Crypto(format!("failed to decode keystore field `{field}`: {err}")))
}

fn decode_fixed<const N: usize>(value: &str, field: &str) -> Result<[u8; N], KeystoreError> {
    let bytes = decode_bytes(value, field)?;
    if bytes.len() != N {
        return Err(KeystoreError::Crypto(format!(
            "invalid keystore field `{field}` length: expected {N}, got {}",
            bytes.len()
        )));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_payload() {
        let envelope = encrypt_payload(b"top secret keypair bytes").unwrap();
        let plaintext = decrypt_payload(&envelope).unwrap();
        assert_eq!(plaintext, b"top secret keypair bytes");
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let mut envelope = encrypt_payload(b"payload").unwrap();
        envelope.payload_ciphertext = B64.encode(b"not the real ciphertext");
        assert!(decrypt_payload(&envelope).is_err());
    }
}
