//! Installation signing keystore.
//!
//! Generates and persists one long-lived Ed25519 signing keypair per
//! installation. The private key is encrypted at rest under a machine-bound
//! envelope (§keystore::crypto). Signing is best-effort: a caller-visible
//! error here would make the chain depend on the keystore for progress,
//! which the design notes explicitly rule out. If the key can't be loaded or
//! generated, `sign` returns an empty signature and callers record that as-is.

mod crypto;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::KeystoreError;
use crypto::EncryptedEnvelope;

/// On-disk keystore artifact: public key alongside the encrypted private key.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeystoreFile {
    version: u32,
    /// Base64 (via the envelope's own encoding) is not used for the public
    /// key; it is small and not secret, so it is stored as plain hex.
    public_key_hex: String,
    envelope: EncryptedEnvelope,
}

const KEYSTORE_FILE_VERSION: u32 = 1;

/// A loaded or freshly generated installation keypair.
pub struct Keystore {
    signing_key: Option<SigningKey>,
    verifying_key: VerifyingKey,
    path: PathBuf,
}

impl Keystore {
    /// Load the keystore from `path`, generating and persisting a fresh
    /// keypair if the file is absent or fails to decrypt.
    ///
    /// Never fails unless the containing directory is unwritable (a stated
    /// exception — every other failure mode regenerates silently).
    pub fn load_or_generate(path: impl Into<PathBuf>) -> Result<Self, KeystoreError> {
        let path = path.into();
        match std::fs::read_to_string(&path) {
            Ok(text) => match parse_and_decrypt(&text) {
                Ok(signing_key) => {
                    let verifying_key = signing_key.verifying_key();
                    return Ok(Self {
                        signing_key: Some(signing_key),
                        verifying_key,
                        path,
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        "keystore file exists but could not be decrypted; regenerating \
                         (legacy signed records remain verifiable with their recorded signatures)"
                    );
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(KeystoreError::Io(err)),
        }

        Self::generate_and_persist(path)
    }

    /// Force regeneration of the keypair, overwriting any existing file.
    pub fn regenerate(path: impl Into<PathBuf>) -> Result<Self, KeystoreError> {
        Self::generate_and_persist(path.into())
    }

    fn generate_and_persist(path: PathBuf) -> Result<Self, KeystoreError> {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        let signing_key = SigningKey::from_bytes(&seed);
        let verifying_key = signing_key.verifying_key();

        if let Err(err) = persist(&path, &signing_key, &verifying_key) {
            tracing::warn!(error = %err, "failed to persist keystore; signing will be unavailable for this process");
            return Ok(Self {
                signing_key: None,
                verifying_key,
                path,
            });
        }

        Ok(Self {
            signing_key: Some(signing_key),
            verifying_key,
            path,
        })
    }

    /// Sign a hex-encoded SHA-256 digest, returning a hex-encoded detached
    /// signature. Returns an empty string if signing is unavailable —
    /// signing is best-effort and never fatal.
    pub fn sign(&self, hash_hex: &str) -> String {
        let Some(signing_key) = &self.signing_key else {
            return String::new();
        };
        let signature: Signature = signing_key.sign(hash_hex.as_bytes());
        hex_encode(&signature.to_bytes())
    }

    /// Verify a hex-encoded signature over a hex-encoded digest using this
    /// keystore's own public key (used in tests and local self-checks; the
    /// daemon does not need to verify its own signatures in steady state).
    pub fn verify(&self, hash_hex: &str, signature_hex: &str) -> bool {
        let Ok(bytes) = hex_decode(signature_hex) else {
            return false;
        };
        let Ok(bytes) = <[u8; 64]>::try_from(bytes.as_slice()) else {
            return false;
        };
        let signature = Signature::from_bytes(&bytes);
        self.verifying_key.verify_strict(hash_hex.as_bytes(), &signature).is_ok()
    }

    /// Raw installation public key bytes.
    pub fn public_key(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Hex-encoded installation public key.
    pub fn public_key_hex(&self) -> String {
        hex_encode(&self.public_key())
    }

    /// True when signing is currently unavailable (`KeystoreUnavailable`).
    pub fn is_unavailable(&self) -> bool {
        self.signing_key.is_none()
    }

    /// Path the keystore was loaded from / persisted to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_and_decrypt(text: &str) -> Result<SigningKey, KeystoreError> {
    let file: KeystoreFile = serde_json::from_str(text)
        .map_err(|err| KeystoreError::Crypto(format!("failed to parse keystore file: {err}")))?;
    if file.version != KEYSTORE_FILE_VERSION {
        return Err(KeystoreError::Crypto(format!(
            "unsupported keystore file version {}",
            file.version
        )));
    }
    let seed_bytes = crypto::decrypt_payload(&file.envelope)?;
    let seed: [u8; 32] = seed_bytes
        .try_into()
        .map_err(|_| KeystoreError::Crypto("decrypted keystore seed has wrong length".to_string()))?;
    Ok(SigningKey::from_bytes(&seed))
}

fn persist(path: &Path, signing_key: &SigningKey, verifying_key: &VerifyingKey) -> Result<(), KeystoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700));
        }
    }

    let envelope = crypto::encrypt_payload(&signing_key.to_bytes())?;
    let file = KeystoreFile {
        version: KEYSTORE_FILE_VERSION,
        public_key_hex: hex_encode(&verifying_key.to_bytes()),
        envelope,
    };
    let text = serde_json::to_string_pretty(&file)
        .map_err(|err| KeystoreError::Crypto(format!("failed to serialize keystore file: {err}")))?;

    use std::io::Write;
    let mut options = std::fs::OpenOptions::new();
    options.create(true).truncate(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut f = options.open(path)?;
    f.write_all(text.as_bytes())?;
    f.flush()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    Ok(())
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn hex_decode(value: &str) -> Result<Vec<u8>, KeystoreError> {
    if value.len() % 2 != 0 {
        return Err(KeystoreError::Crypto("odd-length hex string".to_string()));
    }
    let mut out = Vec::with_capacity(value.len() / 2);
    let bytes = value.as_bytes();
    for chunk in bytes.chunks(2) {
        let s = std::str::from_utf8(chunk)
            .map_err(|_| KeystoreError::Crypto("invalid hex string".to_string()))?;
        let byte = u8::from_str_radix(s, 16)
            .map_err(|_| KeystoreError::Crypto("invalid hex digit".to_string()))?;
        out.push(byte);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "useaid-keystore-test-{name}-{}.json",
            std::process::id()
        ))
    }

    #[test]
    fn generates_and_reloads_same_key() {
        let path = temp_path("reload");
        let _ = std::fs::remove_file(&path);

        let first = Keystore::load_or_generate(&path).unwrap();
        let pub1 = first.public_key_hex();
        assert!(!first.is_unavailable());

        let second = Keystore::load_or_generate(&path).unwrap();
        assert_eq!(second.public_key_hex(), pub1);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let path = temp_path("sign-verify");
        let _ = std::fs::remove_file(&path);
        let ks = Keystore::load_or_generate(&path).unwrap();
        let sig = ks.sign("deadbeef");
        assert!(!sig.is_empty());
        assert!(ks.verify("deadbeef", &sig));
        assert!(!ks.verify("other-hash", &sig));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn regenerate_produces_a_different_key() {
        let path = temp_path("regen");
        let _ = std::fs::remove_file(&path);
        let first = Keystore::load_or_generate(&path).unwrap();
        let second = Keystore::regenerate(&path).unwrap();
        assert_ne!(first.public_key_hex(), second.public_key_hex());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn corrupt_file_falls_back_to_fresh_generation() {
        let path = temp_path("corrupt");
        std::fs::write(&path, "not json at all").unwrap();
        let ks = Keystore::load_or_generate(&path).unwrap();
        assert!(!ks.is_unavailable());
        let _ = std::fs::remove_file(&path);
    }
}
