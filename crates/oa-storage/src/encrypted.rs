// encrypted.rs — JSON document encrypted at rest.
//
// File layout: nonce (12 bytes) ‖ AES-256-GCM ciphertext with 16-byte tag.
// The key is derived from a password with PBKDF2-HMAC-SHA256 over a random
// 16-byte salt kept in `.encryption_salt` next to the document. The salt is
// created on first use and reused afterwards, so reopening with the same
// password derives the same key.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use serde_json::Value;

use crate::backend::StorageBackend;
use crate::error::StorageError;
use crate::json_file::{read_if_exists, remove_if_exists, write_atomic};

pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 480_000;
pub const SALT_FILE_NAME: &str = ".encryption_salt";
const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;

/// Encrypted single-file backend.
pub struct EncryptedJsonStorage {
    path: PathBuf,
    key: LessSafeKey,
    rng: SystemRandom,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for EncryptedJsonStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedJsonStorage")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl EncryptedJsonStorage {
    pub fn new(path: impl AsRef<Path>, password: &str) -> Result<Self, StorageError> {
        Self::with_iterations(path, password, DEFAULT_PBKDF2_ITERATIONS)
    }

    /// Open with an explicit PBKDF2 iteration count. Every process opening
    /// the same file must use the same count.
    pub fn with_iterations(
        path: impl AsRef<Path>,
        password: &str,
        iterations: u32,
    ) -> Result<Self, StorageError> {
        if password.is_empty() {
            return Err(StorageError::InvalidConfig(
                "encryption password must not be empty".into(),
            ));
        }
        let iterations = NonZeroU32::new(iterations).ok_or_else(|| {
            StorageError::InvalidConfig("pbkdf2 iterations must be at least 1".into())
        })?;

        let path = path.as_ref().to_path_buf();
        let rng = SystemRandom::new();
        let salt = load_or_create_salt(&salt_path(&path), &rng)?;

        let mut key_bytes = [0u8; KEY_LEN];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iterations,
            &salt,
            password.as_bytes(),
            &mut key_bytes,
        );
        let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes)
            .map_err(|_| StorageError::Encryption("invalid AES-256 key".into()))?;

        Ok(Self {
            path,
            key: LessSafeKey::new(unbound),
            rng,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| StorageError::Encryption("system RNG failure".into()))?;

        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| StorageError::Encryption("seal failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + in_out.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&in_out);
        Ok(out)
    }

    /// `None` when the bytes are truncated or the tag does not verify.
    fn open(&self, bytes: &[u8]) -> Option<Vec<u8>> {
        if bytes.len() < NONCE_LEN + TAG_LEN {
            return None;
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce).ok()?;
        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .ok()?;
        Some(plaintext.to_vec())
    }
}

impl StorageBackend for EncryptedJsonStorage {
    fn save(&self, document: &Value) -> Result<(), StorageError> {
        let json = serde_json::to_vec(document)?;
        let sealed = self.seal(&json)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;
        write_atomic(&self.path, &sealed)?;
        tracing::debug!(path = %self.path.display(), bytes = sealed.len(), "saved encrypted document");
        Ok(())
    }

    fn load(&self) -> Result<Option<Value>, StorageError> {
        let Some(bytes) = read_if_exists(&self.path)? else {
            return Ok(None);
        };
        let Some(plaintext) = self.open(&bytes) else {
            tracing::warn!(
                path = %self.path.display(),
                "could not decrypt stored document (wrong password or corrupt file); treating as empty"
            );
            return Ok(None);
        };
        match serde_json::from_slice(&plaintext) {
            Ok(document) => Ok(Some(document)),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "decrypted document is not valid JSON");
                Ok(None)
            }
        }
    }

    fn exists(&self) -> Result<bool, StorageError> {
        Ok(self.path.exists())
    }

    /// Removes the document. The salt stays so the password keeps working.
    fn clear(&self) -> Result<(), StorageError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;
        remove_if_exists(&self.path)
    }

    fn name(&self) -> &'static str {
        "encrypted"
    }
}

fn salt_path(document: &Path) -> PathBuf {
    document.with_file_name(SALT_FILE_NAME)
}

fn load_or_create_salt(path: &Path, rng: &SystemRandom) -> Result<Vec<u8>, StorageError> {
    if let Some(salt) = read_if_exists(path)? {
        if salt.len() == SALT_LEN {
            return Ok(salt);
        }
        tracing::warn!(
            path = %path.display(),
            len = salt.len(),
            "salt file has unexpected length; generating a new one"
        );
    }
    let mut salt = vec![0u8; SALT_LEN];
    rng.fill(&mut salt)
        .map_err(|_| StorageError::Encryption("system RNG failure".into()))?;
    write_atomic(path, &salt)?;
    tracing::info!(path = %path.display(), "created encryption salt");
    Ok(salt)
}

/// A random password suitable for `EncryptedJsonStorage`: 32 bytes from the
/// system RNG, URL-safe base64 without padding.
pub fn generate_password() -> Result<String, StorageError> {
    let mut bytes = [0u8; 32];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| StorageError::Encryption("system RNG failure".into()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
