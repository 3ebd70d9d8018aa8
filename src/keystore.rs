//! Hardware-backed device identifier
//!
//! The identifier is derived from a biometric-bound key held in the platform
//! keystore. The key is created on first use and the platform deletes it when
//! biometric enrollment changes, so the next lookup provisions a fresh one.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info};

/// Keystore alias of the identifier key
pub const KEY_ALIAS: &str = "com.example.fingerprint_key";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyAccessError {
    #[error("Keystore unavailable: {0}")]
    Unavailable(String),

    #[error("Key entry {0} is missing after generation")]
    MissingEntry(String),

    #[error("Keystore entry corrupted: {0}")]
    Corrupted(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    Aes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockMode {
    Cbc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptionPadding {
    Pkcs7,
}

/// Generation parameters handed to the keystore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySpec {
    pub alias: String,
    pub algorithm: KeyAlgorithm,
    pub key_size_bits: u32,
    pub encrypt: bool,
    pub decrypt: bool,
    pub block_mode: BlockMode,
    pub padding: EncryptionPadding,
    pub user_authentication_required: bool,
    pub invalidated_by_biometric_enrollment: bool,
}

impl KeySpec {
    /// Biometric-bound AES key used to derive the device identifier
    pub fn fingerprint_key(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            algorithm: KeyAlgorithm::Aes,
            key_size_bits: 256,
            encrypt: true,
            decrypt: true,
            block_mode: BlockMode::Cbc,
            padding: EncryptionPadding::Pkcs7,
            user_authentication_required: true,
            invalidated_by_biometric_enrollment: true,
        }
    }
}

/// Platform secure keystore
pub trait SecureKeyStore: Send + Sync {
    fn contains_alias(&self, alias: &str) -> Result<bool, KeyAccessError>;

    fn generate_key(&self, spec: &KeySpec) -> Result<(), KeyAccessError>;

    /// Raw key material. `Ok(None)` when the entry exists but is not exportable.
    fn key_material(&self, alias: &str) -> Result<Option<Vec<u8>>, KeyAccessError>;
}

/// Stable per-install identifier sent to the exchange service
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceIdentifier(String);

impl DeviceIdentifier {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Short digest suitable for logs
    pub fn digest(&self) -> String {
        identifier_digest(&self.0)
    }
}

impl fmt::Debug for DeviceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceIdentifier({})", self.digest())
    }
}

/// First 12 hex characters of the SHA-256 of an identifier
pub fn identifier_digest(identifier: &str) -> String {
    let digest = Sha256::digest(identifier.as_bytes());
    digest.iter().take(6).map(|b| format!("{:02x}", b)).collect()
}

/// Generate-if-absent access to the device identifier key
pub struct DeviceIdentity {
    store: Arc<dyn SecureKeyStore>,
    spec: KeySpec,
    // Serializes check-then-generate for stores that do not do it themselves
    ensure_lock: Mutex<()>,
}

impl DeviceIdentity {
    pub fn new(store: Arc<dyn SecureKeyStore>) -> Self {
        Self::with_alias(store, KEY_ALIAS)
    }

    pub fn with_alias(store: Arc<dyn SecureKeyStore>, alias: impl Into<String>) -> Self {
        Self {
            store,
            spec: KeySpec::fingerprint_key(alias),
            ensure_lock: Mutex::new(()),
        }
    }

    pub fn key_spec(&self) -> &KeySpec {
        &self.spec
    }

    pub fn get_device_identifier(&self) -> Result<DeviceIdentifier, KeyAccessError> {
        let _guard = self
            .ensure_lock
            .lock()
            .map_err(|_| KeyAccessError::Unavailable("identity lock poisoned".to_string()))?;

        if !self.store.contains_alias(&self.spec.alias)? {
            info!(alias = %self.spec.alias, "Provisioning device identifier key");
            self.store.generate_key(&self.spec)?;
        }

        let identifier = match self.store.key_material(&self.spec.alias)? {
            Some(material) if material.is_empty() => {
                return Err(KeyAccessError::Corrupted(format!(
                    "{} has empty key material",
                    self.spec.alias
                )));
            }
            Some(material) => DeviceIdentifier(BASE64.encode(material)),
            None => DeviceIdentifier(format!("KEY:{}", self.spec.alias)),
        };

        debug!(identifier = %identifier.digest(), "Device identifier ready");
        Ok(identifier)
    }
}

/// Software keystore for hosts without secure hardware, and for tests
pub struct InMemoryKeyStore {
    keys: RwLock<HashMap<String, StoredKey>>,
    exportable: bool,
}

struct StoredKey {
    spec: KeySpec,
    material: Vec<u8>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            exportable: true,
        }
    }

    /// Store whose entries refuse to export key material, like hardware keys
    pub fn non_exportable() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            exportable: false,
        }
    }

    /// Drop every key bound to biometric enrollment, as the platform does on re-enrollment
    pub fn change_biometric_enrollment(&self) {
        if let Ok(mut keys) = self.keys.write() {
            keys.retain(|_, key| !key.spec.invalidated_by_biometric_enrollment);
        }
    }

    pub fn key_count(&self) -> usize {
        self.keys.read().map(|keys| keys.len()).unwrap_or(0)
    }
}

impl Default for InMemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureKeyStore for InMemoryKeyStore {
    fn contains_alias(&self, alias: &str) -> Result<bool, KeyAccessError> {
        let keys = self
            .keys
            .read()
            .map_err(|e| KeyAccessError::Unavailable(e.to_string()))?;
        Ok(keys.contains_key(alias))
    }

    fn generate_key(&self, spec: &KeySpec) -> Result<(), KeyAccessError> {
        let mut material = vec![0u8; (spec.key_size_bits / 8) as usize];
        rand::rngs::OsRng.fill_bytes(&mut material);

        let mut keys = self
            .keys
            .write()
            .map_err(|e| KeyAccessError::Unavailable(e.to_string()))?;
        keys.insert(
            spec.alias.clone(),
            StoredKey {
                spec: spec.clone(),
                material,
            },
        );
        Ok(())
    }

    fn key_material(&self, alias: &str) -> Result<Option<Vec<u8>>, KeyAccessError> {
        let keys = self
            .keys
            .read()
            .map_err(|e| KeyAccessError::Unavailable(e.to_string()))?;
        let key = keys
            .get(alias)
            .ok_or_else(|| KeyAccessError::MissingEntry(alias.to_string()))?;

        if self.exportable {
            Ok(Some(key.material.clone()))
        } else {
            Ok(None)
        }
    }
}
