use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hkdf::Hkdf;
use sha2::Sha256;
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use strongroom_types::{KeyId, TenantId};

use crate::error::{ConfigError, KeyError};

pub const KEY_SIZE: usize = 32;

/// HKDF salt shared by every tenant key. Changing it re-keys every tenant.
const TENANT_KEY_SALT: &[u8] = b"strongroom/tenant-key/v1";

/// Values shipped in sample `.env` files that must never reach production.
const PLACEHOLDER_KEYS: &[&str] = &[
    "change-me",
    "change-me-to-a-random-key",
    "dev-master-key-change-me",
];

/// Platform master key. Zeroed on drop, never printed.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; KEY_SIZE]);

impl MasterKey {
    /// Generate a random master key (bootstrap tooling and tests).
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Decode a base64 master key. `name` labels the source in errors.
    pub fn from_base64(name: &str, encoded: &str) -> Result<Self, ConfigError> {
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Err(ConfigError::MissingMasterKey { name: name.to_string() });
        }
        if PLACEHOLDER_KEYS.contains(&encoded) {
            return Err(ConfigError::WeakKey { name: name.to_string() });
        }

        let bytes = Zeroizing::new(
            BASE64
                .decode(encoded)
                .map_err(|_| ConfigError::InvalidEncoding { name: name.to_string() })?,
        );
        let key: [u8; KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
            ConfigError::InvalidKeyLength {
                name: name.to_string(),
                len: bytes.len(),
            }
        })?;

        // A key made of one repeated byte is a fill pattern, not a secret
        if key.iter().all(|b| *b == key[0]) {
            return Err(ConfigError::WeakKey { name: name.to_string() });
        }

        Ok(Self(key))
    }

    /// Encode for display/sharing. Only meant for bootstrap tooling.
    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(BASE64.encode(&self.0))
    }

    fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}

/// Registry of master keys by version. Exactly one version is current and is
/// used for new encryptions; retired versions stay resolvable for decryption.
#[derive(Debug)]
pub struct MasterKeyRing {
    current_version: u32,
    current: MasterKey,
    retired: BTreeMap<u32, MasterKey>,
}

impl MasterKeyRing {
    pub fn new(current_version: u32, key: MasterKey) -> Self {
        Self {
            current_version,
            current: key,
            retired: BTreeMap::new(),
        }
    }

    /// Keep an older master key so payloads written under it still decrypt.
    pub fn with_retired(mut self, version: u32, key: MasterKey) -> Result<Self, ConfigError> {
        if version == self.current_version || self.retired.contains_key(&version) {
            return Err(ConfigError::DuplicateVersion(version));
        }
        self.retired.insert(version, key);
        Ok(self)
    }

    pub fn current_version(&self) -> u32 {
        self.current_version
    }

    /// Every registered version, ascending.
    pub fn versions(&self) -> Vec<u32> {
        let mut versions: Vec<u32> = self.retired.keys().copied().collect();
        versions.push(self.current_version);
        versions.sort_unstable();
        versions
    }

    fn get(&self, version: u32) -> Option<&MasterKey> {
        if version == self.current_version {
            Some(&self.current)
        } else {
            self.retired.get(&version)
        }
    }
}

/// A derived per-tenant key. The material is zeroed when the last handle drops.
pub struct TenantKey {
    key_id: KeyId,
    material: Zeroizing<[u8; KEY_SIZE]>,
}

impl TenantKey {
    pub fn key_id(&self) -> KeyId {
        self.key_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.key_id.tenant_id
    }

    pub fn version(&self) -> u32 {
        self.key_id.version
    }

    pub fn material(&self) -> &[u8; KEY_SIZE] {
        &self.material
    }
}

impl fmt::Debug for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantKey")
            .field("key_id", &self.key_id)
            .field("material", &"<redacted>")
            .finish()
    }
}

/// Turns the master key ring into per-tenant AES-256 keys.
///
/// Derivation is HKDF-SHA256 with the version's master key as input keying
/// material and `tenant:<id>:v<version>` as info, so the same `(tenant, version)`
/// always yields the same key and one tenant's key reveals nothing about the
/// master key or any other tenant. Derived keys are cached and never evicted.
pub struct KeyDerivationService {
    ring: MasterKeyRing,
    cache: RwLock<HashMap<KeyId, Arc<TenantKey>>>,
}

impl KeyDerivationService {
    pub fn new(ring: MasterKeyRing) -> Self {
        info!(
            current_version = ring.current_version(),
            versions = ?ring.versions(),
            "Master key ring loaded"
        );
        Self {
            ring,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn current_version(&self) -> u32 {
        self.ring.current_version()
    }

    /// Key for new encryptions under `tenant_id`.
    pub fn tenant_key(&self, tenant_id: TenantId) -> Result<Arc<TenantKey>, KeyError> {
        let key_id = KeyId::new(tenant_id, self.ring.current_version);
        self.cached_or_derive(key_id, &self.ring.current)
    }

    /// Key for `tenant_id` at an explicit version, e.g. one read back from a `key_id`.
    pub fn tenant_key_version(
        &self,
        tenant_id: TenantId,
        version: u32,
    ) -> Result<Arc<TenantKey>, KeyError> {
        let master = self.ring.get(version).ok_or(KeyError::UnknownVersion(version))?;
        self.cached_or_derive(KeyId::new(tenant_id, version), master)
    }

    fn cached_or_derive(&self, key_id: KeyId, master: &MasterKey) -> Result<Arc<TenantKey>, KeyError> {
        if let Some(key) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key_id)
        {
            return Ok(Arc::clone(key));
        }

        let derived = Arc::new(derive(master, key_id)?);
        debug!(key_id = %key_id, "Derived tenant key");

        // Another thread may have derived the same key meanwhile; both results are identical
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(cache.entry(key_id).or_insert(derived)))
    }

    /// Number of tenant keys derived so far.
    pub fn cached_keys(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

fn derive(master: &MasterKey, key_id: KeyId) -> Result<TenantKey, KeyError> {
    let info = format!("tenant:{}:v{}", key_id.tenant_id, key_id.version);
    let mut material = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf_expand(master.as_bytes(), info.as_bytes(), &mut material[..])?;
    Ok(TenantKey { key_id, material })
}

fn hkdf_expand(ikm: &[u8], info: &[u8], out: &mut [u8]) -> Result<(), KeyError> {
    let hk = Hkdf::<Sha256>::new(Some(TENANT_KEY_SALT), ikm);
    hk.expand(info, out).map_err(|_| KeyError::Derivation)
}
