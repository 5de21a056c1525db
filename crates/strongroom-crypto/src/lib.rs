/// Strongroom Crypto Library
///
/// Tenant-scoped authenticated encryption (AES-256-GCM).
/// Every tenant gets its own key, derived from the platform master key ring
/// with HKDF-SHA256, so rows read out of context stay sealed.
pub mod encrypt;
pub mod envelope;
pub mod error;
pub mod keys;

pub use encrypt::{EncryptionService, NonceSource, OsNonceSource};
pub use envelope::{DATA_KEY_ID, SealedDocument, content_hash};
pub use error::{ConfigError, DecryptFailure, DecryptionError, EncryptionError, KeyError};
pub use keys::{KEY_SIZE, KeyDerivationService, MasterKey, MasterKeyRing, TenantKey};
