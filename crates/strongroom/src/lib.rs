//! Strongroom: tenant-scoped encryption and a tamper-evident audit log.
//!
//! ```no_run
//! use strongroom::{AuditEvent, ActorContext, Strongroom, SubjectId, TenantId};
//!
//! strongroom::init_tracing();
//! let vault = Strongroom::from_env()?;
//!
//! let _payload = vault.encryption().encrypt_str("Hola, ¿qué tal?", TenantId(1))?;
//! vault.audit().log(SubjectId(1), &ActorContext::new(100), AuditEvent::new("message.sent").target(1))?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod config;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub use config::Config;
pub use strongroom_audit::{
    AuditError, AuditEvent, AuditLogService, AuditStore, Clock, MemoryAuditStore, StorageError, SystemClock,
};
pub use strongroom_crypto::{
    ConfigError, DecryptFailure, DecryptionError, EncryptionError, EncryptionService, KeyDerivationService, MasterKey,
    MasterKeyRing, SealedDocument,
};
pub use strongroom_db::Database;
pub use strongroom_types::{
    ActorContext, AuditLogEntry, EncryptedPayload, IntegrityFailure, IntegrityReport, KeyId, SubjectId, TenantId,
};

/// Install the global `tracing` subscriber. Filter comes from `RUST_LOG`,
/// defaulting to `strongroom=info`. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "strongroom=info".into()))
        .try_init();
}

/// The encryption and audit services wired over one key ring and one store.
pub struct Strongroom {
    encryption: EncryptionService,
    audit: AuditLogService,
}

impl Strongroom {
    /// Read [`Config`] from the environment and open the SQLite store.
    pub fn from_env() -> Result<Self> {
        Self::open(Config::from_env()?)
    }

    pub fn open(config: Config) -> Result<Self> {
        let db = Database::open(&config.db_path)?;
        Ok(Self::with_store(config.ring, Arc::new(db)))
    }

    pub fn with_store(ring: MasterKeyRing, store: Arc<dyn AuditStore>) -> Self {
        let keys = Arc::new(KeyDerivationService::new(ring));
        info!(key_version = keys.current_version(), "Strongroom services ready");
        Self {
            encryption: EncryptionService::new(keys),
            audit: AuditLogService::with_system_clock(store),
        }
    }

    pub fn encryption(&self) -> &EncryptionService {
        &self.encryption
    }

    pub fn keys(&self) -> &KeyDerivationService {
        self.encryption.keys()
    }

    pub fn audit(&self) -> &AuditLogService {
        &self.audit
    }
}
