/// Value types shared by the encryption and audit crates.
pub mod audit;
pub mod ids;
pub mod models;

pub use audit::{AuditLogEntry, GENESIS_HASH, IntegrityFailure, IntegrityReport};
pub use ids::{KeyId, SubjectId, TenantId};
pub use models::{ActorContext, EncryptedPayload, IV_SIZE, MalformedEnvelope, TAG_SIZE};
