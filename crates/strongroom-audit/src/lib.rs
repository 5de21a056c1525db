//! Append-only audit log with an independent SHA-256 hash chain per subject.
//!
//! Entries are written through [`AuditLogService::log`] and checked with
//! [`AuditLogService::verify_integrity`]. Storage is pluggable through
//! [`AuditStore`]; [`MemoryAuditStore`] keeps everything in process.

pub mod chain;
pub mod clock;
pub mod error;
pub mod service;
pub mod store;

pub use chain::{canonical_record, chain_hash, entry_hash, format_timestamp};
pub use clock::{Clock, SystemClock};
pub use error::{AuditError, AuditResult, StorageError};
pub use service::{AuditEvent, AuditLogService};
pub use store::{AuditStore, MemoryAuditStore, PendingEntry};
