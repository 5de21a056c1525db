use strongroom_types::SubjectId;
use thiserror::Error;

/// Failure at the persistence boundary.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend failure: {0}")]
    Backend(String),

    /// The entry handed to the store does not extend the subject's current tip.
    #[error("entry does not extend the chain tip of subject {subject}")]
    TipMoved { subject: SubjectId },

    #[error("corrupt audit row {id}: {reason}")]
    Corrupt { id: u64, reason: String },
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit action must not be empty")]
    EmptyAction,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type AuditResult<T> = Result<T, AuditError>;
