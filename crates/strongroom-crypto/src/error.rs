use std::fmt;

use thiserror::Error;

/// Startup-time failure to assemble the master key ring. Never raised per call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is not set")]
    MissingMasterKey { name: String },

    #[error("{name} is not valid base64")]
    InvalidEncoding { name: String },

    #[error("{name} must decode to 32 bytes, got {len}")]
    InvalidKeyLength { name: String, len: usize },

    #[error("{name} is a placeholder or trivially weak key")]
    WeakKey { name: String },

    #[error("{name} is not a valid key version: {value:?}")]
    InvalidVersion { name: String, value: String },

    #[error("key version {0} is registered twice")]
    DuplicateVersion(u32),
}

/// Failure to produce a tenant key.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("key version {0} is not registered")]
    UnknownVersion(u32),

    #[error("tenant key derivation failed")]
    Derivation,
}

#[derive(Debug, Error)]
#[error("encryption failed")]
pub struct EncryptionError;

/// Why a decryption was refused. Kept for internal diagnostics only; the
/// `Display` of [`DecryptionError`] never reveals it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptFailure {
    MalformedKeyId,
    UnknownKeyVersion(u32),
    KeyDerivation,
    AuthenticationFailed,
    MalformedDataKey,
    ContentHashMismatch,
    InvalidUtf8,
}

impl fmt::Display for DecryptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedKeyId => write!(f, "malformed key id"),
            Self::UnknownKeyVersion(v) => write!(f, "unknown key version {}", v),
            Self::KeyDerivation => write!(f, "tenant key derivation failed"),
            Self::AuthenticationFailed => write!(f, "GCM authentication failed"),
            Self::MalformedDataKey => write!(f, "unwrapped data key has wrong length"),
            Self::ContentHashMismatch => write!(f, "content hash mismatch after decryption"),
            Self::InvalidUtf8 => write!(f, "plaintext is not valid UTF-8"),
        }
    }
}

#[derive(Debug, Error)]
#[error("decryption failed")]
pub struct DecryptionError {
    reason: DecryptFailure,
}

impl DecryptionError {
    pub(crate) fn new(reason: DecryptFailure) -> Self {
        Self { reason }
    }

    pub fn reason(&self) -> DecryptFailure {
        self.reason
    }
}

impl From<KeyError> for DecryptFailure {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::UnknownVersion(version) => Self::UnknownKeyVersion(version),
            KeyError::Derivation => Self::KeyDerivation,
        }
    }
}

impl From<DecryptFailure> for DecryptionError {
    fn from(reason: DecryptFailure) -> Self {
        Self::new(reason)
    }
}
