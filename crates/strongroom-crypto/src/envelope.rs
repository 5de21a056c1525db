//! Per-document data keys.
//!
//! Large documents get their own random data key (DEK). The content is sealed
//! under the DEK, and the DEK is sealed under the tenant key. A SHA-256 of the
//! plaintext is recorded alongside and re-checked after decryption.

use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;
use zeroize::Zeroizing;

use strongroom_types::{EncryptedPayload, TenantId};

use crate::encrypt::{EncryptionService, open_with};
use crate::error::{DecryptFailure, DecryptionError, EncryptionError};
use crate::keys::KEY_SIZE;

/// `key_id` label of content sealed under a document data key.
pub const DATA_KEY_ID: &str = "dek";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedDocument {
    /// Content sealed under the data key.
    pub content: EncryptedPayload,
    /// Data key sealed under the tenant key.
    pub wrapped_key: EncryptedPayload,
    /// Lowercase hex SHA-256 of the plaintext.
    pub content_hash: String,
}

/// Lowercase hex SHA-256.
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

impl EncryptionService {
    pub fn seal_document(&self, content: &[u8], tenant_id: TenantId) -> Result<SealedDocument, EncryptionError> {
        let mut dek = Zeroizing::new([0u8; KEY_SIZE]);
        OsRng.fill_bytes(&mut dek[..]);

        let sealed_content = self.seal_with(&dek, DATA_KEY_ID.to_string(), content)?;
        let wrapped_key = self.encrypt(&dek[..], tenant_id)?;

        Ok(SealedDocument {
            content: sealed_content,
            wrapped_key,
            content_hash: content_hash(content),
        })
    }

    pub fn open_document(&self, document: &SealedDocument, tenant_id: TenantId) -> Result<Vec<u8>, DecryptionError> {
        let raw_key = Zeroizing::new(self.decrypt(&document.wrapped_key, tenant_id)?);
        let dek: &[u8; KEY_SIZE] = raw_key
            .as_slice()
            .try_into()
            .map_err(|_| DecryptionError::from(DecryptFailure::MalformedDataKey))?;

        let plaintext = open_with(dek, &document.content).map_err(|reason| {
            warn!(tenant_id = %tenant_id, reason = %reason, "Document content refused");
            DecryptionError::from(reason)
        })?;

        if content_hash(&plaintext) != document.content_hash {
            warn!(tenant_id = %tenant_id, "Document content hash mismatch after decryption");
            return Err(DecryptFailure::ContentHashMismatch.into());
        }

        Ok(plaintext)
    }
}
