use std::sync::Arc;

use aes_gcm::{
    Aes256Gcm, Key, Nonce, Tag,
    aead::{AeadInPlace, KeyInit, OsRng, rand_core::RngCore},
};
use tracing::{debug, warn};

use strongroom_types::{EncryptedPayload, IV_SIZE, KeyId, TAG_SIZE, TenantId};

use crate::error::{DecryptFailure, DecryptionError, EncryptionError};
use crate::keys::{KEY_SIZE, KeyDerivationService};

/// Source of fresh 96-bit GCM nonces.
pub trait NonceSource: Send + Sync {
    fn fill_nonce(&self, iv: &mut [u8; IV_SIZE]);
}

/// Operating-system CSPRNG.
pub struct OsNonceSource;

impl NonceSource for OsNonceSource {
    fn fill_nonce(&self, iv: &mut [u8; IV_SIZE]) {
        OsRng.fill_bytes(iv);
    }
}

/// Tenant-scoped AES-256-GCM.
///
/// The `key_id` string is authenticated as associated data, so a payload only
/// opens under the exact tenant and key version it was sealed with. A payload
/// from tenant A presented as tenant B derives B's key and fails the tag check.
pub struct EncryptionService {
    keys: Arc<KeyDerivationService>,
    nonces: Arc<dyn NonceSource>,
}

impl EncryptionService {
    pub fn new(keys: Arc<KeyDerivationService>) -> Self {
        Self::with_nonce_source(keys, Arc::new(OsNonceSource))
    }

    pub fn with_nonce_source(keys: Arc<KeyDerivationService>, nonces: Arc<dyn NonceSource>) -> Self {
        Self { keys, nonces }
    }

    pub fn keys(&self) -> &KeyDerivationService {
        &self.keys
    }

    /// Encrypt `plaintext` under the tenant's current key.
    pub fn encrypt(&self, plaintext: &[u8], tenant_id: TenantId) -> Result<EncryptedPayload, EncryptionError> {
        let key = self.keys.tenant_key(tenant_id).map_err(|e| {
            warn!(tenant_id = %tenant_id, error = %e, "Tenant key unavailable for encryption");
            EncryptionError
        })?;
        let payload = self.seal_with(key.material(), key.key_id().to_string(), plaintext)?;
        debug!(
            tenant_id = %tenant_id,
            key_id = %payload.key_id,
            len = plaintext.len(),
            "Encrypted payload"
        );
        Ok(payload)
    }

    pub fn encrypt_str(&self, plaintext: &str, tenant_id: TenantId) -> Result<EncryptedPayload, EncryptionError> {
        self.encrypt(plaintext.as_bytes(), tenant_id)
    }

    /// Decrypt a payload sealed for `tenant_id`. Nothing is returned unless the
    /// tag verifies.
    pub fn decrypt(&self, payload: &EncryptedPayload, tenant_id: TenantId) -> Result<Vec<u8>, DecryptionError> {
        self.try_decrypt(payload, tenant_id).map_err(|reason| {
            warn!(
                tenant_id = %tenant_id,
                key_id = %payload.key_id,
                reason = %reason,
                "Decryption refused"
            );
            DecryptionError::from(reason)
        })
    }

    pub fn decrypt_to_string(&self, payload: &EncryptedPayload, tenant_id: TenantId) -> Result<String, DecryptionError> {
        let plaintext = self.decrypt(payload, tenant_id)?;
        String::from_utf8(plaintext).map_err(|_| DecryptionError::from(DecryptFailure::InvalidUtf8))
    }

    fn try_decrypt(&self, payload: &EncryptedPayload, tenant_id: TenantId) -> Result<Vec<u8>, DecryptFailure> {
        // Only the version is taken from the payload. The tenant always comes
        // from the caller, and the key_id itself is checked as associated data.
        let key_id = KeyId::parse(&payload.key_id).ok_or(DecryptFailure::MalformedKeyId)?;
        let key = self
            .keys
            .tenant_key_version(tenant_id, key_id.version)?;
        open_with(key.material(), payload)
    }

    /// Seal under an arbitrary 256-bit key, labelling the result with `key_id`.
    pub(crate) fn seal_with(
        &self,
        key: &[u8; KEY_SIZE],
        key_id: String,
        plaintext: &[u8],
    ) -> Result<EncryptedPayload, EncryptionError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

        let mut iv = [0u8; IV_SIZE];
        self.nonces.fill_nonce(&mut iv);
        let nonce = Nonce::from_slice(&iv);

        let mut ciphertext = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(nonce, key_id.as_bytes(), &mut ciphertext)
            .map_err(|_| EncryptionError)?;

        let mut tag_bytes = [0u8; TAG_SIZE];
        tag_bytes.copy_from_slice(&tag);

        Ok(EncryptedPayload {
            ciphertext,
            iv,
            tag: tag_bytes,
            key_id,
        })
    }
}

/// Verify and decrypt. The buffer is only decrypted after the tag matches.
pub(crate) fn open_with(key: &[u8; KEY_SIZE], payload: &EncryptedPayload) -> Result<Vec<u8>, DecryptFailure> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(&payload.iv);
    let tag = Tag::from_slice(&payload.tag);

    let mut buffer = payload.ciphertext.clone();
    cipher
        .decrypt_in_place_detached(nonce, payload.key_id.as_bytes(), &mut buffer, tag)
        .map_err(|_| DecryptFailure::AuthenticationFailed)?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::keys::{MasterKey, MasterKeyRing};

    fn service() -> EncryptionService {
        let keys = KeyDerivationService::new(MasterKeyRing::new(1, MasterKey::generate()));
        EncryptionService::new(Arc::new(keys))
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let svc = service();
        let message = b"Hello from the vault!";

        let payload = svc.encrypt(message, TenantId(1)).unwrap();
        assert_ne!(payload.ciphertext.as_slice(), message);
        assert_eq!(payload.ciphertext.len(), message.len());
        assert_eq!(payload.key_id, "t1.v1");

        let decrypted = svc.decrypt(&payload, TenantId(1)).unwrap();
        assert_eq!(decrypted, message);
    }

    #[test]
    fn utf8_roundtrip() {
        let svc = service();
        let payload = svc.encrypt_str("Hola, ¿qué tal?", TenantId(1)).unwrap();
        assert_eq!(payload.iv.len(), 12);
        assert_eq!(payload.tag.len(), 16);
        assert_eq!(svc.decrypt_to_string(&payload, TenantId(1)).unwrap(), "Hola, ¿qué tal?");
    }

    #[test]
    fn empty_plaintext() {
        let svc = service();
        let payload = svc.encrypt(b"", TenantId(1)).unwrap();
        assert!(payload.ciphertext.is_empty());
        let decrypted = svc.decrypt(&payload, TenantId(1)).unwrap();
        assert!(decrypted.is_empty());
    }

    #[test]
    fn large_plaintext() {
        let svc = service();
        let text = "Lorem ipsum dolor sit amet. ".repeat(600); // ~16 KB
        let payload = svc.encrypt_str(&text, TenantId(4)).unwrap();
        assert_eq!(svc.decrypt_to_string(&payload, TenantId(4)).unwrap(), text);
    }

    #[test]
    fn same_plaintext_gets_fresh_iv() {
        let svc = service();
        let a = svc.encrypt(b"same message", TenantId(1)).unwrap();
        let b = svc.encrypt(b"same message", TenantId(1)).unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn wrong_tenant_fails() {
        let svc = service();
        let payload = svc.encrypt(b"secret", TenantId(1)).unwrap();
        let err = svc.decrypt(&payload, TenantId(2)).unwrap_err();
        assert_eq!(err.reason(), DecryptFailure::AuthenticationFailed);
    }

    #[test]
    fn every_flipped_bit_is_detected() {
        let svc = service();
        let payload = svc.encrypt(b"sensitive data", TenantId(1)).unwrap();
        for byte in 0..payload.ciphertext.len() {
            for bit in 0..8 {
                let mut tampered = payload.clone();
                tampered.ciphertext[byte] ^= 1 << bit;
                assert!(svc.decrypt(&tampered, TenantId(1)).is_err());
            }
        }
    }

    #[test]
    fn tampered_tag_or_iv_fails() {
        let svc = service();
        let payload = svc.encrypt(b"sensitive data", TenantId(1)).unwrap();

        let mut bad_tag = payload.clone();
        bad_tag.tag[0] ^= 0x01;
        assert!(svc.decrypt(&bad_tag, TenantId(1)).is_err());

        let mut bad_iv = payload.clone();
        bad_iv.iv[11] ^= 0x80;
        assert!(svc.decrypt(&bad_iv, TenantId(1)).is_err());
    }

    #[test]
    fn rewritten_key_id_fails() {
        let svc = service();
        let mut payload = svc.encrypt(b"data", TenantId(1)).unwrap();

        payload.key_id = "t2.v1".into();
        assert_eq!(
            svc.decrypt(&payload, TenantId(1)).unwrap_err().reason(),
            DecryptFailure::AuthenticationFailed
        );

        payload.key_id = "t1.v9".into();
        assert_eq!(
            svc.decrypt(&payload, TenantId(1)).unwrap_err().reason(),
            DecryptFailure::UnknownKeyVersion(9)
        );

        payload.key_id = "garbage".into();
        assert_eq!(
            svc.decrypt(&payload, TenantId(1)).unwrap_err().reason(),
            DecryptFailure::MalformedKeyId
        );
    }

    #[test]
    fn invalid_utf8_is_a_decryption_error() {
        let svc = service();
        let payload = svc.encrypt(&[0xff, 0xfe, 0xfd], TenantId(1)).unwrap();
        assert_eq!(
            svc.decrypt_to_string(&payload, TenantId(1)).unwrap_err().reason(),
            DecryptFailure::InvalidUtf8
        );
    }

    #[test]
    fn uses_injected_nonce_source() {
        struct Recording(Mutex<Vec<[u8; IV_SIZE]>>);

        impl NonceSource for Recording {
            fn fill_nonce(&self, iv: &mut [u8; IV_SIZE]) {
                let mut seen = self.0.lock().unwrap();
                iv[..8].copy_from_slice(&(seen.len() as u64).to_be_bytes());
                seen.push(*iv);
            }
        }

        let keys = Arc::new(KeyDerivationService::new(MasterKeyRing::new(1, MasterKey::generate())));
        let nonces = Arc::new(Recording(Mutex::new(Vec::new())));
        let svc = EncryptionService::with_nonce_source(keys, nonces.clone());

        let first = svc.encrypt(b"a", TenantId(1)).unwrap();
        let second = svc.encrypt(b"b", TenantId(1)).unwrap();
        let seen = nonces.0.lock().unwrap();
        assert_eq!(seen.as_slice(), &[first.iv, second.iv]);
    }
}
