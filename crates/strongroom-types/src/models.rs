use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const IV_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

const ENVELOPE_SEPARATOR: char = '$';

/// Output of one AES-256-GCM encryption. Callers embed it into their own rows;
/// the core never persists it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_SIZE],
    pub tag: [u8; TAG_SIZE],
    pub key_id: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed payload envelope")]
pub struct MalformedEnvelope;

impl EncryptedPayload {
    /// Single-column storage form: `key_id$iv$tag$ciphertext`, binary parts base64.
    pub fn to_envelope(&self) -> String {
        format!(
            "{key_id}{sep}{iv}{sep}{tag}{sep}{ct}",
            key_id = self.key_id,
            iv = BASE64.encode(self.iv),
            tag = BASE64.encode(self.tag),
            ct = BASE64.encode(&self.ciphertext),
            sep = ENVELOPE_SEPARATOR,
        )
    }

    pub fn from_envelope(encoded: &str) -> Result<Self, MalformedEnvelope> {
        let mut parts = encoded.split(ENVELOPE_SEPARATOR);
        let (Some(key_id), Some(iv), Some(tag), Some(ct), None) =
            (parts.next(), parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(MalformedEnvelope);
        };

        if key_id.is_empty() {
            return Err(MalformedEnvelope);
        }

        let iv: [u8; IV_SIZE] = BASE64
            .decode(iv)
            .map_err(|_| MalformedEnvelope)?
            .try_into()
            .map_err(|_| MalformedEnvelope)?;
        let tag: [u8; TAG_SIZE] = BASE64
            .decode(tag)
            .map_err(|_| MalformedEnvelope)?
            .try_into()
            .map_err(|_| MalformedEnvelope)?;
        let ciphertext = BASE64.decode(ct).map_err(|_| MalformedEnvelope)?;

        Ok(Self {
            ciphertext,
            iv,
            tag,
            key_id: key_id.to_string(),
        })
    }
}

/// Who performed an audited action. Passed explicitly by the caller instead of
/// being pulled from an ambient request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub actor_id: u64,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ActorContext {
    pub fn new(actor_id: u64) -> Self {
        Self {
            actor_id,
            ip: None,
            user_agent: None,
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EncryptedPayload {
        EncryptedPayload {
            ciphertext: b"opaque bytes".to_vec(),
            iv: [7u8; IV_SIZE],
            tag: [9u8; TAG_SIZE],
            key_id: "t1.v1".into(),
        }
    }

    #[test]
    fn envelope_roundtrip() {
        let payload = sample();
        let encoded = payload.to_envelope();
        assert!(encoded.starts_with("t1.v1$"));
        assert_eq!(EncryptedPayload::from_envelope(&encoded).unwrap(), payload);
    }

    #[test]
    fn envelope_with_empty_ciphertext() {
        let payload = EncryptedPayload {
            ciphertext: vec![],
            ..sample()
        };
        let encoded = payload.to_envelope();
        assert!(encoded.ends_with('$'));
        assert_eq!(EncryptedPayload::from_envelope(&encoded).unwrap(), payload);
    }

    #[test]
    fn envelope_rejects_wrong_shapes() {
        let good = sample().to_envelope();
        assert!(EncryptedPayload::from_envelope("").is_err());
        assert!(EncryptedPayload::from_envelope("t1.v1$AAAA").is_err());
        assert!(EncryptedPayload::from_envelope(&format!("{}$extra", good)).is_err());

        // IV of the wrong length
        let short_iv = format!("t1.v1${}${}$", BASE64.encode([0u8; 8]), BASE64.encode([0u8; TAG_SIZE]));
        assert_eq!(EncryptedPayload::from_envelope(&short_iv), Err(MalformedEnvelope));
    }

    #[test]
    fn actor_context_builder() {
        let actor = ActorContext::new(100)
            .with_ip("10.0.0.1")
            .with_user_agent("curl/8.0");
        assert_eq!(actor.actor_id, 100);
        assert_eq!(actor.ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(actor.user_agent.as_deref(), Some("curl/8.0"));
    }
}
