use std::fmt;

use serde::{Deserialize, Serialize};

// -- Tenants --

/// Tenant whose data-at-rest is isolated under its own derived key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub u64);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TenantId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// -- Audit subjects --

/// The thing an audit chain is about: a conversation, a document, a case file.
/// Every subject owns an independent hash chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(pub u64);

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SubjectId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// -- Key identifiers --

/// Identifies the exact derivation parameters behind a ciphertext.
///
/// Rendered as `t<tenant>.v<version>`, e.g. `t42.v3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId {
    pub tenant_id: TenantId,
    pub version: u32,
}

impl KeyId {
    pub fn new(tenant_id: TenantId, version: u32) -> Self {
        Self { tenant_id, version }
    }

    /// Parse the `t<tenant>.v<version>` form. Returns `None` on anything else.
    pub fn parse(s: &str) -> Option<Self> {
        let (tenant, version) = s.strip_prefix('t')?.split_once(".v")?;
        if tenant.is_empty() || version.is_empty() {
            return None;
        }
        // Reject signs and leading zeros so each key has exactly one textual form
        let canonical = |part: &str| part.bytes().all(|b| b.is_ascii_digit()) && (part == "0" || !part.starts_with('0'));
        if !canonical(tenant) || !canonical(version) {
            return None;
        }
        Some(Self {
            tenant_id: TenantId(tenant.parse().ok()?),
            version: version.parse().ok()?,
        })
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}.v{}", self.tenant_id, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_id_display_and_parse_agree() {
        let id = KeyId::new(TenantId(42), 3);
        assert_eq!(id.to_string(), "t42.v3");
        assert_eq!(KeyId::parse("t42.v3"), Some(id));
    }

    #[test]
    fn key_id_rejects_malformed_input() {
        for bad in ["", "t", "42.v3", "t42v3", "t42.v", "t.v3", "t-1.v3", "t42.v+3", "t042.v3", "t42.v3x"] {
            assert_eq!(KeyId::parse(bad), None, "accepted {:?}", bad);
        }
    }

    #[test]
    fn ids_serialize_as_plain_numbers() {
        assert_eq!(serde_json::to_string(&TenantId(7)).unwrap(), "7");
        assert_eq!(serde_json::to_string(&SubjectId(9)).unwrap(), "9");
    }
}
