use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::SubjectId;
use crate::models::ActorContext;

/// `previous_hash` of the first entry in every chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One persisted link of a subject's audit chain. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: u64,
    pub subject_id: SubjectId,
    pub actor: ActorContext,
    pub action: String,
    pub target_id: Option<u64>,
    pub details: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub previous_hash: String,
    pub hash: String,
}

/// Result of walking a subject's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub valid: bool,
    pub total_entries: usize,
    /// 1-based position of the first bad entry.
    pub broken_at: Option<usize>,
    pub details: Option<IntegrityFailure>,
}

impl IntegrityReport {
    pub fn intact(total_entries: usize) -> Self {
        Self {
            valid: true,
            total_entries,
            broken_at: None,
            details: None,
        }
    }

    pub fn broken(total_entries: usize, position: usize, failure: IntegrityFailure) -> Self {
        Self {
            valid: false,
            total_entries,
            broken_at: Some(position),
            details: Some(failure),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityFailure {
    /// Stored hash differs from the hash recomputed over the stored fields.
    HashMismatch {
        entry_id: u64,
        expected: String,
        stored: String,
    },
    /// Stored `previous_hash` does not point at the preceding entry.
    BrokenLink {
        entry_id: u64,
        expected_previous: String,
        stored_previous: String,
    },
}

impl IntegrityFailure {
    pub fn entry_id(&self) -> u64 {
        match self {
            Self::HashMismatch { entry_id, .. } | Self::BrokenLink { entry_id, .. } => *entry_id,
        }
    }
}

impl fmt::Display for IntegrityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HashMismatch { entry_id, expected, stored } => write!(
                f,
                "hash mismatch at entry {}: expected {}, stored {}",
                entry_id, expected, stored
            ),
            Self::BrokenLink { entry_id, expected_previous, stored_previous } => write!(
                f,
                "broken link at entry {}: previous hash should be {}, stored {}",
                entry_id, expected_previous, stored_previous
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_is_64_zeros() {
        assert_eq!(GENESIS_HASH.len(), 64);
        assert!(GENESIS_HASH.chars().all(|c| c == '0'));
    }

    #[test]
    fn broken_report_carries_position_and_reason() {
        let failure = IntegrityFailure::HashMismatch {
            entry_id: 12,
            expected: "aa".into(),
            stored: "bb".into(),
        };
        let report = IntegrityReport::broken(3, 2, failure.clone());
        assert!(!report.valid);
        assert_eq!(report.broken_at, Some(2));
        assert_eq!(report.details.as_ref().map(IntegrityFailure::entry_id), Some(12));
        assert!(failure.to_string().starts_with("hash mismatch at entry 12"));
    }

    #[test]
    fn failure_serializes_with_kind_tag() {
        let failure = IntegrityFailure::BrokenLink {
            entry_id: 4,
            expected_previous: "x".into(),
            stored_previous: "y".into(),
        };
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "broken_link");
        assert_eq!(json["entry_id"], 4);
    }
}
