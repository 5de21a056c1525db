//! Canonical record encoding and chain hashing.
//!
//! The record is a JSON object with keys sorted at every depth, no
//! insignificant whitespace, UTF-8, and `created_at` in RFC 3339 with
//! microsecond precision and a `Z` suffix:
//!
//! ```text
//! {"action":"message.sent","actor_id":100,"created_at":"2026-01-05T10:00:00.000000Z",
//!  "details":{"preview":"Hello"},"ip":null,"subject_id":1,"target_id":1,"user_agent":null}
//! ```
//!
//! `hash = hex(SHA-256(previous_hash || record))`. This encoding is part of
//! every stored chain and must not change.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use strongroom_types::{ActorContext, AuditLogEntry, SubjectId};

/// The hashed fields of an entry, borrowed from either a stored or a pending row.
pub struct ChainFields<'a> {
    pub subject_id: SubjectId,
    pub actor: &'a ActorContext,
    pub action: &'a str,
    pub target_id: Option<u64>,
    pub details: &'a Map<String, Value>,
    pub created_at: &'a DateTime<Utc>,
}

impl<'a> From<&'a AuditLogEntry> for ChainFields<'a> {
    fn from(entry: &'a AuditLogEntry) -> Self {
        Self {
            subject_id: entry.subject_id,
            actor: &entry.actor,
            action: &entry.action,
            target_id: entry.target_id,
            details: &entry.details,
            created_at: &entry.created_at,
        }
    }
}

pub fn canonical_record(fields: &ChainFields<'_>) -> String {
    let optional_str = |v: &Option<String>| v.clone().map_or(Value::Null, Value::String);

    let mut record = Map::new();
    record.insert("action".into(), Value::String(fields.action.to_string()));
    record.insert("actor_id".into(), Value::from(fields.actor.actor_id));
    record.insert("created_at".into(), Value::String(format_timestamp(fields.created_at)));
    record.insert("details".into(), Value::Object(fields.details.clone()));
    record.insert("ip".into(), optional_str(&fields.actor.ip));
    record.insert("subject_id".into(), Value::from(fields.subject_id.0));
    record.insert("target_id".into(), fields.target_id.map_or(Value::Null, Value::from));
    record.insert("user_agent".into(), optional_str(&fields.actor.user_agent));

    let mut out = String::new();
    write_canonical(&Value::Object(record), &mut out);
    out
}

pub fn chain_hash(previous_hash: &str, canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(previous_hash.as_bytes());
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Recompute an entry's hash from its stored `previous_hash` and fields.
pub fn entry_hash(entry: &AuditLogEntry) -> String {
    chain_hash(&entry.previous_hash, &canonical_record(&entry.into()))
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// Sorted explicitly rather than relying on serde_json's map ordering, which
// flips to insertion order if any crate in the graph enables `preserve_order`.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
