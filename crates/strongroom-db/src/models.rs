//! Database row types. These map directly to SQLite rows.
//! Conversion into `AuditLogEntry` validates everything the chain relies on.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use strongroom_audit::StorageError;
use strongroom_types::{ActorContext, AuditLogEntry, SubjectId};

pub struct AuditRow {
    pub id: i64,
    pub subject_id: i64,
    pub actor_id: i64,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub action: String,
    pub target_id: Option<i64>,
    pub details: String,
    pub created_at: String,
    pub previous_hash: String,
    pub hash: String,
}

impl AuditRow {
    pub const COLUMNS: &'static str = "id, subject_id, actor_id, ip, user_agent, action, target_id, details, created_at, previous_hash, hash";

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            subject_id: row.get(1)?,
            actor_id: row.get(2)?,
            ip: row.get(3)?,
            user_agent: row.get(4)?,
            action: row.get(5)?,
            target_id: row.get(6)?,
            details: row.get(7)?,
            created_at: row.get(8)?,
            previous_hash: row.get(9)?,
            hash: row.get(10)?,
        })
    }
}

impl TryFrom<AuditRow> for AuditLogEntry {
    type Error = StorageError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let id = unsigned(row.id, row.id, "id")?;
        let corrupt = |reason: String| StorageError::Corrupt { id, reason };

        let details: Map<String, Value> = serde_json::from_str(&row.details)
            .map_err(|e| corrupt(format!("details is not a JSON object: {}", e)))?;
        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map_err(|e| corrupt(format!("bad created_at {:?}: {}", row.created_at, e)))?
            .with_timezone(&Utc);

        Ok(AuditLogEntry {
            id,
            subject_id: SubjectId(unsigned(row.id, row.subject_id, "subject_id")?),
            actor: ActorContext {
                actor_id: unsigned(row.id, row.actor_id, "actor_id")?,
                ip: row.ip,
                user_agent: row.user_agent,
            },
            action: row.action,
            target_id: row
                .target_id
                .map(|t| unsigned(row.id, t, "target_id"))
                .transpose()?,
            details,
            created_at,
            previous_hash: row.previous_hash,
            hash: row.hash,
        })
    }
}

fn unsigned(row_id: i64, value: i64, column: &str) -> Result<u64, StorageError> {
    u64::try_from(value).map_err(|_| StorageError::Corrupt {
        id: row_id.max(0) as u64,
        reason: format!("negative {}: {}", column, value),
    })
}
