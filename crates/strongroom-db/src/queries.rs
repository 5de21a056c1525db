use crate::models::AuditRow;
use crate::Database;
use anyhow::{Result, anyhow};
use rusqlite::{Connection, TransactionBehavior};
use strongroom_audit::{AuditStore, PendingEntry, StorageError, format_timestamp};
use strongroom_types::{AuditLogEntry, GENESIS_HASH, SubjectId};

impl AuditStore for Database {
    fn tip_hash(&self, subject: SubjectId) -> Result<Option<String>, StorageError> {
        self.with_conn(|conn| query_tip(conn, subject)).map_err(backend)
    }

    fn append_with(
        &self,
        subject: SubjectId,
        build: &dyn Fn(&str) -> PendingEntry,
    ) -> Result<u64, StorageError> {
        // The tip read, the build and the insert share one IMMEDIATE
        // transaction, so a writer on another connection waits for the commit.
        let inserted = self
            .with_conn_mut(|conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                let tip = query_tip(&tx, subject)?;
                let tip = tip.as_deref().unwrap_or(GENESIS_HASH);
                let entry = build(tip);
                if entry.subject_id != subject || entry.previous_hash != tip {
                    return Ok(None);
                }

                tx.execute(
                    "INSERT INTO audit_log (subject_id, actor_id, ip, user_agent, action, target_id, details, created_at, previous_hash, hash)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    rusqlite::params![
                        to_i64(subject.0)?,
                        to_i64(entry.actor.actor_id)?,
                        entry.actor.ip,
                        entry.actor.user_agent,
                        entry.action,
                        entry.target_id.map(to_i64).transpose()?,
                        serde_json::Value::Object(entry.details).to_string(),
                        format_timestamp(&entry.created_at),
                        entry.previous_hash,
                        entry.hash,
                    ],
                )?;
                let id = tx.last_insert_rowid();
                tx.commit()?;

                Ok(Some(u64::try_from(id)?))
            })
            .map_err(backend)?;

        inserted.ok_or(StorageError::TipMoved { subject })
    }

    fn entries(&self, subject: SubjectId) -> Result<Vec<AuditLogEntry>, StorageError> {
        let rows = self
            .with_conn(|conn| {
                query_rows(
                    conn,
                    &format!("SELECT {} FROM audit_log WHERE subject_id = ?1 ORDER BY id ASC", AuditRow::COLUMNS),
                    rusqlite::params![to_i64(subject.0)?],
                )
            })
            .map_err(backend)?;
        rows.into_iter().map(AuditLogEntry::try_from).collect()
    }

    fn page(&self, subject: SubjectId, limit: usize, offset: usize) -> Result<Vec<AuditLogEntry>, StorageError> {
        let rows = self
            .with_conn(|conn| {
                query_rows(
                    conn,
                    &format!(
                        "SELECT {} FROM audit_log WHERE subject_id = ?1 ORDER BY id DESC LIMIT ?2 OFFSET ?3",
                        AuditRow::COLUMNS
                    ),
                    rusqlite::params![
                        to_i64(subject.0)?,
                        i64::try_from(limit).unwrap_or(i64::MAX),
                        i64::try_from(offset).unwrap_or(i64::MAX),
                    ],
                )
            })
            .map_err(backend)?;
        rows.into_iter().map(AuditLogEntry::try_from).collect()
    }

    fn count(&self, subject: SubjectId) -> Result<usize, StorageError> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM audit_log WHERE subject_id = ?1",
                [to_i64(subject.0)?],
                |row| row.get(0),
            )?;
            Ok(usize::try_from(n)?)
        })
        .map_err(backend)
    }

    fn subjects(&self) -> Result<Vec<SubjectId>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT subject_id FROM audit_log ORDER BY subject_id")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, i64>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids.into_iter()
                .map(|id| -> Result<SubjectId> { Ok(SubjectId(u64::try_from(id)?)) })
                .collect::<Result<Vec<_>>>()
        })
        .map_err(backend)
    }
}

fn query_tip(conn: &Connection, subject: SubjectId) -> Result<Option<String>> {
    conn.query_row(
        "SELECT hash FROM audit_log WHERE subject_id = ?1 ORDER BY id DESC LIMIT 1",
        [to_i64(subject.0)?],
        |row| row.get(0),
    )
    .optional()
}

fn query_rows(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<AuditRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, AuditRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("id out of SQLite range: {}", value))
}

fn backend(e: anyhow::Error) -> StorageError {
    StorageError::Backend(format!("{:#}", e))
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use serde_json::json;
    use strongroom_audit::{AuditEvent, AuditLogService};
    use strongroom_types::{ActorContext, IntegrityFailure, IntegrityReport};

    use super::*;

    fn actor() -> ActorContext {
        ActorContext::new(100).with_ip("192.0.2.10")
    }

    fn open(dir: &tempfile::TempDir) -> Arc<Database> {
        Arc::new(Database::open(&dir.path().join("audit.db")).unwrap())
    }

    fn fill(service: &AuditLogService, subject: u64, n: u64) -> Vec<u64> {
        (0..n)
            .map(|i| {
                service
                    .log(
                        SubjectId(subject),
                        &actor(),
                        AuditEvent::new("message.sent").target(i).detail("preview", format!("msg {}", i)),
                    )
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn chain_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let ids = {
            let service = AuditLogService::with_system_clock(open(&dir));
            fill(&service, 1, 5)
        };

        let db = open(&dir);
        let service = AuditLogService::with_system_clock(db.clone());
        assert_eq!(service.verify_integrity(SubjectId(1)).unwrap(), IntegrityReport::intact(5));

        let entries = db.entries(SubjectId(1)).unwrap();
        assert_eq!(entries.iter().map(|e| e.id).collect::<Vec<_>>(), ids);
        assert_eq!(entries[0].previous_hash, GENESIS_HASH);
        assert_eq!(entries[3].details["preview"], "msg 3");

        // Appending after reopen continues the same chain
        fill(&service, 1, 1);
        assert_eq!(service.verify_integrity(SubjectId(1)).unwrap(), IntegrityReport::intact(6));
    }

    #[test]
    fn rows_cannot_be_updated_or_deleted() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let service = AuditLogService::with_system_clock(db.clone());
        fill(&service, 1, 2);

        db.with_conn(|conn| {
            assert!(conn.execute("UPDATE audit_log SET action = 'x' WHERE id = 1", []).is_err());
            assert!(conn.execute("DELETE FROM audit_log WHERE id = 1", []).is_err());
            Ok(())
        })
        .unwrap();
        assert_eq!(service.count(SubjectId(1)).unwrap(), 2);
        assert!(service.verify_integrity(SubjectId(1)).unwrap().valid);
    }

    #[test]
    fn tampering_behind_the_triggers_is_detected() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let service = AuditLogService::with_system_clock(db.clone());
        let ids = fill(&service, 1, 3);

        db.with_conn(|conn| {
            conn.execute_batch("DROP TRIGGER audit_log_no_update;")?;
            conn.execute(
                "UPDATE audit_log SET details = ?1 WHERE id = ?2",
                rusqlite::params![json!({"preview": "forged"}).to_string(), ids[1] as i64],
            )?;
            Ok(())
        })
        .unwrap();

        let report = service.verify_integrity(SubjectId(1)).unwrap();
        assert!(!report.valid);
        assert_eq!(report.broken_at, Some(2));
        assert!(matches!(report.details, Some(IntegrityFailure::HashMismatch { entry_id, .. }) if entry_id == ids[1]));
    }

    #[test]
    fn entry_not_extending_the_tip_is_refused() {
        let db = Database::open_in_memory().unwrap();

        let pending = |previous: &str, hash: &str| PendingEntry {
            subject_id: SubjectId(9),
            actor: actor(),
            action: "test".into(),
            target_id: None,
            details: Default::default(),
            created_at: chrono::Utc::now(),
            previous_hash: previous.into(),
            hash: hash.into(),
        };

        db.append_with(SubjectId(9), &|tip| pending(tip, "a")).unwrap();
        let err = db.append_with(SubjectId(9), &|_| pending(GENESIS_HASH, "b")).unwrap_err();
        assert!(matches!(err, StorageError::TipMoved { subject } if subject == SubjectId(9)));
        assert_eq!(db.count(SubjectId(9)).unwrap(), 1);
        assert_eq!(db.tip_hash(SubjectId(9)).unwrap().as_deref(), Some("a"));
    }

    #[test]
    fn pages_and_subjects() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let service = AuditLogService::with_system_clock(db.clone());
        let ids = fill(&service, 1, 10);
        fill(&service, 3, 1);

        let page: Vec<u64> = service.get_log(SubjectId(1), 3, 3).unwrap().iter().map(|e| e.id).collect();
        assert_eq!(page, vec![ids[6], ids[5], ids[4]]);
        assert_eq!(db.subjects().unwrap(), vec![SubjectId(1), SubjectId(3)]);
        assert_eq!(service.count(SubjectId(2)).unwrap(), 0);
    }

    #[test]
    fn separate_handles_never_fork_a_chain() {
        let dir = tempfile::tempdir().unwrap();
        open(&dir);

        // Each thread stands in for a separate process: its own connection and
        // its own service, so only SQLite coordinates them.
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let db = open(&dir);
                thread::spawn(move || {
                    let service = AuditLogService::with_system_clock(db);
                    for i in 0..25 {
                        service
                            .log(SubjectId(1), &ActorContext::new(t), AuditEvent::new("message.sent").target(i))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let service = AuditLogService::with_system_clock(open(&dir));
        assert_eq!(service.verify_integrity(SubjectId(1)).unwrap(), IntegrityReport::intact(100));
    }

    #[test]
    fn services_sharing_one_handle_never_lose_an_event() {
        let db = Arc::new(Database::open_in_memory().unwrap());

        let handles: Vec<_> = (0..2)
            .map(|t| {
                let service = AuditLogService::with_system_clock(db.clone());
                thread::spawn(move || {
                    for i in 0..500 {
                        service
                            .log(SubjectId(1), &ActorContext::new(t), AuditEvent::new("message.sent").target(i))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(db.count(SubjectId(1)).unwrap(), 1000);
        let service = AuditLogService::with_system_clock(db);
        assert_eq!(service.verify_integrity(SubjectId(1)).unwrap(), IntegrityReport::intact(1000));
    }
}
