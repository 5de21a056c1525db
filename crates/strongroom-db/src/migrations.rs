use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);"
    )?;

    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Audit DB: running migration v1 (audit_log)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE audit_log (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                subject_id      INTEGER NOT NULL,
                actor_id        INTEGER NOT NULL,
                ip              TEXT,
                user_agent      TEXT,
                action          TEXT NOT NULL,
                target_id       INTEGER,
                details         TEXT NOT NULL DEFAULT '{}',
                created_at      TEXT NOT NULL,
                previous_hash   TEXT NOT NULL,
                hash            TEXT NOT NULL
            );

            CREATE INDEX idx_audit_log_subject
                ON audit_log(subject_id, id);

            -- Rows are written once and never changed
            CREATE TRIGGER audit_log_no_update
                BEFORE UPDATE ON audit_log
            BEGIN
                SELECT RAISE(ABORT, 'audit_log is append-only');
            END;

            CREATE TRIGGER audit_log_no_delete
                BEFORE DELETE ON audit_log
            BEGIN
                SELECT RAISE(ABORT, 'audit_log is append-only');
            END;

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            "
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
