//! Schema bootstrap and migrations.

use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::error::{persistence, StoreError};

pub(crate) const CURRENT_SCHEMA_VERSION: u32 = 1;

pub(crate) fn bootstrap(conn: &mut Connection) -> Result<(), StoreError> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(persistence)?;

    let current = current_schema_version(conn)?;
    if current > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchemaVersion {
            supported: CURRENT_SCHEMA_VERSION,
            found: current,
        });
    }

    for version in (current + 1)..=CURRENT_SCHEMA_VERSION {
        let tx = conn.transaction().map_err(persistence)?;
        apply_migration(&tx, version)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))",
            params![version],
        )
        .map_err(persistence)?;
        tx.commit().map_err(persistence)?;
        tracing::debug!("Applied staging schema migration {version}");
    }

    Ok(())
}

pub(crate) fn current_schema_version(conn: &Connection) -> Result<u32, StoreError> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations' LIMIT 1",
            [],
            |_| Ok(()),
        )
        .optional()
        .map_err(persistence)?
        .is_some();
    if !exists {
        return Ok(0);
    }

    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .map_err(persistence)
}

fn apply_migration(tx: &Transaction<'_>, version: u32) -> Result<(), StoreError> {
    match version {
        1 => tx
            .execute_batch(
                "
                CREATE TABLE schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );

                -- Working snapshot, cleared at the start of every run.
                CREATE TABLE learners (
                    lms_user_id INTEGER PRIMARY KEY,
                    firstname TEXT,
                    lastname TEXT,
                    login TEXT,
                    email TEXT,
                    membership_status TEXT,
                    last_updated INTEGER
                );

                CREATE TABLE courses (
                    lms_course_id INTEGER PRIMARY KEY,
                    course_name TEXT,
                    code TEXT,
                    description TEXT,
                    start_date INTEGER,
                    end_date INTEGER,
                    live_session_datetime INTEGER,
                    session_time TEXT,
                    assignment_due_date INTEGER,
                    cohort_id TEXT,
                    course_template_code TEXT,
                    course_template_name TEXT,
                    trigger_datetime INTEGER
                );

                CREATE TABLE enrollment_instances (
                    lms_user_id INTEGER NOT NULL,
                    lms_course_id INTEGER NOT NULL,
                    instance_name TEXT NOT NULL,
                    firstname TEXT,
                    lastname TEXT,
                    email TEXT,
                    course_name TEXT,
                    code TEXT,
                    company_cohort_id TEXT,
                    completed_on INTEGER,
                    completion_status TEXT,
                    completion_percent INTEGER,
                    live_session_datetime INTEGER,
                    session_time TEXT,
                    role TEXT,
                    status TEXT,
                    total_time TEXT,
                    total_time_seconds INTEGER,
                    last_accessed_unit_url TEXT,
                    assignment_complete TEXT NOT NULL DEFAULT 'No',
                    PRIMARY KEY (lms_user_id, lms_course_id)
                );

                -- Identity ledger. Append-only, never purged.
                CREATE TABLE learner_mapping (
                    lms_user_id INTEGER PRIMARY KEY,
                    remote_id TEXT NOT NULL UNIQUE,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE course_mapping (
                    lms_course_id INTEGER PRIMARY KEY,
                    remote_id TEXT NOT NULL UNIQUE,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE instance_mapping (
                    lms_user_id INTEGER NOT NULL,
                    lms_course_id INTEGER NOT NULL,
                    remote_id TEXT NOT NULL UNIQUE,
                    created_at TEXT NOT NULL,
                    PRIMARY KEY (lms_user_id, lms_course_id)
                );

                CREATE TABLE time_cursor (
                    source_type TEXT PRIMARY KEY,
                    checkpoint_data TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE certificate_ids (
                    cert_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    remote_instance_id TEXT NOT NULL UNIQUE,
                    issued_at TEXT NOT NULL
                );
                ",
            )
            .map_err(persistence),
        other => Err(StoreError::Persistence(format!(
            "no migration defined for schema version {other}"
        ))),
    }
}
