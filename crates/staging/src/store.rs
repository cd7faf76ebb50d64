//! The SQLite-backed staging store.

use std::path::Path;

use rusqlite::{params, Connection};
use sync_core::{Course, EnrollmentInstance, EntityKind, Learner};

use crate::error::{persistence, StoreError};
use crate::schema;

/// Local relational store: staged snapshot, identity ledger, time cursor and
/// certificate-id ledger in one file.
///
/// A single connection is shared by every phase of a run and used
/// sequentially.
pub struct Store {
    pub(crate) conn: Connection,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(persistence)?;
        let mut store = Self { conn };
        schema::bootstrap(&mut store.conn)?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(persistence)?;
        let mut store = Self { conn };
        schema::bootstrap(&mut store.conn)?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<u32, StoreError> {
        schema::current_schema_version(&self.conn)
    }

    /// Clear the staged snapshot. Identity ledger, cursor and certificate
    /// ids are untouched.
    pub fn rebuild(&mut self) -> Result<(), StoreError> {
        let tx = self.conn.transaction().map_err(persistence)?;
        for kind in EntityKind::ALL {
            tx.execute(&format!("DELETE FROM {}", kind.staging_table()), [])
                .map_err(persistence)?;
        }
        tx.commit().map_err(persistence)?;
        tracing::debug!("Cleared staging tables");
        Ok(())
    }

    pub fn upsert_learner(&self, learner: &Learner) -> Result<(), StoreError> {
        self.conn
            .execute(
                "
                INSERT INTO learners (
                    lms_user_id, firstname, lastname, login, email, membership_status, last_updated
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(lms_user_id) DO UPDATE SET
                    firstname = excluded.firstname,
                    lastname = excluded.lastname,
                    login = excluded.login,
                    email = excluded.email,
                    membership_status = excluded.membership_status,
                    last_updated = excluded.last_updated
                ",
                params![
                    learner.lms_user_id,
                    learner.first_name,
                    learner.last_name,
                    learner.login,
                    learner.email,
                    learner.status,
                    learner.last_updated,
                ],
            )
            .map_err(persistence)?;
        Ok(())
    }

    pub fn upsert_course(&self, course: &Course) -> Result<(), StoreError> {
        self.conn
            .execute(
                "
                INSERT INTO courses (
                    lms_course_id, course_name, code, description, start_date, end_date,
                    live_session_datetime, session_time, assignment_due_date, cohort_id,
                    course_template_code, course_template_name, trigger_datetime
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                ON CONFLICT(lms_course_id) DO UPDATE SET
                    course_name = excluded.course_name,
                    code = excluded.code,
                    description = excluded.description,
                    start_date = excluded.start_date,
                    end_date = excluded.end_date,
                    live_session_datetime = excluded.live_session_datetime,
                    session_time = excluded.session_time,
                    assignment_due_date = excluded.assignment_due_date,
                    cohort_id = excluded.cohort_id,
                    course_template_code = excluded.course_template_code,
                    course_template_name = excluded.course_template_name,
                    trigger_datetime = excluded.trigger_datetime
                ",
                params![
                    course.lms_course_id,
                    course.course_name,
                    course.code,
                    course.description,
                    course.start_date,
                    course.end_date,
                    course.live_session_datetime,
                    course.session_time,
                    course.assignment_due_date,
                    course.cohort_id,
                    course.course_template_code,
                    course.course_template_name,
                    course.trigger_datetime,
                ],
            )
            .map_err(persistence)?;
        Ok(())
    }

    pub fn upsert_instance(&self, instance: &EnrollmentInstance) -> Result<(), StoreError> {
        let assignment_complete = if instance.assignment_complete {
            "Yes"
        } else {
            "No"
        };
        self.conn
            .execute(
                "
                INSERT INTO enrollment_instances (
                    lms_user_id, lms_course_id, instance_name, firstname, lastname, email,
                    course_name, code, company_cohort_id, completed_on, completion_status,
                    completion_percent, live_session_datetime, session_time, role, status,
                    total_time, total_time_seconds, last_accessed_unit_url, assignment_complete
                ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                    ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20
                )
                ON CONFLICT(lms_user_id, lms_course_id) DO UPDATE SET
                    instance_name = excluded.instance_name,
                    firstname = excluded.firstname,
                    lastname = excluded.lastname,
                    email = excluded.email,
                    course_name = excluded.course_name,
                    code = excluded.code,
                    company_cohort_id = excluded.company_cohort_id,
                    completed_on = excluded.completed_on,
                    completion_status = excluded.completion_status,
                    completion_percent = excluded.completion_percent,
                    live_session_datetime = excluded.live_session_datetime,
                    session_time = excluded.session_time,
                    role = excluded.role,
                    status = excluded.status,
                    total_time = excluded.total_time,
                    total_time_seconds = excluded.total_time_seconds,
                    last_accessed_unit_url = excluded.last_accessed_unit_url,
                    assignment_complete = excluded.assignment_complete
                ",
                params![
                    instance.lms_user_id,
                    instance.lms_course_id,
                    instance.instance_name,
                    instance.first_name,
                    instance.last_name,
                    instance.email,
                    instance.course_name,
                    instance.code,
                    instance.company_cohort_id,
                    instance.completed_on,
                    instance.completion_status,
                    instance.completion_percent,
                    instance.live_session_datetime,
                    instance.session_time,
                    instance.role,
                    instance.status,
                    instance.total_time,
                    instance.total_time_seconds,
                    instance.last_accessed_unit_url,
                    assignment_complete,
                ],
            )
            .map_err(persistence)?;
        Ok(())
    }

    /// Number of staged rows of `kind`.
    pub fn staged_count(&self, kind: EntityKind) -> Result<usize, StoreError> {
        self.count(kind.staging_table())
    }

    pub(crate) fn count(&self, table: &'static str) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .map_err(persistence)?;
        usize::try_from(count).map_err(|_| StoreError::CorruptRow {
            table,
            message: format!("row count '{count}' cannot be represented as usize"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn course(id: i64, name: &str) -> Course {
        Course {
            lms_course_id: id,
            course_name: Some(name.to_string()),
            ..Course::default()
        }
    }

    #[test]
    fn test_bootstrap_sets_schema_version() {
        let store = Store::in_memory().unwrap();
        assert_eq!(store.schema_version().unwrap(), 1);
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let store = Store::in_memory().unwrap();
        store.upsert_course(&course(1, "Intro")).unwrap();
        store.upsert_course(&course(1, "Intro v2")).unwrap();
        store.upsert_course(&course(2, "Advanced")).unwrap();

        assert_eq!(store.staged_count(EntityKind::Course).unwrap(), 2);
        let name: String = store
            .conn
            .query_row(
                "SELECT course_name FROM courses WHERE lms_course_id = 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(name, "Intro v2");
    }

    #[test]
    fn test_instance_upsert_by_composite_key() {
        let store = Store::in_memory().unwrap();
        let mut instance = EnrollmentInstance {
            lms_user_id: 5,
            lms_course_id: 9,
            instance_name: "Lovelace Ada: Intro".to_string(),
            ..EnrollmentInstance::default()
        };
        store.upsert_instance(&instance).unwrap();
        instance.assignment_complete = true;
        store.upsert_instance(&instance).unwrap();

        assert_eq!(store.staged_count(EntityKind::EnrollmentInstance).unwrap(), 1);
        let flag: String = store
            .conn
            .query_row(
                "SELECT assignment_complete FROM enrollment_instances",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(flag, "Yes");
    }

    #[test]
    fn test_rebuild_clears_snapshot_only() {
        let mut store = Store::in_memory().unwrap();
        store.upsert_course(&course(1, "Intro")).unwrap();
        store
            .record_identity(&sync_core::LocalKey::Course(1), &"c-1".into())
            .unwrap();

        store.rebuild().unwrap();

        assert_eq!(store.staged_count(EntityKind::Course).unwrap(), 0);
        assert_eq!(store.mapping_count(EntityKind::Course).unwrap(), 1);
    }

    #[test]
    fn test_state_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sync.db");
        {
            let store = Store::open(&path).unwrap();
            store
                .record_identity(&sync_core::LocalKey::Learner(3), &"501".into())
                .unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert_eq!(store.schema_version().unwrap(), 1);
        assert_eq!(
            store
                .lookup_remote_id(&sync_core::LocalKey::Learner(3))
                .unwrap(),
            Some("501".into())
        );
    }
}
