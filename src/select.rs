//! Change selection: which upstream records are rebuilt this run.
//!
//! Courses are included when any schedule field is set, or when they were
//! modified after the cursor. The schedule rule keeps re-including a course
//! for as long as it has a schedule, so due dates and certificates get
//! recalculated without a modification bump. Learners are included only when
//! modified after the cursor. Enrollment instances are never checked on their
//! own; they follow from the courses and learners included here.

use checkpoint::TimeCursor;
use lms_source::{RawCourse, RawUser};
use sync_core::{opt_unix_millis, TimeParseError};

/// Outcome of change selection for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Include,
    Skip,
}

impl Selection {
    pub fn is_include(&self) -> bool {
        matches!(self, Selection::Include)
    }

    fn from_bool(include: bool) -> Self {
        if include {
            Selection::Include
        } else {
            Selection::Skip
        }
    }
}

/// Whether `modified` (raw upstream value) is strictly after the cursor.
/// An empty value is never newer.
pub fn modified_since(modified: Option<&str>, cursor: TimeCursor) -> Result<bool, TimeParseError> {
    Ok(opt_unix_millis(modified)?.is_some_and(|ms| ms > cursor.last_run_started_ms))
}

pub fn select_course(course: &RawCourse, cursor: TimeCursor) -> Result<Selection, TimeParseError> {
    if course.has_schedule() {
        return Ok(Selection::Include);
    }
    modified_since(course.last_update_on.as_deref(), cursor).map(Selection::from_bool)
}

pub fn select_learner(user: &RawUser, cursor: TimeCursor) -> Result<Selection, TimeParseError> {
    modified_since(user.last_updated_timestamp.as_deref(), cursor).map(Selection::from_bool)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CURSOR: TimeCursor = TimeCursor {
        last_run_started_ms: 1_700_000_000_000,
    };

    fn course(last_update_on: Option<&str>) -> RawCourse {
        RawCourse {
            id: 1,
            last_update_on: last_update_on.map(str::to_string),
            ..RawCourse::default()
        }
    }

    fn user(last_updated: Option<&str>) -> RawUser {
        RawUser {
            id: 5,
            login: None,
            first_name: None,
            last_name: None,
            email: None,
            status: None,
            last_updated_timestamp: last_updated.map(str::to_string),
        }
    }

    #[test]
    fn test_course_with_schedule_is_always_included() {
        let mut raw = course(Some("1"));
        raw.cohort_id = Some("C-1".to_string());
        assert_eq!(select_course(&raw, CURSOR).unwrap(), Selection::Include);
    }

    #[test]
    fn test_course_without_schedule_follows_timestamp() {
        assert_eq!(
            select_course(&course(Some("1700000000001")), CURSOR).unwrap(),
            Selection::Include
        );
        assert_eq!(
            select_course(&course(Some("1700000000000")), CURSOR).unwrap(),
            Selection::Skip
        );
        assert_eq!(
            select_course(&course(Some("24/11/2030, 14:53:44")), CURSOR).unwrap(),
            Selection::Include
        );
        assert_eq!(select_course(&course(None), CURSOR).unwrap(), Selection::Skip);
        assert_eq!(select_course(&course(Some("")), CURSOR).unwrap(), Selection::Skip);
    }

    #[test]
    fn test_course_with_garbage_timestamp_is_an_error() {
        assert!(select_course(&course(Some("soon")), CURSOR).is_err());
    }

    #[test]
    fn test_learner_selection() {
        assert!(select_learner(&user(Some("1700000000500")), CURSOR)
            .unwrap()
            .is_include());
        assert!(!select_learner(&user(Some("1600000000000")), CURSOR)
            .unwrap()
            .is_include());
        assert!(!select_learner(&user(None), CURSOR).unwrap().is_include());
    }

    #[test]
    fn test_epoch_cursor_includes_every_timestamped_learner() {
        assert!(select_learner(&user(Some("1")), TimeCursor::EPOCH)
            .unwrap()
            .is_include());
    }
}
