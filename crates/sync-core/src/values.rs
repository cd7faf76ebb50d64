//! Staged row representations.
//!
//! These are the transformed, CRM-ready shapes written to the staging tables.
//! Dates are already epoch milliseconds. Rows reference each other only
//! through LMS ids; joins happen at query time in the staging store.

use serde::{Deserialize, Serialize};

use crate::types::LocalKey;

/// An LMS user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Learner {
    pub lms_user_id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub login: Option<String>,
    pub email: Option<String>,
    /// Account status (`active`, `inactive`), synced as the membership status
    pub status: Option<String>,
    /// Source-supplied last modification, epoch milliseconds
    pub last_updated: Option<i64>,
}

impl Learner {
    pub fn key(&self) -> LocalKey {
        LocalKey::Learner(self.lms_user_id)
    }
}

/// An LMS course with its scheduling fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub lms_course_id: i64,
    pub course_name: Option<String>,
    pub code: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
    pub live_session_datetime: Option<i64>,
    /// Wall-clock live session time in the session zone, e.g. `18:30:00 EDT`
    pub session_time: Option<String>,
    pub assignment_due_date: Option<i64>,
    pub cohort_id: Option<String>,
    /// Template code parsed from the course code
    pub course_template_code: Option<String>,
    /// Resolved enumerated option value on the CRM, `None` when unresolved
    pub course_template_name: Option<String>,
    /// Start of the run that staged this row, epoch milliseconds
    pub trigger_datetime: Option<i64>,
}

impl Course {
    pub fn key(&self) -> LocalKey {
        LocalKey::Course(self.lms_course_id)
    }
}

/// One learner taking one course.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentInstance {
    pub lms_user_id: i64,
    pub lms_course_id: i64,
    /// Display name: `"{last} {first}: {course name}"`
    pub instance_name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub course_name: Option<String>,
    pub code: Option<String>,
    pub company_cohort_id: Option<String>,
    pub completed_on: Option<i64>,
    pub completion_status: Option<String>,
    pub completion_percent: Option<i64>,
    pub live_session_datetime: Option<i64>,
    pub session_time: Option<String>,
    pub role: Option<String>,
    pub status: Option<String>,
    pub total_time: Option<String>,
    pub total_time_seconds: Option<i64>,
    pub last_accessed_unit_url: Option<String>,
    /// Whether the learner answered the course assignment
    pub assignment_complete: bool,
}

impl EnrollmentInstance {
    pub fn key(&self) -> LocalKey {
        LocalKey::EnrollmentInstance {
            learner_id: self.lms_user_id,
            course_id: self.lms_course_id,
        }
    }

    /// Build the display name from learner and course names.
    pub fn display_name(first_name: &str, last_name: &str, course_name: &str) -> String {
        format!("{last_name} {first_name}: {course_name}")
    }
}
