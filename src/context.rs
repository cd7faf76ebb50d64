//! Per-run state shared by the staging phases.
//!
//! Everything here lives for one run only and is passed explicitly to the
//! phases that need it. Nothing is process-wide.

use std::collections::{BTreeMap, BTreeSet};

use checkpoint::TimeCursor;

use crate::template::TemplateCatalog;

/// What the instance phase needs to know about an included course.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CourseSession {
    pub code: Option<String>,
    pub live_session_ms: Option<i64>,
    pub session_time: Option<String>,
    /// Learners who answered an assignment unit of the course
    pub assignment_completers: BTreeSet<i64>,
}

#[derive(Debug, Clone)]
pub struct RunContext {
    /// Start of this run, epoch milliseconds. Becomes the next cursor.
    pub run_started_ms: i64,
    pub cursor: TimeCursor,
    /// Remote template options, code to label
    pub templates: TemplateCatalog,
    /// Learners whose enrollments are rebuilt this run
    pub student_ids: BTreeSet<i64>,
    /// Courses included this run, by LMS course id
    pub course_sessions: BTreeMap<i64, CourseSession>,
}

impl RunContext {
    pub fn new(run_started_ms: i64, cursor: TimeCursor, templates: TemplateCatalog) -> Self {
        Self {
            run_started_ms,
            cursor,
            templates,
            student_ids: BTreeSet::new(),
            course_sessions: BTreeMap::new(),
        }
    }

    pub fn is_assignment_complete(&self, course_id: i64, learner_id: i64) -> bool {
        self.course_sessions
            .get(&course_id)
            .is_some_and(|session| session.assignment_completers.contains(&learner_id))
    }
}
