//! Shared fixture for the end-to-end sync tests: one template course, one
//! scheduled course built from it, two enrolled learners.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use lms_crm_sync::testing::{InMemoryCrm, InMemoryLms};
use lms_crm_sync::SyncSettings;
use lms_source::{CourseDetail, CourseUnit, CourseUser, RawCourse, RawUser, UserCourse, UserDetail};

pub const TEMPLATE_COURSE: i64 = 10;
pub const SCHEDULED_COURSE: i64 = 11;
pub const LEARNERS: [i64; 2] = [5, 6];
pub const ASSIGNMENT_UNIT: i64 = 77;

pub const FIRST_RUN_MS: i64 = 1_710_000_000_000;
pub const SECOND_RUN_MS: i64 = 1_720_000_000_000;

pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter("lms_crm_sync=debug")
        .with_test_writer()
        .try_init()
        .ok();
}

pub fn at(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

pub fn settings() -> SyncSettings {
    SyncSettings::default()
}

/// A CRM that rejects creates colliding on the LMS keys, like the real
/// objects with unique key properties do.
pub fn crm() -> InMemoryCrm {
    let settings = settings();
    InMemoryCrm::new()
        .unique_on(&settings.learner_object_type, &["lms_user_id"])
        .unique_on(&settings.course_object_type, &["lms_course_id"])
        .unique_on(
            &settings.instance_object_type,
            &["lms_user_id", "lms_course_id"],
        )
}

pub fn lms() -> InMemoryLms {
    let lms = InMemoryLms::new();

    lms.add_course(
        RawCourse {
            id: TEMPLATE_COURSE,
            name: Some("Data Basics (Template)".to_string()),
            code: Some("1DB-T".to_string()),
            last_update_on: Some("1700000000000".to_string()),
            ..RawCourse::default()
        },
        CourseDetail {
            id: TEMPLATE_COURSE,
            ..CourseDetail::default()
        },
    );
    lms.add_course(
        RawCourse {
            id: SCHEDULED_COURSE,
            name: Some("Data Basics March".to_string()),
            code: Some("2DB-0324".to_string()),
            last_update_on: Some("1700000000000".to_string()),
            live_session: Some("2030-07-10 18:30:00".to_string()),
            ..RawCourse::default()
        },
        CourseDetail {
            id: SCHEDULED_COURSE,
            units: vec![CourseUnit {
                id: ASSIGNMENT_UNIT,
                unit_type: "Assignment".to_string(),
                name: Some("Final project".to_string()),
            }],
            users: LEARNERS.iter().map(|&id| CourseUser { id }).collect(),
        },
    );
    lms.set_timeline(ASSIGNMENT_UNIT, &[LEARNERS[0]]);

    for (id, first) in LEARNERS.into_iter().zip(["Ada", "Grace"]) {
        lms.add_user(
            RawUser {
                id,
                login: Some(first.to_lowercase()),
                first_name: Some(first.to_string()),
                last_name: Some("Example".to_string()),
                email: Some(format!("{}@example.com", first.to_lowercase())),
                status: Some("active".to_string()),
                last_updated_timestamp: Some("1700000000000".to_string()),
            },
            UserDetail {
                id,
                first_name: Some(first.to_string()),
                last_name: Some("Example".to_string()),
                email: Some(format!("{}@example.com", first.to_lowercase())),
                status: Some("active".to_string()),
                cohort_id: Some("ACME".to_string()),
                courses: vec![UserCourse {
                    id: SCHEDULED_COURSE,
                    name: Some("Data Basics March".to_string()),
                    completion_percentage: Some(40),
                    ..UserCourse::default()
                }],
            },
        );
    }

    lms
}
