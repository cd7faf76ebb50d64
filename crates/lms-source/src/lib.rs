//! Upstream LMS API client for lms-crm-sync.
//!
//! The sync core only sees the [`LmsApi`] trait. [`LmsClient`] implements it
//! over HTTP with the fixed inter-request pause the LMS rate limit requires
//! and retry with exponential backoff for transient failures.
//!
//! Endpoints used:
//!
//! - `GET api/v1/users`, `GET api/v1/users/id:{id}`
//! - `GET api/v1/courses`, `GET api/v1/courses/id:{id}`
//! - `GET api/v1/gettimeline/event_type:unitprogress_assignment_answered,unit_id:{id}`

mod client;
mod error;
pub mod types;

pub use client::{LmsApi, LmsClient, LmsConfig, ASSIGNMENT_ANSWERED_EVENT, DEFAULT_REQUEST_PAUSE};
pub use error::LmsError;
pub use types::{CourseDetail, CourseUnit, CourseUser, RawCourse, RawUser, TimelineEvent, UserCourse, UserDetail};
