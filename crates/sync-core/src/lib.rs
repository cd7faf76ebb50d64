//! Core types for the lms-crm-sync framework.
//!
//! This crate provides the foundational types shared by the staging store,
//! the upstream LMS client, the CRM client and the reconciliation phases:
//!
//! - [`EntityKind`] - Closed set of synchronized entity types
//! - [`LocalKey`] - Source-system identity of a staged row
//! - [`RemoteId`] - Identifier assigned by the CRM on creation
//! - [`Learner`], [`Course`], [`EnrollmentInstance`] - Staged row shapes
//! - [`to_unix_millis`] - Timestamp normalization to epoch milliseconds
//! - [`RetryConfig`] - Backoff policy shared by the HTTP clients
//!
//! # Architecture
//!
//! ```text
//! sync-core (this crate)
//!    │
//!    ├─── checkpoint     (time cursor)
//!    ├─── staging        (SQLite staging tables + identity ledger)
//!    ├─── lms-source     (upstream LMS client)
//!    ├─── crm-sink       (CRM batch client)
//!    └─── docgen-client  (certificate documents)
//! ```

pub mod retry;
pub mod time;
pub mod types;
pub mod values;

// Re-exports for convenience
pub use retry::RetryConfig;
pub use time::{
    localize_session_datetime, midnight_millis, opt_unix_millis, to_unix_millis, SessionDateTime,
    TimeParseError,
};
pub use types::{EntityKind, LocalKey, PropertyMap, RemoteId};
pub use values::{Course, EnrollmentInstance, Learner};
