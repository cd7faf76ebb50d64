//! SQLite staging store for lms-crm-sync.
//!
//! Holds, in a single file:
//!
//! - the staged snapshot (`learners`, `courses`, `enrollment_instances`),
//!   cleared at the start of every run
//! - the identity ledger (`learner_mapping`, `course_mapping`,
//!   `instance_mapping`), append-only and never purged
//! - the time cursor, via [`checkpoint::CheckpointStore`]
//! - the certificate-id ledger
//!
//! Losing the identity ledger means every record is created again on the
//! next run.

mod cursor;
mod error;
mod identity;
mod ledger;
mod query;
mod schema;
mod store;

pub use error::{IdentityConflict, StoreError};
pub use identity::IdentityOutcome;
pub use store::Store;
