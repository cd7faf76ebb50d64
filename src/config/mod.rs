//! Run configuration that is not plain CLI flags.

mod duration;
mod queries;

pub use duration::parse_duration;
pub use queries::QuerySet;
