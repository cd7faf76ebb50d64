//! Checkpoint management for lms-crm-sync
//!
//! Provides backend-agnostic checkpoint handling. The pipeline keeps a single
//! checkpoint, the [`TimeCursor`], which gates change detection at the start
//! of a run and is advanced at the end of a successful one.
//!
//! # Architecture
//!
//! - The `Checkpoint` trait describes a checkpoint type and its CLI form
//! - The `CheckpointStore` trait abstracts where checkpoints live
//! - `SyncManager` saves and loads checkpoints through a store
//!
//! ## Storage Backends
//!
//! - `staging::Store` - SQLite `time_cursor` table (production)
//! - `MemoryStore` - In-process map (tests)

mod cursor;
mod manager;
pub mod store;

#[cfg(test)]
mod tests;

pub use cursor::TimeCursor;
pub use manager::SyncManager;
pub use store::{CheckpointStore, MemoryStore, StoredCheckpoint};

/// Trait that checkpoint types must implement.
///
/// # Example
///
/// ```rust
/// use checkpoint::Checkpoint;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct PageCheckpoint {
///     pub page: u32,
/// }
///
/// impl Checkpoint for PageCheckpoint {
///     const SOURCE_TYPE: &'static str = "pages";
///
///     fn to_cli_string(&self) -> String {
///         self.page.to_string()
///     }
///
///     fn from_cli_string(s: &str) -> anyhow::Result<Self> {
///         Ok(Self { page: s.parse()? })
///     }
/// }
/// ```
pub trait Checkpoint: serde::Serialize + for<'de> serde::Deserialize<'de> + Clone {
    /// Source type identifier.
    ///
    /// This constant is used to:
    /// - Key the checkpoint in the store
    /// - Validate checkpoint type when loading
    const SOURCE_TYPE: &'static str;

    /// Convert to CLI-friendly string format.
    ///
    /// The returned string should be parseable by `from_cli_string()`.
    fn to_cli_string(&self) -> String;

    /// Parse from CLI string format.
    fn from_cli_string(s: &str) -> anyhow::Result<Self>
    where
        Self: Sized;
}
