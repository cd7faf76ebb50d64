//! Checkpoint storage trait and types
//!
//! This module defines the CheckpointStore trait for backend-agnostic
//! checkpoint storage operations, plus shared types.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Checkpoint data stored in backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCheckpoint {
    /// Serialized checkpoint (JSON)
    pub checkpoint_data: String,
    /// Source type for validation
    pub source_type: String,
    /// Timestamp when checkpoint was written
    pub created_at: DateTime<Utc>,
}

/// Trait for checkpoint storage operations.
///
/// There is exactly one checkpoint per source type. Storing overwrites the
/// previous value rather than appending.
///
/// Implemented by the SQLite staging store (`staging::Store`) and by
/// [`MemoryStore`] for tests.
pub trait CheckpointStore {
    /// Store (overwrite) the checkpoint for `source_type`.
    fn store_checkpoint(&mut self, source_type: &str, checkpoint_data: String) -> Result<()>;

    /// Read the checkpoint for `source_type`.
    ///
    /// Returns None if no checkpoint has been written yet.
    fn read_checkpoint(&self, source_type: &str) -> Result<Option<StoredCheckpoint>>;
}

/// In-memory checkpoint store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<String, StoredCheckpoint>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryStore {
    fn store_checkpoint(&mut self, source_type: &str, checkpoint_data: String) -> Result<()> {
        self.entries.insert(
            source_type.to_string(),
            StoredCheckpoint {
                checkpoint_data,
                source_type: source_type.to_string(),
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn read_checkpoint(&self, source_type: &str) -> Result<Option<StoredCheckpoint>> {
        Ok(self.entries.get(source_type).cloned())
    }
}
