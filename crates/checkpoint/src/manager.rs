//! Generic sync manager for checkpoint operations.

use crate::{store::CheckpointStore, Checkpoint};

/// Manager for saving and loading checkpoints through a [`CheckpointStore`].
///
/// # Example
///
/// ```rust
/// use checkpoint::{MemoryStore, SyncManager, TimeCursor};
///
/// let mut store = MemoryStore::new();
/// let manager = SyncManager::new(true);
///
/// manager
///     .emit_checkpoint(&mut store, &TimeCursor::from_millis(1_700_000_000_000))
///     .unwrap();
///
/// let loaded: Option<TimeCursor> = manager.read_checkpoint(&store).unwrap();
/// assert_eq!(loaded.map(|c| c.last_run_started_ms), Some(1_700_000_000_000));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct SyncManager {
    emit_checkpoints: bool,
}

impl SyncManager {
    /// Create a new sync manager.
    ///
    /// # Arguments
    /// * `emit_checkpoints` - When false, [`SyncManager::emit_checkpoint`]
    ///   is a no-op (dry runs)
    pub fn new(emit_checkpoints: bool) -> Self {
        Self { emit_checkpoints }
    }

    pub fn emits_checkpoints(&self) -> bool {
        self.emit_checkpoints
    }

    /// Emit a checkpoint, overwriting the previous one of the same type.
    ///
    /// This is a **SAVING** operation.
    pub fn emit_checkpoint<C, S>(&self, store: &mut S, checkpoint: &C) -> anyhow::Result<()>
    where
        C: Checkpoint,
        S: CheckpointStore + ?Sized,
    {
        if !self.emit_checkpoints {
            tracing::info!(
                "Checkpoint emission disabled, not storing {} checkpoint: {}",
                C::SOURCE_TYPE,
                checkpoint.to_cli_string()
            );
            return Ok(());
        }

        let checkpoint_data = serde_json::to_string(checkpoint)?;
        store.store_checkpoint(C::SOURCE_TYPE, checkpoint_data)?;

        tracing::info!(
            "Stored {} checkpoint: {}",
            C::SOURCE_TYPE,
            checkpoint.to_cli_string()
        );

        Ok(())
    }

    /// Read and parse the checkpoint of type `C`.
    ///
    /// This is a **LOADING** operation. Returns `Ok(None)` when nothing has
    /// been stored yet.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The store cannot be read
    /// - The stored source type doesn't match `C::SOURCE_TYPE`
    /// - Failed to deserialize checkpoint data
    pub fn read_checkpoint<C, S>(&self, store: &S) -> anyhow::Result<Option<C>>
    where
        C: Checkpoint,
        S: CheckpointStore + ?Sized,
    {
        let Some(stored) = store.read_checkpoint(C::SOURCE_TYPE)? else {
            return Ok(None);
        };

        if stored.source_type != C::SOURCE_TYPE {
            anyhow::bail!(
                "Checkpoint type mismatch: expected '{}', found '{}'",
                C::SOURCE_TYPE,
                stored.source_type
            );
        }

        let checkpoint: C = serde_json::from_str(&stored.checkpoint_data).map_err(|e| {
            anyhow::anyhow!(
                "Failed to parse {} checkpoint '{}': {e}",
                C::SOURCE_TYPE,
                stored.checkpoint_data
            )
        })?;
        Ok(Some(checkpoint))
    }
}
