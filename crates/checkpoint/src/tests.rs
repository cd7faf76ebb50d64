//! Unit tests for the checkpoint crate.

use chrono::{Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::{Checkpoint, CheckpointStore, MemoryStore, StoredCheckpoint, SyncManager, TimeCursor};

/// Second checkpoint type, to check that types don't collide in one store.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
struct PageCheckpoint {
    page: u32,
}

impl Checkpoint for PageCheckpoint {
    const SOURCE_TYPE: &'static str = "test-pages";

    fn to_cli_string(&self) -> String {
        self.page.to_string()
    }

    fn from_cli_string(s: &str) -> anyhow::Result<Self> {
        Ok(Self { page: s.parse()? })
    }
}

/// Store that answers every read with a checkpoint of the wrong type.
struct MislabeledStore;

impl CheckpointStore for MislabeledStore {
    fn store_checkpoint(&mut self, _source_type: &str, _data: String) -> anyhow::Result<()> {
        Ok(())
    }

    fn read_checkpoint(&self, _source_type: &str) -> anyhow::Result<Option<StoredCheckpoint>> {
        Ok(Some(StoredCheckpoint {
            checkpoint_data: "{\"page\":1}".to_string(),
            source_type: "wrong".to_string(),
            created_at: Utc::now(),
        }))
    }
}

// ============================================================================
// TimeCursor Tests
// ============================================================================

#[test]
fn test_time_cursor_cli_millis() {
    let cursor = TimeCursor::from_cli_string("1700000000000").unwrap();
    assert_eq!(cursor.last_run_started_ms, 1_700_000_000_000);
    assert_eq!(cursor.to_cli_string(), "1700000000000");
}

#[test]
fn test_time_cursor_cli_rfc3339() {
    let cursor = TimeCursor::from_cli_string("2024-03-01T10:00:00Z").unwrap();
    assert_eq!(cursor.last_run_started_ms, 1_709_287_200_000);

    let dt = cursor.to_datetime().unwrap();
    assert_eq!(dt.year(), 2024);
    assert_eq!(dt.month(), 3);
    assert_eq!(dt.hour(), 10);
}

#[test]
fn test_time_cursor_cli_invalid() {
    let err = TimeCursor::from_cli_string("yesterday").unwrap_err();
    assert!(err.to_string().contains("Invalid time cursor"));
}

#[test]
fn test_time_cursor_display() {
    assert_eq!(
        TimeCursor::from_millis(1_709_287_200_000).to_string(),
        "1709287200000 (2024-03-01T10:00:00+00:00)"
    );
    assert_eq!(TimeCursor::EPOCH.last_run_started_ms, 0);
}

// ============================================================================
// SyncManager Tests
// ============================================================================

#[test]
fn test_sync_manager_emit_and_read() {
    let mut store = MemoryStore::new();
    let manager = SyncManager::new(true);

    manager
        .emit_checkpoint(&mut store, &TimeCursor::from_millis(123))
        .unwrap();

    let read: Option<TimeCursor> = manager.read_checkpoint(&store).unwrap();
    assert_eq!(read, Some(TimeCursor::from_millis(123)));
}

#[test]
fn test_sync_manager_missing_checkpoint() {
    let store = MemoryStore::new();
    let manager = SyncManager::new(true);

    let read: Option<TimeCursor> = manager.read_checkpoint(&store).unwrap();
    assert_eq!(read, None);
}

#[test]
fn test_sync_manager_emit_disabled() {
    let mut store = MemoryStore::new();
    let manager = SyncManager::new(false);
    assert!(!manager.emits_checkpoints());

    // Should succeed but not write anything
    manager
        .emit_checkpoint(&mut store, &TimeCursor::from_millis(456))
        .unwrap();

    let read: Option<TimeCursor> = manager.read_checkpoint(&store).unwrap();
    assert_eq!(read, None);
}

#[test]
fn test_sync_manager_overwrites() {
    let mut store = MemoryStore::new();
    let manager = SyncManager::new(true);

    manager
        .emit_checkpoint(&mut store, &TimeCursor::from_millis(100))
        .unwrap();
    manager
        .emit_checkpoint(&mut store, &TimeCursor::from_millis(200))
        .unwrap();

    let read: Option<TimeCursor> = manager.read_checkpoint(&store).unwrap();
    assert_eq!(read, Some(TimeCursor::from_millis(200)));
}

#[test]
fn test_sync_manager_separate_types() {
    let mut store = MemoryStore::new();
    let manager = SyncManager::new(true);

    manager
        .emit_checkpoint(&mut store, &TimeCursor::from_millis(1000))
        .unwrap();
    manager
        .emit_checkpoint(&mut store, &PageCheckpoint { page: 7 })
        .unwrap();

    let cursor: Option<TimeCursor> = manager.read_checkpoint(&store).unwrap();
    let page: Option<PageCheckpoint> = manager.read_checkpoint(&store).unwrap();
    assert_eq!(cursor, Some(TimeCursor::from_millis(1000)));
    assert_eq!(page, Some(PageCheckpoint { page: 7 }));
}

#[test]
fn test_checkpoint_type_mismatch() {
    let manager = SyncManager::new(true);
    let result: anyhow::Result<Option<PageCheckpoint>> = manager.read_checkpoint(&MislabeledStore);

    let err_msg = result.unwrap_err().to_string();
    assert!(err_msg.contains("type mismatch"));
    assert!(err_msg.contains("expected 'test-pages'"));
    assert!(err_msg.contains("found 'wrong'"));
}

#[test]
fn test_corrupt_checkpoint_data() {
    let mut store = MemoryStore::new();
    store
        .store_checkpoint(TimeCursor::SOURCE_TYPE, "not json".to_string())
        .unwrap();

    let manager = SyncManager::new(true);
    let result: anyhow::Result<Option<TimeCursor>> = manager.read_checkpoint(&store);
    assert!(result.is_err());
}
