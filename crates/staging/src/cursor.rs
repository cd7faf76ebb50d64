//! `CheckpointStore` backed by the `time_cursor` table.

use checkpoint::{CheckpointStore, StoredCheckpoint};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::Store;

impl CheckpointStore for Store {
    fn store_checkpoint(&mut self, source_type: &str, checkpoint_data: String) -> anyhow::Result<()> {
        self.conn.execute(
            "
            INSERT INTO time_cursor (source_type, checkpoint_data, created_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(source_type) DO UPDATE SET
                checkpoint_data = excluded.checkpoint_data,
                created_at = excluded.created_at
            ",
            params![source_type, checkpoint_data, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn read_checkpoint(&self, source_type: &str) -> anyhow::Result<Option<StoredCheckpoint>> {
        let row = self
            .conn
            .query_row(
                "SELECT checkpoint_data, created_at FROM time_cursor WHERE source_type = ?1",
                params![source_type],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        let Some((checkpoint_data, created_at)) = row else {
            return Ok(None);
        };
        let created_at = DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc);

        Ok(Some(StoredCheckpoint {
            checkpoint_data,
            source_type: source_type.to_string(),
            created_at,
        }))
    }
}
