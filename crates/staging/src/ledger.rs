//! Durable certificate ids.
//!
//! One id per remote enrollment instance, allocated from an
//! auto-increment sequence and reused on every later request.

use rusqlite::params;
use sync_core::RemoteId;

use crate::error::{persistence, StoreError};
use crate::Store;

impl Store {
    /// Certificate id for `remote_instance_id`, allocating one on first use.
    pub fn allocate_certificate_id(&self, remote_instance_id: &RemoteId) -> Result<i64, StoreError> {
        self.conn
            .execute(
                "
                INSERT INTO certificate_ids (remote_instance_id, issued_at)
                VALUES (?1, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
                ON CONFLICT(remote_instance_id) DO NOTHING
                ",
                params![remote_instance_id.as_str()],
            )
            .map_err(persistence)?;

        self.conn
            .query_row(
                "SELECT cert_id FROM certificate_ids WHERE remote_instance_id = ?1",
                params![remote_instance_id.as_str()],
                |row| row.get(0),
            )
            .map_err(persistence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_sequential_and_reused() {
        let store = Store::in_memory().unwrap();
        let first = store.allocate_certificate_id(&"i-1".into()).unwrap();
        let second = store.allocate_certificate_id(&"i-2".into()).unwrap();
        let again = store.allocate_certificate_id(&"i-1".into()).unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(again, first);
    }
}
