//! The identity ledger: local key ↔ remote id, one table per entity kind.
//!
//! Rows are only ever inserted. A key keeps the remote id it was first
//! paired with for the lifetime of the database file.

use rusqlite::{params_from_iter, OptionalExtension};
use sync_core::{EntityKind, LocalKey, RemoteId};

use crate::error::{persistence, IdentityConflict, StoreError};
use crate::Store;

/// Result of writing an identity pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityOutcome {
    /// A new ledger row was written
    Inserted,
    /// The exact pair was already recorded
    AlreadyPresent,
}

impl Store {
    /// Append `(local_key, remote_id)` to the ledger of the key's kind.
    ///
    /// Fails with [`StoreError::IdentityConflict`] if the key is mapped to a
    /// different remote id or the remote id belongs to a different key. The
    /// ledger is never overwritten.
    pub fn record_identity(
        &self,
        local_key: &LocalKey,
        remote_id: &RemoteId,
    ) -> Result<IdentityOutcome, StoreError> {
        let kind = local_key.kind();

        if let Some(existing) = self.lookup_remote_id(local_key)? {
            if &existing == remote_id {
                return Ok(IdentityOutcome::AlreadyPresent);
            }
            return Err(StoreError::IdentityConflict {
                kind,
                local_key: *local_key,
                offered: remote_id.clone(),
                conflict: IdentityConflict::KeyAlreadyMapped { existing },
            });
        }

        if let Some(existing) = self.lookup_local_key(kind, remote_id)? {
            return Err(StoreError::IdentityConflict {
                kind,
                local_key: *local_key,
                offered: remote_id.clone(),
                conflict: IdentityConflict::RemoteIdClaimed { existing },
            });
        }

        let columns = kind.key_properties().join(", ");
        let placeholders = (1..=kind.key_properties().len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let remote_slot = kind.key_properties().len() + 1;
        let sql = format!(
            "INSERT INTO {} ({columns}, remote_id, created_at) \
             VALUES ({placeholders}, ?{remote_slot}, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))",
            kind.mapping_table()
        );

        let mut values: Vec<rusqlite::types::Value> = local_key
            .values()
            .into_iter()
            .map(rusqlite::types::Value::Integer)
            .collect();
        values.push(rusqlite::types::Value::Text(remote_id.as_str().to_string()));

        self.conn
            .execute(&sql, params_from_iter(values))
            .map_err(persistence)?;

        tracing::debug!(
            kind = %kind,
            local_key = %local_key,
            remote_id = %remote_id,
            "Recorded identity"
        );
        Ok(IdentityOutcome::Inserted)
    }

    /// Remote id recorded for `local_key`, if any.
    pub fn lookup_remote_id(&self, local_key: &LocalKey) -> Result<Option<RemoteId>, StoreError> {
        let kind = local_key.kind();
        let predicate = kind
            .key_properties()
            .iter()
            .enumerate()
            .map(|(i, column)| format!("{column} = ?{}", i + 1))
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!(
            "SELECT remote_id FROM {} WHERE {predicate}",
            kind.mapping_table()
        );

        self.conn
            .query_row(&sql, params_from_iter(local_key.values()), |row| {
                row.get::<_, String>(0)
            })
            .optional()
            .map(|id| id.map(RemoteId::from))
            .map_err(persistence)
    }

    /// Local key that owns `remote_id` in the ledger of `kind`, if any.
    pub fn lookup_local_key(
        &self,
        kind: EntityKind,
        remote_id: &RemoteId,
    ) -> Result<Option<LocalKey>, StoreError> {
        let columns = kind.key_properties().join(", ");
        let sql = format!(
            "SELECT {columns} FROM {} WHERE remote_id = ?1",
            kind.mapping_table()
        );
        let arity = kind.key_properties().len();

        let values = self
            .conn
            .query_row(&sql, [remote_id.as_str()], |row| {
                (0..arity)
                    .map(|i| row.get::<_, i64>(i))
                    .collect::<Result<Vec<_>, _>>()
            })
            .optional()
            .map_err(persistence)?;

        match values {
            None => Ok(None),
            Some(values) => LocalKey::from_values(kind, &values)
                .map(Some)
                .ok_or(StoreError::CorruptRow {
                    table: kind.mapping_table(),
                    message: format!("unexpected key arity for remote id {remote_id}"),
                }),
        }
    }

    /// Number of ledger rows for `kind`.
    pub fn mapping_count(&self, kind: EntityKind) -> Result<usize, StoreError> {
        self.count(kind.mapping_table())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(learner_id: i64, course_id: i64) -> LocalKey {
        LocalKey::EnrollmentInstance {
            learner_id,
            course_id,
        }
    }

    #[test]
    fn test_record_and_lookup() {
        let store = Store::in_memory().unwrap();
        let key = instance(1, 2);

        assert_eq!(store.lookup_remote_id(&key).unwrap(), None);
        assert_eq!(
            store.record_identity(&key, &"9001".into()).unwrap(),
            IdentityOutcome::Inserted
        );
        assert_eq!(store.lookup_remote_id(&key).unwrap(), Some("9001".into()));
        assert_eq!(
            store
                .lookup_local_key(EntityKind::EnrollmentInstance, &"9001".into())
                .unwrap(),
            Some(key)
        );
    }

    #[test]
    fn test_same_pair_twice_is_noop() {
        let store = Store::in_memory().unwrap();
        let key = LocalKey::Learner(7);
        store.record_identity(&key, &"77".into()).unwrap();

        assert_eq!(
            store.record_identity(&key, &"77".into()).unwrap(),
            IdentityOutcome::AlreadyPresent
        );
        assert_eq!(store.mapping_count(EntityKind::Learner).unwrap(), 1);
    }

    #[test]
    fn test_remote_id_claimed_by_other_key() {
        let store = Store::in_memory().unwrap();
        store
            .record_identity(&LocalKey::Course(1), &"c-1".into())
            .unwrap();

        let err = store
            .record_identity(&LocalKey::Course(2), &"c-1".into())
            .unwrap_err();
        match err {
            StoreError::IdentityConflict {
                kind,
                local_key,
                conflict,
                ..
            } => {
                assert_eq!(kind, EntityKind::Course);
                assert_eq!(local_key, LocalKey::Course(2));
                assert_eq!(
                    conflict,
                    IdentityConflict::RemoteIdClaimed {
                        existing: LocalKey::Course(1)
                    }
                );
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.mapping_count(EntityKind::Course).unwrap(), 1);
    }

    #[test]
    fn test_key_already_mapped_elsewhere() {
        let store = Store::in_memory().unwrap();
        store
            .record_identity(&LocalKey::Learner(4), &"a".into())
            .unwrap();

        let err = store
            .record_identity(&LocalKey::Learner(4), &"b".into())
            .unwrap_err();
        assert!(err.is_identity_conflict());
        assert!(err.to_string().contains("already mapped to remote id a"));
        assert_eq!(
            store.lookup_remote_id(&LocalKey::Learner(4)).unwrap(),
            Some("a".into())
        );
    }

    #[test]
    fn test_ledgers_are_per_kind() {
        let store = Store::in_memory().unwrap();
        store
            .record_identity(&LocalKey::Learner(1), &"100".into())
            .unwrap();
        // Same remote id string in a different object type's ledger
        store
            .record_identity(&LocalKey::Course(1), &"100".into())
            .unwrap();

        assert_eq!(store.mapping_count(EntityKind::Learner).unwrap(), 1);
        assert_eq!(store.mapping_count(EntityKind::Course).unwrap(), 1);
        assert_eq!(store.mapping_count(EntityKind::EnrollmentInstance).unwrap(), 0);
    }
}
