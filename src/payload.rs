//! Payload building: partition staged rows into CREATE and UPDATE sets.
//!
//! The partition is the join between a staging table and the identity
//! ledger of the same kind, computed fresh from the query templates on
//! every call. A row whose key has no ledger entry is a CREATE; a row whose
//! key has one is an UPDATE carrying the recorded remote id.

use serde_json::Value;
use staging::{Store, StoreError};
use sync_core::{EntityKind, LocalKey, PropertyMap, RemoteId};

use crate::config::QuerySet;

/// Column the update templates use for the mapped remote id.
pub const REMOTE_ID_COLUMN: &str = "remote_id";

/// A staged row with no remote record yet.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateRow {
    pub local_key: LocalKey,
    /// Every selected column, key columns included
    pub properties: PropertyMap,
}

/// A staged row already mapped to a remote record.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRow {
    pub local_key: LocalKey,
    pub remote_id: RemoteId,
    /// Selected columns minus the key columns and the remote id
    pub properties: PropertyMap,
}

/// Staged rows of `kind` whose local key has no identity yet.
pub fn build_create_batch(
    store: &Store,
    queries: &QuerySet,
    kind: EntityKind,
) -> Result<Vec<CreateRow>, StoreError> {
    let rows = store.run_query(queries.create(kind))?;
    Ok(rows
        .into_iter()
        .filter_map(|properties| {
            let Some(local_key) = LocalKey::from_properties(kind, &properties) else {
                tracing::warn!(kind = %kind, "Skipping staged row without a usable key");
                return None;
            };
            Some(CreateRow {
                local_key,
                properties,
            })
        })
        .collect())
}

/// Staged rows of `kind` with a recorded identity, shaped for UPDATE.
pub fn build_update_batch(
    store: &Store,
    queries: &QuerySet,
    kind: EntityKind,
) -> Result<Vec<UpdateRow>, StoreError> {
    let rows = store.run_query(queries.update(kind))?;
    Ok(rows
        .into_iter()
        .filter_map(|mut properties| {
            let Some(local_key) = LocalKey::from_properties(kind, &properties) else {
                tracing::warn!(kind = %kind, "Skipping staged row without a usable key");
                return None;
            };
            let remote_id = properties
                .remove(REMOTE_ID_COLUMN)
                .as_ref()
                .and_then(RemoteId::from_value);
            let Some(remote_id) = remote_id else {
                tracing::warn!(kind = %kind, local_key = %local_key, "Skipping update row without a remote id");
                return None;
            };
            Some(UpdateRow {
                local_key,
                remote_id,
                properties: without_key(kind, properties),
            })
        })
        .collect())
}

/// `properties` with the key columns of `kind` removed.
pub fn without_key(kind: EntityKind, mut properties: PropertyMap) -> PropertyMap {
    for name in kind.key_properties() {
        properties.remove(*name);
    }
    properties
}

/// Stringify a property value the way search filters need it.
pub fn filter_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sync_core::{Course, EnrollmentInstance};

    fn course(id: i64) -> Course {
        Course {
            lms_course_id: id,
            course_name: Some(format!("Course {id}")),
            ..Course::default()
        }
    }

    #[test]
    fn test_partition_five_courses_three_mapped() {
        let store = Store::in_memory().unwrap();
        let queries = QuerySet::builtin();
        for id in 1..=5 {
            store.upsert_course(&course(id)).unwrap();
        }
        for id in [1, 3, 5] {
            store
                .record_identity(&LocalKey::Course(id), &RemoteId::new(format!("r-{id}")))
                .unwrap();
        }

        let creates = build_create_batch(&store, &queries, EntityKind::Course).unwrap();
        let updates = build_update_batch(&store, &queries, EntityKind::Course).unwrap();

        let create_keys: Vec<LocalKey> = creates.iter().map(|r| r.local_key).collect();
        let update_keys: Vec<LocalKey> = updates.iter().map(|r| r.local_key).collect();
        assert_eq!(create_keys, vec![LocalKey::Course(2), LocalKey::Course(4)]);
        assert_eq!(
            update_keys,
            vec![LocalKey::Course(1), LocalKey::Course(3), LocalKey::Course(5)]
        );
        assert!(create_keys.iter().all(|k| !update_keys.contains(k)));
    }

    #[test]
    fn test_update_rows_carry_remote_id_without_key_columns() {
        let store = Store::in_memory().unwrap();
        let queries = QuerySet::builtin();
        store.upsert_course(&course(7)).unwrap();
        store
            .record_identity(&LocalKey::Course(7), &RemoteId::new("r-7"))
            .unwrap();

        let updates = build_update_batch(&store, &queries, EntityKind::Course).unwrap();

        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].remote_id, RemoteId::new("r-7"));
        assert!(!updates[0].properties.contains_key("lms_course_id"));
        assert!(!updates[0].properties.contains_key(REMOTE_ID_COLUMN));
        assert_eq!(updates[0].properties["course_name"], json!("Course 7"));
    }

    #[test]
    fn test_create_rows_keep_key_columns() {
        let store = Store::in_memory().unwrap();
        let queries = QuerySet::builtin();
        store
            .upsert_instance(&EnrollmentInstance {
                lms_user_id: 4,
                lms_course_id: 9,
                instance_name: "Lovelace Ada: Data".to_string(),
                ..EnrollmentInstance::default()
            })
            .unwrap();

        let creates =
            build_create_batch(&store, &queries, EntityKind::EnrollmentInstance).unwrap();

        assert_eq!(
            creates[0].local_key,
            LocalKey::EnrollmentInstance {
                learner_id: 4,
                course_id: 9
            }
        );
        assert_eq!(creates[0].properties["lms_user_id"], json!(4));
        assert_eq!(creates[0].properties["assignment_complete"], json!("No"));
    }

    #[test]
    fn test_partition_sees_identities_written_after_staging() {
        let store = Store::in_memory().unwrap();
        let queries = QuerySet::builtin();
        store.upsert_course(&course(1)).unwrap();

        assert_eq!(
            build_create_batch(&store, &queries, EntityKind::Course)
                .unwrap()
                .len(),
            1
        );
        store
            .record_identity(&LocalKey::Course(1), &RemoteId::new("r-1"))
            .unwrap();
        assert!(build_create_batch(&store, &queries, EntityKind::Course)
            .unwrap()
            .is_empty());
    }
}
