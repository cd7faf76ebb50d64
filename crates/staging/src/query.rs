//! Execution of opaque query templates.
//!
//! Payload and association queries are configuration: their text is run
//! verbatim and each result row comes back as a property map keyed by the
//! column names the query chose.

use rusqlite::types::ValueRef;
use serde_json::Value;
use sync_core::PropertyMap;

use crate::error::{persistence, StoreError};
use crate::Store;

impl Store {
    /// Run a read-only query template and return one property map per row.
    pub fn run_query(&self, sql: &str) -> Result<Vec<PropertyMap>, StoreError> {
        let mut stmt = self.conn.prepare(sql).map_err(persistence)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();

        let rows = stmt
            .query_map([], |row| {
                let mut properties = PropertyMap::new();
                for (index, name) in columns.iter().enumerate() {
                    properties.insert(name.clone(), to_json(row.get_ref(index)?));
                }
                Ok(properties)
            })
            .map_err(persistence)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(persistence)
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        // No staged column is a blob.
        ValueRef::Blob(_) => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sync_core::Learner;

    #[test]
    fn test_rows_become_property_maps() {
        let store = Store::in_memory().unwrap();
        store
            .upsert_learner(&Learner {
                lms_user_id: 3,
                first_name: Some("Ada".to_string()),
                last_name: None,
                login: None,
                email: Some("ada@example.com".to_string()),
                status: Some("active".to_string()),
                last_updated: Some(1_700_000_000_000),
            })
            .unwrap();

        let rows = store
            .run_query("SELECT lms_user_id, firstname, lastname, email FROM learners")
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(
            Value::Object(rows[0].clone()),
            json!({
                "lms_user_id": 3,
                "firstname": "Ada",
                "lastname": null,
                "email": "ada@example.com"
            })
        );
    }

    #[test]
    fn test_invalid_query_is_persistence_error() {
        let store = Store::in_memory().unwrap();
        let err = store.run_query("SELECT nope FROM nowhere").unwrap_err();
        assert!(matches!(err, StoreError::Persistence(_)));
    }
}
