//! Identity types shared across the three identity spaces.
//!
//! A staged row is identified by its [`LocalKey`] (the upstream LMS ids), the
//! CRM identifies the same record by a [`RemoteId`], and the identity ledger in
//! the staging store pairs the two per [`EntityKind`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Property map in the shape the CRM batch API expects (`"properties": {...}`).
pub type PropertyMap = serde_json::Map<String, Value>;

/// The closed set of entity types this pipeline reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// An LMS user, synchronized to a CRM contact.
    Learner,
    /// An LMS course.
    Course,
    /// One learner taking one course.
    EnrollmentInstance,
}

impl EntityKind {
    /// All kinds in dispatch order. Instances go last because their
    /// associations depend on learners and courses being reconciled first.
    pub const ALL: [EntityKind; 3] = [
        EntityKind::Learner,
        EntityKind::Course,
        EntityKind::EnrollmentInstance,
    ];

    /// Get the string representation of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Learner => "learner",
            EntityKind::Course => "course",
            EntityKind::EnrollmentInstance => "enrollment_instance",
        }
    }

    /// Property names that carry the local key in payloads and CRM records.
    pub fn key_properties(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Learner => &["lms_user_id"],
            EntityKind::Course => &["lms_course_id"],
            EntityKind::EnrollmentInstance => &["lms_user_id", "lms_course_id"],
        }
    }

    /// Staging table holding the current snapshot for this kind.
    pub fn staging_table(&self) -> &'static str {
        match self {
            EntityKind::Learner => "learners",
            EntityKind::Course => "courses",
            EntityKind::EnrollmentInstance => "enrollment_instances",
        }
    }

    /// Append-only identity ledger table for this kind.
    pub fn mapping_table(&self) -> &'static str {
        match self {
            EntityKind::Learner => "learner_mapping",
            EntityKind::Course => "course_mapping",
            EntityKind::EnrollmentInstance => "instance_mapping",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable source-system identity of a staged row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LocalKey {
    Learner(i64),
    Course(i64),
    EnrollmentInstance { learner_id: i64, course_id: i64 },
}

impl LocalKey {
    pub fn kind(&self) -> EntityKind {
        match self {
            LocalKey::Learner(_) => EntityKind::Learner,
            LocalKey::Course(_) => EntityKind::Course,
            LocalKey::EnrollmentInstance { .. } => EntityKind::EnrollmentInstance,
        }
    }

    /// Key values in the order of [`EntityKind::key_properties`].
    pub fn values(&self) -> Vec<i64> {
        match self {
            LocalKey::Learner(id) | LocalKey::Course(id) => vec![*id],
            LocalKey::EnrollmentInstance {
                learner_id,
                course_id,
            } => vec![*learner_id, *course_id],
        }
    }

    /// Extract the local key of `kind` from a property map.
    ///
    /// Accepts integer values as well as numeric strings, since the CRM echoes
    /// every property back as a string.
    pub fn from_properties(kind: EntityKind, properties: &PropertyMap) -> Option<Self> {
        let mut values = kind
            .key_properties()
            .iter()
            .map(|name| properties.get(*name).and_then(value_as_i64));

        match kind {
            EntityKind::Learner => values.next().flatten().map(LocalKey::Learner),
            EntityKind::Course => values.next().flatten().map(LocalKey::Course),
            EntityKind::EnrollmentInstance => {
                let learner_id = values.next().flatten()?;
                let course_id = values.next().flatten()?;
                Some(LocalKey::EnrollmentInstance {
                    learner_id,
                    course_id,
                })
            }
        }
    }

    /// Build a key of `kind` from values ordered as in
    /// [`EntityKind::key_properties`].
    pub fn from_values(kind: EntityKind, values: &[i64]) -> Option<Self> {
        match (kind, values) {
            (EntityKind::Learner, [id]) => Some(LocalKey::Learner(*id)),
            (EntityKind::Course, [id]) => Some(LocalKey::Course(*id)),
            (EntityKind::EnrollmentInstance, [learner_id, course_id]) => {
                Some(LocalKey::EnrollmentInstance {
                    learner_id: *learner_id,
                    course_id: *course_id,
                })
            }
            _ => None,
        }
    }

    /// The key as a property map (used for duplicate-recovery lookups).
    pub fn to_properties(&self) -> PropertyMap {
        self.kind()
            .key_properties()
            .iter()
            .zip(self.values())
            .map(|(name, value)| (name.to_string(), Value::from(value)))
            .collect()
    }
}

impl std::fmt::Display for LocalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocalKey::Learner(id) => write!(f, "learner:{id}"),
            LocalKey::Course(id) => write!(f, "course:{id}"),
            LocalKey::EnrollmentInstance {
                learner_id,
                course_id,
            } => write!(f, "enrollment_instance:{learner_id}/{course_id}"),
        }
    }
}

/// Identifier assigned by the CRM when a record is created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Read a remote id out of a JSON value (the CRM uses strings, some
    /// query templates produce integers).
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

impl From<String> for RemoteId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RemoteId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for RemoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> PropertyMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_local_key_from_integer_properties() {
        let p = props(json!({"lms_user_id": 12, "firstname": "Ada"}));
        assert_eq!(
            LocalKey::from_properties(EntityKind::Learner, &p),
            Some(LocalKey::Learner(12))
        );
    }

    #[test]
    fn test_local_key_from_echoed_string_properties() {
        let p = props(json!({"lms_user_id": "12", "lms_course_id": " 7 "}));
        assert_eq!(
            LocalKey::from_properties(EntityKind::EnrollmentInstance, &p),
            Some(LocalKey::EnrollmentInstance {
                learner_id: 12,
                course_id: 7
            })
        );
    }

    #[test]
    fn test_local_key_missing_component() {
        let p = props(json!({"lms_user_id": 12}));
        assert_eq!(
            LocalKey::from_properties(EntityKind::EnrollmentInstance, &p),
            None
        );
        assert_eq!(LocalKey::from_properties(EntityKind::Course, &p), None);
    }

    #[test]
    fn test_local_key_to_properties() {
        let key = LocalKey::EnrollmentInstance {
            learner_id: 3,
            course_id: 9,
        };
        let p = key.to_properties();
        assert_eq!(p.get("lms_user_id"), Some(&json!(3)));
        assert_eq!(p.get("lms_course_id"), Some(&json!(9)));
        assert_eq!(key.to_string(), "enrollment_instance:3/9");
    }

    #[test]
    fn test_local_key_from_values_arity() {
        assert_eq!(
            LocalKey::from_values(EntityKind::Course, &[4]),
            Some(LocalKey::Course(4))
        );
        assert_eq!(LocalKey::from_values(EntityKind::Course, &[4, 5]), None);
        assert_eq!(
            LocalKey::from_values(EntityKind::EnrollmentInstance, &[4, 5]),
            Some(LocalKey::EnrollmentInstance {
                learner_id: 4,
                course_id: 5
            })
        );
    }

    #[test]
    fn test_remote_id_from_value() {
        assert_eq!(
            RemoteId::from_value(&json!("5101")),
            Some(RemoteId::new("5101"))
        );
        assert_eq!(RemoteId::from_value(&json!(5101)), Some(RemoteId::new("5101")));
        assert_eq!(RemoteId::from_value(&json!("")), None);
        assert_eq!(RemoteId::from_value(&Value::Null), None);
    }
}
