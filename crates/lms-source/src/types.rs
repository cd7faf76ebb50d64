//! Response shapes of the LMS API.
//!
//! The LMS is loose about JSON types: ids and counters arrive as strings or
//! numbers depending on the endpoint, so the numeric fields go through the
//! lenient deserializers at the bottom of this module.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Entry of `GET /api/v1/users`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawUser {
    #[serde(deserialize_with = "de_id")]
    pub id: i64,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub login: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub first_name: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub last_updated_timestamp: Option<String>,
}

/// Entry of `GET /api/v1/courses`.
///
/// Custom fields 3 to 7 carry the course schedule.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawCourse {
    #[serde(deserialize_with = "de_id")]
    pub id: i64,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub code: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub last_update_on: Option<String>,
    #[serde(default, rename = "custom_field_3", deserialize_with = "de_opt_text")]
    pub start_date: Option<String>,
    #[serde(default, rename = "custom_field_4", deserialize_with = "de_opt_text")]
    pub end_date: Option<String>,
    #[serde(default, rename = "custom_field_5", deserialize_with = "de_opt_text")]
    pub live_session: Option<String>,
    #[serde(default, rename = "custom_field_6", deserialize_with = "de_opt_text")]
    pub assignment_due: Option<String>,
    #[serde(default, rename = "custom_field_7", deserialize_with = "de_opt_text")]
    pub cohort_id: Option<String>,
}

impl RawCourse {
    /// The schedule fields, in custom-field order.
    pub fn schedule_fields(&self) -> [Option<&str>; 5] {
        [
            self.start_date.as_deref(),
            self.end_date.as_deref(),
            self.live_session.as_deref(),
            self.assignment_due.as_deref(),
            self.cohort_id.as_deref(),
        ]
    }

    pub fn has_schedule(&self) -> bool {
        self.schedule_fields().iter().any(Option::is_some)
    }
}

/// `GET /api/v1/courses/id:{id}`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CourseDetail {
    #[serde(deserialize_with = "de_id")]
    pub id: i64,
    #[serde(default)]
    pub units: Vec<CourseUnit>,
    #[serde(default)]
    pub users: Vec<CourseUser>,
}

impl CourseDetail {
    pub fn assignment_units(&self) -> impl Iterator<Item = &CourseUnit> {
        self.units.iter().filter(|unit| unit.unit_type == "Assignment")
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CourseUnit {
    #[serde(deserialize_with = "de_id")]
    pub id: i64,
    #[serde(rename = "type", default)]
    pub unit_type: String,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub name: Option<String>,
}

/// A user enrolled in a course (active or not).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CourseUser {
    #[serde(deserialize_with = "de_id")]
    pub id: i64,
}

/// `GET /api/v1/users/id:{id}`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UserDetail {
    #[serde(deserialize_with = "de_id")]
    pub id: i64,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub first_name: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub status: Option<String>,
    /// Company cohort
    #[serde(default, rename = "custom_field_4", deserialize_with = "de_opt_text")]
    pub cohort_id: Option<String>,
    #[serde(default)]
    pub courses: Vec<UserCourse>,
}

/// A learner's progress in one course.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UserCourse {
    #[serde(deserialize_with = "de_id")]
    pub id: i64,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub role: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub completion_status: Option<String>,
    #[serde(default, deserialize_with = "de_opt_int")]
    pub completion_percentage: Option<i64>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub completed_on_timestamp: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub total_time: Option<String>,
    #[serde(default, deserialize_with = "de_opt_int")]
    pub total_time_seconds: Option<i64>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub last_accessed_unit_url: Option<String>,
}

/// Entry of the unit timeline (`unitprogress_assignment_answered`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TimelineEvent {
    #[serde(deserialize_with = "de_id")]
    pub user_id: i64,
}

fn de_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    value_to_int(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("expected an integer id, got {value}")))
}

fn de_opt_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    match &value {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        _ => value_to_int(&value)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("expected an integer, got {value}"))),
    }
}

fn de_opt_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    })
}

fn value_to_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_course_custom_fields() {
        let course: RawCourse = serde_json::from_value(json!({
            "id": "12",
            "name": "Data Basics (TEMPLATE)",
            "code": "101DB-T",
            "description": null,
            "last_update_on": "24/11/2021, 14:53:44",
            "custom_field_3": null,
            "custom_field_5": "2024-07-10 18:30:00",
            "custom_field_7": 42
        }))
        .unwrap();

        assert_eq!(course.id, 12);
        assert_eq!(course.live_session.as_deref(), Some("2024-07-10 18:30:00"));
        assert_eq!(course.cohort_id.as_deref(), Some("42"));
        assert_eq!(course.start_date, None);
        assert!(course.has_schedule());
    }

    #[test]
    fn test_course_without_schedule() {
        let course: RawCourse = serde_json::from_value(json!({"id": 3, "name": "x"})).unwrap();
        assert!(!course.has_schedule());
    }

    #[test]
    fn test_user_detail_progress() {
        let user: UserDetail = serde_json::from_value(json!({
            "id": "5",
            "first_name": "Ada",
            "last_name": "Lovelace",
            "custom_field_4": "ACME-1",
            "courses": [{
                "id": "9",
                "name": "Intro &amp; Basics",
                "role": "learner",
                "completion_status": "Completed",
                "completion_percentage": "100",
                "completed_on_timestamp": "1700000000000",
                "total_time_seconds": 3600,
                "last_accessed_unit_url": ""
            }]
        }))
        .unwrap();

        assert_eq!(user.cohort_id.as_deref(), Some("ACME-1"));
        let course = &user.courses[0];
        assert_eq!(course.id, 9);
        assert_eq!(course.completion_percentage, Some(100));
        assert_eq!(course.total_time_seconds, Some(3600));
    }

    #[test]
    fn test_assignment_units_filter() {
        let detail: CourseDetail = serde_json::from_value(json!({
            "id": 1,
            "units": [
                {"id": "10", "type": "Content"},
                {"id": "11", "type": "Assignment"}
            ],
            "users": [{"id": "5"}, {"id": 6}]
        }))
        .unwrap();

        let ids: Vec<i64> = detail.assignment_units().map(|u| u.id).collect();
        assert_eq!(ids, vec![11]);
        assert_eq!(detail.users.len(), 2);
    }

    #[test]
    fn test_bad_id_is_rejected() {
        let result: Result<TimelineEvent, _> = serde_json::from_value(json!({"user_id": "abc"}));
        assert!(result.is_err());
    }
}
