//! Request and response bodies of the CRM records API.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sync_core::{PropertyMap, RemoteId};

/// Largest number of inputs the CRM accepts in one batch call.
pub const MAX_BATCH_SIZE: usize = 100;

/// `{"inputs": [...]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest<T> {
    pub inputs: Vec<T>,
}

/// One CREATE input: properties only, no id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateInput {
    pub properties: PropertyMap,
}

/// One UPDATE input: the mapped remote id and the new property values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateInput {
    pub id: RemoteId,
    pub properties: PropertyMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub id: RemoteId,
}

/// One association between two reconciled records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationInput {
    pub from: ObjectRef,
    pub to: ObjectRef,
    #[serde(rename = "type")]
    pub association_type: String,
}

impl AssociationInput {
    pub fn new(from: RemoteId, to: RemoteId, association_type: impl Into<String>) -> Self {
        Self {
            from: ObjectRef { id: from },
            to: ObjectRef { id: to },
            association_type: association_type.into(),
        }
    }
}

/// A record as returned by the CRM. Property values come back as strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordResult {
    pub id: RemoteId,
    #[serde(default)]
    pub properties: PropertyMap,
}

impl RecordResult {
    /// String value of a property, `None` when missing, null or empty.
    pub fn property_str(&self, name: &str) -> Option<&str> {
        match self.properties.get(name) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.as_str()),
            _ => None,
        }
    }
}

/// A per-item failure inside an otherwise accepted batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemError {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub context: Option<Value>,
}

impl BatchItemError {
    /// Same classification as [`crate::CrmError::is_duplicate`].
    pub fn is_duplicate(&self) -> bool {
        self.status.as_deref() == Some("409")
            || self.category.as_deref() == Some("CONFLICT")
            || crate::error::is_duplicate_message(&self.message)
    }
}

/// Response of batch create/update. Partial success answers 207 with both
/// `results` and `errors` populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    #[serde(default)]
    pub results: Vec<RecordResult>,
    #[serde(default)]
    pub errors: Vec<BatchItemError>,
}

/// Response of association batch create.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssociationResponse {
    #[serde(default)]
    pub results: Vec<Value>,
    #[serde(default)]
    pub errors: Vec<BatchItemError>,
}

/// One option of an enumerated property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyOption {
    pub label: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_order: Option<i64>,
    #[serde(default)]
    pub hidden: bool,
}

impl PropertyOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            display_order: None,
            hidden: false,
        }
    }
}

/// Property definition, reduced to what option management needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub options: Vec<PropertyOption>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterOperator {
    Eq,
    HasProperty,
    NotHasProperty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub property_name: String,
    pub operator: FilterOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Filter {
    pub fn eq(property_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            property_name: property_name.into(),
            operator: FilterOperator::Eq,
            value: Some(value.into()),
        }
    }

    pub fn not_has_property(property_name: impl Into<String>) -> Self {
        Self {
            property_name: property_name.into(),
            operator: FilterOperator::NotHasProperty,
            value: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterGroup {
    pub filters: Vec<Filter>,
}

/// Body of `POST /crm/v3/objects/{type}/search`. Filters inside a group are
/// ANDed, groups are ORed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub filter_groups: Vec<FilterGroup>,
    #[serde(default)]
    pub properties: Vec<String>,
    pub limit: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

impl SearchRequest {
    /// Single filter group matching all of `filters`.
    pub fn all_of(filters: Vec<Filter>) -> Self {
        Self {
            filter_groups: vec![FilterGroup { filters }],
            properties: Vec::new(),
            limit: MAX_BATCH_SIZE,
            after: None,
        }
    }

    pub fn with_properties<S: Into<String>>(mut self, properties: impl IntoIterator<Item = S>) -> Self {
        self.properties = properties.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NextPage {
    pub after: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub next: Option<NextPage>,
}

/// One page of search or list results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPage {
    #[serde(default)]
    pub results: Vec<RecordResult>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

impl RecordPage {
    /// Cursor of the next page, `None` on the last page.
    pub fn next_after(&self) -> Option<&str> {
        self.paging
            .as_ref()
            .and_then(|p| p.next.as_ref())
            .map(|n| n.after.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_search_request_shape() {
        let request = SearchRequest::all_of(vec![
            Filter::eq("certificate_checkbox", "true"),
            Filter::not_has_property("linkedin_badge"),
        ])
        .with_properties(["firstname", "course_name"]);

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "filterGroups": [{"filters": [
                    {"propertyName": "certificate_checkbox", "operator": "EQ", "value": "true"},
                    {"propertyName": "linkedin_badge", "operator": "NOT_HAS_PROPERTY"}
                ]}],
                "properties": ["firstname", "course_name"],
                "limit": 100
            })
        );
    }

    #[test]
    fn test_association_input_shape() {
        let input = AssociationInput::new("1".into(), "2".into(), "course_to_instance");
        assert_eq!(
            serde_json::to_value(&input).unwrap(),
            json!({"from": {"id": "1"}, "to": {"id": "2"}, "type": "course_to_instance"})
        );
    }

    #[test]
    fn test_batch_response_with_errors() {
        let response: BatchResponse = serde_json::from_value(json!({
            "status": "COMPLETE",
            "results": [{"id": "501", "properties": {"lms_user_id": "3"}}],
            "errors": [{"status": "error", "category": "CONFLICT", "message": "dup"}]
        }))
        .unwrap();

        assert_eq!(response.results[0].id, RemoteId::new("501"));
        assert_eq!(response.results[0].property_str("lms_user_id"), Some("3"));
        assert!(response.errors[0].is_duplicate());
    }

    #[test]
    fn test_item_error_duplicate_classification() {
        let item = |status: &str, category: &str, message: &str| BatchItemError {
            status: Some(status.to_string()),
            category: Some(category.to_string()),
            message: message.to_string(),
            context: None,
        };

        assert!(item("409", "OBJECT_ERROR", "Conflict").is_duplicate());
        assert!(item("error", "VALIDATION_ERROR", "Contact already exists").is_duplicate());
        assert!(!item("error", "VALIDATION_ERROR", "Property values were not valid").is_duplicate());
    }

    #[test]
    fn test_record_page_next_after() {
        let page: RecordPage = serde_json::from_value(json!({
            "results": [],
            "paging": {"next": {"after": "200", "link": "..."}}
        }))
        .unwrap();
        assert_eq!(page.next_after(), Some("200"));
        assert_eq!(RecordPage::default().next_after(), None);
    }
}
