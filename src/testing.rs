//! In-memory implementations of the remote APIs.
//!
//! Used by the unit tests and by the integration tests under `tests/` to
//! drive whole runs without a network. The fakes model just enough of the
//! real services: the CRM echoes properties back as strings, rejects a whole
//! create batch when any input collides with a unique key, and pages search
//! and list results.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use crm_sink::types::{NextPage, Paging};
use crm_sink::{
    AssociationInput, AssociationResponse, BatchItemError, BatchResponse, CreateInput, CrmApi,
    CrmError, FilterOperator, PropertyDefinition, PropertyOption, RecordPage, RecordResult,
    SearchRequest, UpdateInput, MAX_BATCH_SIZE,
};
use docgen_client::{DocumentApi, DocumentError, DocumentRequest};
use lms_source::{
    CourseDetail, LmsApi, LmsError, RawCourse, RawUser, TimelineEvent, UserDetail,
};
use serde_json::{json, Value};
use sync_core::{PropertyMap, RemoteId};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// LMS
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LmsState {
    users: Vec<RawUser>,
    courses: Vec<RawCourse>,
    course_details: HashMap<i64, CourseDetail>,
    user_details: HashMap<i64, UserDetail>,
    timelines: HashMap<i64, Vec<TimelineEvent>>,
    user_detail_calls: Vec<i64>,
    course_detail_calls: Vec<i64>,
}

/// Canned LMS responses.
#[derive(Default)]
pub struct InMemoryLms {
    state: Mutex<LmsState>,
}

impl InMemoryLms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: RawUser, detail: UserDetail) {
        let mut state = lock(&self.state);
        state.user_details.insert(user.id, detail);
        state.users.push(user);
    }

    /// A user only reachable through course enrollment lists.
    pub fn add_user_detail(&self, detail: UserDetail) {
        lock(&self.state).user_details.insert(detail.id, detail);
    }

    pub fn add_course(&self, course: RawCourse, detail: CourseDetail) {
        let mut state = lock(&self.state);
        state.course_details.insert(course.id, detail);
        state.courses.push(course);
    }

    pub fn set_timeline(&self, unit_id: i64, user_ids: &[i64]) {
        lock(&self.state).timelines.insert(
            unit_id,
            user_ids
                .iter()
                .map(|&user_id| TimelineEvent { user_id })
                .collect(),
        );
    }

    /// Mutate a listed user in place (simulates an upstream edit).
    pub fn update_user(&self, user_id: i64, edit: impl FnOnce(&mut RawUser)) {
        let mut state = lock(&self.state);
        if let Some(user) = state.users.iter_mut().find(|u| u.id == user_id) {
            edit(user);
        }
    }

    /// Ids passed to `get_user`, in call order.
    pub fn user_detail_calls(&self) -> Vec<i64> {
        lock(&self.state).user_detail_calls.clone()
    }

    pub fn course_detail_calls(&self) -> Vec<i64> {
        lock(&self.state).course_detail_calls.clone()
    }
}

#[async_trait]
impl LmsApi for InMemoryLms {
    async fn list_users(&self) -> Result<Vec<RawUser>, LmsError> {
        Ok(lock(&self.state).users.clone())
    }

    async fn list_courses(&self) -> Result<Vec<RawCourse>, LmsError> {
        Ok(lock(&self.state).courses.clone())
    }

    async fn get_course(&self, course_id: i64) -> Result<Option<CourseDetail>, LmsError> {
        let mut state = lock(&self.state);
        state.course_detail_calls.push(course_id);
        Ok(state.course_details.get(&course_id).cloned())
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<UserDetail>, LmsError> {
        let mut state = lock(&self.state);
        state.user_detail_calls.push(user_id);
        Ok(state.user_details.get(&user_id).cloned())
    }

    async fn assignment_answers(&self, unit_id: i64) -> Result<Vec<TimelineEvent>, LmsError> {
        Ok(lock(&self.state)
            .timelines
            .get(&unit_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// CRM
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CrmState {
    next_id: u64,
    records: BTreeMap<String, Vec<RecordResult>>,
    unique_keys: HashMap<String, Vec<String>>,
    options: HashMap<(String, String), Vec<PropertyOption>>,
    associations: Vec<(String, String, AssociationInput)>,
    create_requests: HashMap<String, usize>,
    created_inputs: HashMap<String, usize>,
    updated_inputs: HashMap<String, usize>,
    option_additions: usize,
    rejected_batches: HashMap<String, Vec<CrmError>>,
    failing_values: Vec<(String, Value)>,
    drop_results_on_create: bool,
    duplicates_per_item: bool,
}

impl CrmState {
    fn allocate_id(&mut self) -> RemoteId {
        self.next_id += 1;
        RemoteId::new(format!("{}", 1000 + self.next_id))
    }

    fn find_duplicate(&self, object_type: &str, properties: &PropertyMap) -> Option<RemoteId> {
        let keys = self.unique_keys.get(object_type)?;
        let wanted: Vec<Option<String>> =
            keys.iter().map(|k| properties.get(k).and_then(as_text)).collect();
        if wanted.iter().any(Option::is_none) {
            return None;
        }
        self.records.get(object_type)?.iter().find_map(|record| {
            let existing: Vec<Option<String>> = keys
                .iter()
                .map(|k| record.properties.get(k).and_then(as_text))
                .collect();
            (existing == wanted).then(|| record.id.clone())
        })
    }
}

/// A CRM that keeps records in memory.
#[derive(Default)]
pub struct InMemoryCrm {
    state: Mutex<CrmState>,
}

impl InMemoryCrm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject creates whose `properties` collide on these properties with an
    /// existing record of `object_type`.
    pub fn unique_on(self, object_type: &str, properties: &[&str]) -> Self {
        lock(&self.state).unique_keys.insert(
            object_type.to_string(),
            properties.iter().map(|p| p.to_string()).collect(),
        );
        self
    }

    pub fn set_options(&self, object_type: &str, property: &str, options: Vec<PropertyOption>) {
        lock(&self.state)
            .options
            .insert((object_type.to_string(), property.to_string()), options);
    }

    /// Seed a record directly, as if created outside this pipeline.
    pub fn insert_record(&self, object_type: &str, properties: Value) -> RemoteId {
        let mut state = lock(&self.state);
        let id = state.allocate_id();
        let record = RecordResult {
            id: id.clone(),
            properties: echo(properties.as_object().cloned().unwrap_or_default()),
        };
        state
            .records
            .entry(object_type.to_string())
            .or_default()
            .push(record);
        id
    }

    /// Make the next create or update batch for `object_type` fail as a whole.
    pub fn reject_next_batch(&self, object_type: &str, error: CrmError) {
        lock(&self.state)
            .rejected_batches
            .entry(object_type.to_string())
            .or_default()
            .push(error);
    }

    /// Fail individual create inputs whose `property` equals `value`.
    pub fn fail_items_where(&self, property: &str, value: Value) {
        lock(&self.state)
            .failing_values
            .push((property.to_string(), value));
    }

    /// Report unique-key collisions as per-item CONFLICT errors of an
    /// otherwise successful batch instead of rejecting the whole batch.
    pub fn report_duplicates_per_item(&self) {
        lock(&self.state).duplicates_per_item = true;
    }

    /// Answer creates with ids but without echoed properties.
    pub fn drop_echoed_properties(&self) {
        lock(&self.state).drop_results_on_create = true;
    }

    pub fn records(&self, object_type: &str) -> Vec<RecordResult> {
        lock(&self.state)
            .records
            .get(object_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn record(&self, object_type: &str, id: &RemoteId) -> Option<RecordResult> {
        self.records(object_type).into_iter().find(|r| &r.id == id)
    }

    /// Number of create batch requests received for `object_type`.
    pub fn create_requests(&self, object_type: &str) -> usize {
        lock(&self.state)
            .create_requests
            .get(object_type)
            .copied()
            .unwrap_or(0)
    }

    /// Number of create inputs received for `object_type`, accepted or not.
    pub fn created_inputs(&self, object_type: &str) -> usize {
        lock(&self.state)
            .created_inputs
            .get(object_type)
            .copied()
            .unwrap_or(0)
    }

    pub fn updated_inputs(&self, object_type: &str) -> usize {
        lock(&self.state)
            .updated_inputs
            .get(object_type)
            .copied()
            .unwrap_or(0)
    }

    pub fn associations(&self, association_type: &str) -> Vec<AssociationInput> {
        lock(&self.state)
            .associations
            .iter()
            .filter(|(_, _, input)| input.association_type == association_type)
            .map(|(_, _, input)| input.clone())
            .collect()
    }

    pub fn options(&self, object_type: &str, property: &str) -> Vec<PropertyOption> {
        lock(&self.state)
            .options
            .get(&(object_type.to_string(), property.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Number of successful option additions, across object types.
    pub fn option_additions(&self) -> usize {
        lock(&self.state).option_additions
    }
}

#[async_trait]
impl CrmApi for InMemoryCrm {
    async fn create_batch(
        &self,
        object_type: &str,
        inputs: Vec<CreateInput>,
    ) -> Result<BatchResponse, CrmError> {
        let mut state = lock(&self.state);
        *state
            .create_requests
            .entry(object_type.to_string())
            .or_default() += 1;
        *state
            .created_inputs
            .entry(object_type.to_string())
            .or_default() += inputs.len();

        if inputs.len() > MAX_BATCH_SIZE {
            return Err(CrmError::Rejected {
                status: 400,
                category: Some("VALIDATION_ERROR".to_string()),
                message: format!("batch of {} inputs exceeds the limit", inputs.len()),
            });
        }
        if let Some(error) = state
            .rejected_batches
            .get_mut(object_type)
            .and_then(Vec::pop)
        {
            return Err(error);
        }
        if !state.duplicates_per_item {
            for input in &inputs {
                if let Some(existing) = state.find_duplicate(object_type, &input.properties) {
                    return Err(CrmError::Rejected {
                        status: 409,
                        category: Some("CONFLICT".to_string()),
                        message: format!("Record already exists. Existing ID: {existing}"),
                    });
                }
            }
        }

        let mut response = BatchResponse::default();
        for input in inputs {
            let failing = state.failing_values.iter().any(|(property, value)| {
                input.properties.get(property).and_then(as_text) == as_text(value)
            });
            if failing {
                response.errors.push(BatchItemError {
                    status: Some("error".to_string()),
                    category: Some("VALIDATION_ERROR".to_string()),
                    message: "Property values were not valid".to_string(),
                    context: None,
                });
                continue;
            }
            if let Some(existing) = state.find_duplicate(object_type, &input.properties) {
                response.errors.push(BatchItemError {
                    status: Some("error".to_string()),
                    category: Some("CONFLICT".to_string()),
                    message: format!("Record already exists. Existing ID: {existing}"),
                    context: None,
                });
                continue;
            }

            let id = state.allocate_id();
            let record = RecordResult {
                id: id.clone(),
                properties: echo(input.properties),
            };
            state
                .records
                .entry(object_type.to_string())
                .or_default()
                .push(record.clone());
            response.results.push(if state.drop_results_on_create {
                RecordResult {
                    id,
                    properties: PropertyMap::new(),
                }
            } else {
                record
            });
        }
        Ok(response)
    }

    async fn update_batch(
        &self,
        object_type: &str,
        inputs: Vec<UpdateInput>,
    ) -> Result<BatchResponse, CrmError> {
        let mut state = lock(&self.state);
        *state
            .updated_inputs
            .entry(object_type.to_string())
            .or_default() += inputs.len();

        if let Some(error) = state
            .rejected_batches
            .get_mut(object_type)
            .and_then(Vec::pop)
        {
            return Err(error);
        }

        let mut response = BatchResponse::default();
        let records = state.records.entry(object_type.to_string()).or_default();
        for input in inputs {
            match records.iter_mut().find(|r| r.id == input.id) {
                Some(record) => {
                    record.properties.extend(echo(input.properties));
                    response.results.push(record.clone());
                }
                None => response.errors.push(BatchItemError {
                    status: Some("error".to_string()),
                    category: Some("OBJECT_NOT_FOUND".to_string()),
                    message: format!("Object {} not found", input.id),
                    context: None,
                }),
            }
        }
        Ok(response)
    }

    async fn create_associations(
        &self,
        from_object_type: &str,
        to_object_type: &str,
        inputs: Vec<AssociationInput>,
    ) -> Result<AssociationResponse, CrmError> {
        let mut state = lock(&self.state);
        let mut response = AssociationResponse::default();
        for input in inputs {
            response.results.push(json!({
                "from": {"id": input.from.id},
                "to": {"id": input.to.id},
            }));
            state.associations.push((
                from_object_type.to_string(),
                to_object_type.to_string(),
                input,
            ));
        }
        Ok(response)
    }

    async fn read_property(
        &self,
        object_type: &str,
        property: &str,
    ) -> Result<PropertyDefinition, CrmError> {
        Ok(PropertyDefinition {
            name: property.to_string(),
            options: self.options(object_type, property),
        })
    }

    async fn add_property_option(
        &self,
        object_type: &str,
        property: &str,
        option: PropertyOption,
    ) -> Result<PropertyDefinition, CrmError> {
        let mut state = lock(&self.state);
        let options = state
            .options
            .entry((object_type.to_string(), property.to_string()))
            .or_default();
        if !options.iter().any(|o| o.value == option.value) {
            options.push(option);
        }
        let definition = PropertyDefinition {
            name: property.to_string(),
            options: options.clone(),
        };
        state.option_additions += 1;
        Ok(definition)
    }

    async fn search(
        &self,
        object_type: &str,
        request: &SearchRequest,
    ) -> Result<RecordPage, CrmError> {
        let matching: Vec<RecordResult> = self
            .records(object_type)
            .into_iter()
            .filter(|record| {
                request.filter_groups.iter().any(|group| {
                    group.filters.iter().all(|filter| {
                        let value = record.properties.get(&filter.property_name).and_then(as_text);
                        match filter.operator {
                            FilterOperator::Eq => value == filter.value,
                            FilterOperator::HasProperty => value.is_some(),
                            FilterOperator::NotHasProperty => value.is_none(),
                        }
                    })
                })
            })
            .collect();
        Ok(page(matching, request.limit, request.after.as_deref()))
    }

    async fn list_page(
        &self,
        object_type: &str,
        _properties: &[String],
        after: Option<&str>,
    ) -> Result<RecordPage, CrmError> {
        Ok(page(self.records(object_type), MAX_BATCH_SIZE, after))
    }
}

fn page(records: Vec<RecordResult>, limit: usize, after: Option<&str>) -> RecordPage {
    let start: usize = after.and_then(|a| a.parse().ok()).unwrap_or(0);
    let end = (start + limit.max(1)).min(records.len());
    let results = records.get(start..end).map(<[_]>::to_vec).unwrap_or_default();
    let paging = (end < records.len()).then(|| Paging {
        next: Some(NextPage {
            after: end.to_string(),
        }),
    });
    RecordPage { results, paging }
}

/// Property values as the CRM returns them: strings, nulls dropped.
fn echo(properties: PropertyMap) -> PropertyMap {
    properties
        .into_iter()
        .filter_map(|(name, value)| as_text(&value).map(|text| (name, Value::String(text))))
        .collect()
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DocsState {
    next_id: u64,
    created: Vec<DocumentRequest>,
    completed: Vec<String>,
    sessions: Vec<String>,
    failing_courses: Vec<String>,
}

/// A document service that records every request.
#[derive(Default)]
pub struct InMemoryDocs {
    state: Mutex<DocsState>,
}

impl InMemoryDocs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject document creation for certificates of `course_name`.
    pub fn fail_for_course(&self, course_name: &str) {
        lock(&self.state)
            .failing_courses
            .push(course_name.to_string());
    }

    pub fn created(&self) -> Vec<DocumentRequest> {
        lock(&self.state).created.clone()
    }

    pub fn completed(&self) -> Vec<String> {
        lock(&self.state).completed.clone()
    }
}

#[async_trait]
impl DocumentApi for InMemoryDocs {
    async fn create_document(&self, request: &DocumentRequest) -> Result<String, DocumentError> {
        let mut state = lock(&self.state);
        let failing = request.tokens.iter().any(|token| {
            token.name == "Course Name" && state.failing_courses.contains(&token.value)
        });
        if failing {
            return Err(DocumentError::Rejected {
                url: "memory://documents".to_string(),
                status: 400,
                body: "template rejected".to_string(),
            });
        }
        state.next_id += 1;
        state.created.push(request.clone());
        Ok(format!("doc-{}", state.next_id))
    }

    async fn mark_completed(&self, document_id: &str) -> Result<(), DocumentError> {
        lock(&self.state).completed.push(document_id.to_string());
        Ok(())
    }

    async fn create_session(&self, document_id: &str) -> Result<String, DocumentError> {
        let session = format!("sess-{document_id}");
        lock(&self.state).sessions.push(session.clone());
        Ok(session)
    }

    fn share_url(&self, session_id: &str) -> String {
        format!("https://docs.example.com/s/{session_id}")
    }
}
