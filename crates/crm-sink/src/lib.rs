//! CRM records API client for lms-crm-sync.
//!
//! [`CrmApi`] is the seam the reconciliation core talks to: batch CREATE and
//! UPDATE of records, association CREATE, enumerated-option read/append,
//! search and paginated listing. [`CrmClient`] implements it over HTTP with
//! bearer auth and retry with exponential backoff for 429 and 5xx.

mod client;
mod error;
mod paging;
pub mod types;

pub use client::{CrmApi, CrmClient, CrmConfig, DEFAULT_CRM_BASE_URL};
pub use error::CrmError;
pub use paging::{list_all, search_all};
pub use types::{
    AssociationInput, AssociationResponse, BatchItemError, BatchRequest, BatchResponse,
    CreateInput, Filter, FilterGroup, FilterOperator, PropertyDefinition, PropertyOption,
    RecordPage, RecordResult, SearchRequest, UpdateInput, MAX_BATCH_SIZE,
};
