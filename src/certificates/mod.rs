//! Certificate issuance and assignment due dates.
//!
//! Works on instance records already in the CRM: every instance flagged for
//! a certificate and still without a LinkedIn link gets a generated document,
//! a durable certificate id and a LinkedIn "add certification" link. The run
//! then fills in missing assignment due dates.

mod due_date;
mod linkedin;

pub use due_date::{assignment_due_date, subtract_business_days, update_due_dates};
pub use linkedin::{add_certification_url, format_certificate_id, Certification};

use std::time::Duration;

use anyhow::Context;
use chrono::{Datelike, NaiveDate};
use crm_sink::{search_all, CrmApi, Filter, RecordResult, SearchRequest, UpdateInput, MAX_BATCH_SIZE};
use docgen_client::{CertificateSubject, DocumentApi, DocumentTemplate};
use serde_json::Value;
use staging::Store;
use sync_core::{midnight_millis, PropertyMap};

/// Properties read from each eligible instance record.
const READ_PROPERTIES: [&str; 5] = [
    "hs_object_id",
    "firstname",
    "lastname",
    "course_name",
    "linkedin_company_id",
];

#[derive(Debug, Clone)]
pub struct CertificateSettings {
    pub instance_object_type: String,
    /// Pause between creating a document and completing it; the document
    /// service needs a few seconds before the status change is accepted.
    pub settle_delay: Duration,
    pub batch_size: usize,
    pub dry_run: bool,
}

impl Default for CertificateSettings {
    fn default() -> Self {
        Self {
            instance_object_type: "student_class_instance".to_string(),
            settle_delay: Duration::from_secs(5),
            batch_size: MAX_BATCH_SIZE,
            dry_run: false,
        }
    }
}

/// Outcome of sending an UPDATE batch set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateCount {
    pub sent: usize,
    pub updated: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CertificateReport {
    pub eligible: usize,
    pub issued: usize,
    pub failed: usize,
    pub certificate_updates: UpdateCount,
    pub due_dates: UpdateCount,
}

/// Issue certificates for every eligible instance, then set missing due
/// dates. Only the eligibility search is fatal; single records that fail are
/// logged and skipped.
pub async fn issue_certificates<C, D>(
    crm: &C,
    docs: &D,
    store: &Store,
    template: &DocumentTemplate,
    settings: &CertificateSettings,
    today: NaiveDate,
) -> anyhow::Result<CertificateReport>
where
    C: CrmApi + ?Sized,
    D: DocumentApi + ?Sized,
{
    let mut report = CertificateReport::default();
    tracing::info!("--- BEGIN certificates ({today}) ---");

    let request = SearchRequest::all_of(vec![
        Filter::eq("certificate_checkbox", "true"),
        Filter::not_has_property("linkedin_badge"),
    ])
    .with_properties(READ_PROPERTIES);
    let records = search_all(crm, &settings.instance_object_type, &request)
        .await
        .context("Failed to search for instances awaiting a certificate")?;
    report.eligible = records.len();
    tracing::info!("Obtained {} instances to create certificates for", records.len());

    if settings.dry_run {
        tracing::info!("Dry run: would issue {} certificates", records.len());
    } else {
        let mut inputs = Vec::new();
        for record in &records {
            match issue_one(docs, store, template, settings, record, today).await {
                Ok(properties) => inputs.push(UpdateInput {
                    id: record.id.clone(),
                    properties,
                }),
                Err(e) => {
                    tracing::error!(record = %record.id, "Failed to issue certificate: {e:#}");
                    report.failed += 1;
                }
            }
        }
        report.issued = inputs.len();
        report.certificate_updates = send_updates(
            crm,
            &settings.instance_object_type,
            inputs,
            settings.batch_size,
        )
        .await;
    }
    tracing::info!(
        "--- END certificates: {} issued, {} failed ---",
        report.issued,
        report.failed
    );

    tracing::info!("--- BEGIN assignment due dates ---");
    match update_due_dates(
        crm,
        &settings.instance_object_type,
        today,
        settings.batch_size,
        settings.dry_run,
    )
    .await
    {
        Ok(count) => report.due_dates = count,
        Err(e) => tracing::error!(error = %e, "Failed to list instances for due dates"),
    }
    tracing::info!(
        "--- END assignment due dates: {} set ---",
        report.due_dates.updated
    );

    Ok(report)
}

/// Create, complete and share one certificate document. Returns the CRM
/// properties to write back.
async fn issue_one<D: DocumentApi + ?Sized>(
    docs: &D,
    store: &Store,
    template: &DocumentTemplate,
    settings: &CertificateSettings,
    record: &RecordResult,
    today: NaiveDate,
) -> anyhow::Result<PropertyMap> {
    let course_name = record
        .property_str("course_name")
        .context("instance has no course name")?;
    let subject = CertificateSubject {
        first_name: record.property_str("firstname").unwrap_or_default().to_string(),
        last_name: record.property_str("lastname").unwrap_or_default().to_string(),
        course_name: course_name.to_string(),
        issued_on: today,
    };

    let certificate_id = format_certificate_id(
        store
            .allocate_certificate_id(&record.id)
            .context("Failed to allocate a certificate id")?,
    );

    let document_id = docs
        .create_document(&template.certificate_request(&subject))
        .await?;
    if !settings.settle_delay.is_zero() {
        tokio::time::sleep(settings.settle_delay).await;
    }
    docs.mark_completed(&document_id).await?;
    let session_id = docs.create_session(&document_id).await?;
    let certificate_url = docs.share_url(&session_id);

    let linkedin_badge = add_certification_url(&Certification {
        course_name,
        organization_id: record.property_str("linkedin_company_id").unwrap_or_default(),
        issue_year: today.year(),
        issue_month: today.month(),
        certificate_url: &certificate_url,
        certificate_id: &certificate_id,
    });
    tracing::debug!(record = %record.id, certificate_id = %certificate_id, "Certificate issued");

    let mut properties = PropertyMap::new();
    properties.insert("unique_certificate_id".into(), Value::from(certificate_id));
    properties.insert("certificate_file_url".into(), Value::from(certificate_url));
    properties.insert("linkedin_badge".into(), Value::from(linkedin_badge));
    properties.insert("certificate_issue_year".into(), Value::from(today.year()));
    properties.insert("certificate_issue_month".into(), Value::from(today.month()));
    properties.insert(
        "certificate_issue_date".into(),
        Value::from(midnight_millis(today)),
    );
    Ok(properties)
}

/// Send UPDATE inputs in chunks, counting per-item and whole-batch failures.
pub(crate) async fn send_updates<A: CrmApi + ?Sized>(
    crm: &A,
    object_type: &str,
    inputs: Vec<UpdateInput>,
    batch_size: usize,
) -> UpdateCount {
    let mut count = UpdateCount::default();
    for chunk in inputs.chunks(batch_size.clamp(1, MAX_BATCH_SIZE)) {
        count.sent += chunk.len();
        match crm.update_batch(object_type, chunk.to_vec()).await {
            Ok(response) => {
                count.updated += response.results.len();
                count.failed += response.errors.len();
                for error in &response.errors {
                    tracing::warn!(message = %error.message, "CRM rejected an update input");
                }
            }
            Err(e) => {
                tracing::error!(size = chunk.len(), error = %e, "Update batch rejected");
                count.failed += chunk.len();
            }
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::testing::{InMemoryCrm, InMemoryDocs};

    const INSTANCES: &str = "instances";

    fn settings() -> CertificateSettings {
        CertificateSettings {
            instance_object_type: INSTANCES.to_string(),
            settle_delay: Duration::ZERO,
            batch_size: 100,
            dry_run: false,
        }
    }

    fn template() -> DocumentTemplate {
        DocumentTemplate {
            template_id: "tpl-1".to_string(),
            folder_id: "folder-1".to_string(),
            recipient_email: "certificates@example.com".to_string(),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    fn eligible(crm: &InMemoryCrm, first: &str, course: &str) -> sync_core::RemoteId {
        crm.insert_record(
            INSTANCES,
            json!({
                "certificate_checkbox": "true",
                "firstname": first,
                "lastname": "Lovelace",
                "course_name": course,
                "linkedin_company_id": "4242",
            }),
        )
    }

    #[tokio::test]
    async fn test_issues_certificate_and_writes_back_links() {
        let crm = InMemoryCrm::new();
        let docs = InMemoryDocs::new();
        let store = Store::in_memory().unwrap();
        let id = eligible(&crm, "Ada", "Data & AI");
        crm.insert_record(
            INSTANCES,
            json!({"certificate_checkbox": "true", "linkedin_badge": "https://x"}),
        );
        crm.insert_record(INSTANCES, json!({"certificate_checkbox": "false"}));

        let report = issue_certificates(&crm, &docs, &store, &template(), &settings(), today())
            .await
            .unwrap();

        assert_eq!(report.eligible, 1);
        assert_eq!(report.issued, 1);
        assert_eq!(report.certificate_updates.updated, 1);
        assert_eq!(docs.created().len(), 1);
        assert_eq!(docs.created()[0].name, "Data & AI - Ada Lovelace Certificate");
        assert_eq!(docs.completed(), vec!["doc-1".to_string()]);

        let record = crm.record(INSTANCES, &id).unwrap();
        assert_eq!(record.property_str("unique_certificate_id"), Some("000-00000-01"));
        assert_eq!(
            record.property_str("certificate_file_url"),
            Some("https://docs.example.com/s/sess-doc-1")
        );
        let badge = record.property_str("linkedin_badge").unwrap();
        assert!(badge.contains("organizationId=4242&issueYear=2024&issueMonth=3"));
        assert!(badge.ends_with("&certId=000-00000-01"));
        assert_eq!(record.property_str("certificate_issue_year"), Some("2024"));
        // 2024-03-15T00:00:00Z
        assert_eq!(record.property_str("certificate_issue_date"), Some("1710460800000"));
    }

    #[tokio::test]
    async fn test_failed_document_skips_only_that_record() {
        let crm = InMemoryCrm::new();
        let docs = InMemoryDocs::new();
        docs.fail_for_course("Broken");
        let store = Store::in_memory().unwrap();
        let broken = eligible(&crm, "Ada", "Broken");
        let fine = eligible(&crm, "Grace", "Compilers");

        let report = issue_certificates(&crm, &docs, &store, &template(), &settings(), today())
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.issued, 1);
        assert!(crm
            .record(INSTANCES, &broken)
            .unwrap()
            .property_str("linkedin_badge")
            .is_none());
        assert!(crm
            .record(INSTANCES, &fine)
            .unwrap()
            .property_str("linkedin_badge")
            .is_some());
    }

    #[tokio::test]
    async fn test_certificate_id_is_reused_for_the_same_instance() {
        let crm = InMemoryCrm::new();
        let docs = InMemoryDocs::new();
        docs.fail_for_course("Flaky");
        let store = Store::in_memory().unwrap();
        let id = eligible(&crm, "Ada", "Flaky");

        // The first attempt allocates an id, then the document fails.
        issue_certificates(&crm, &docs, &store, &template(), &settings(), today())
            .await
            .unwrap();
        let allocated = store.allocate_certificate_id(&id).unwrap();

        assert_eq!(allocated, 1);
    }

    #[tokio::test]
    async fn test_dry_run_creates_no_documents() {
        let crm = InMemoryCrm::new();
        let docs = InMemoryDocs::new();
        let store = Store::in_memory().unwrap();
        eligible(&crm, "Ada", "Data");
        let settings = CertificateSettings {
            dry_run: true,
            ..settings()
        };

        let report = issue_certificates(&crm, &docs, &store, &template(), &settings, today())
            .await
            .unwrap();

        assert_eq!(report.eligible, 1);
        assert_eq!(report.issued, 0);
        assert!(docs.created().is_empty());
        assert_eq!(crm.updated_inputs(INSTANCES), 0);
    }
}
