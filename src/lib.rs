//! lms-crm-sync library
//!
//! Incremental synchronization of learners, courses and enrollments from an
//! LMS into a CRM records API, with a local SQLite store as the staging and
//! identity-reconciliation layer.
//!
//! # Features
//!
//! - Incremental selection: only records changed since the last run's start
//!   (plus every scheduled course) are rebuilt
//! - Idempotent dispatch: a durable identity ledger maps every LMS key to
//!   the CRM record created for it, so repeated runs update instead of
//!   creating duplicates
//! - Associations: learner and course links to each enrollment, once both
//!   ends are reconciled
//! - Certificates: generated documents, durable certificate ids and LinkedIn
//!   "add certification" links for completed enrollments
//!
//! # CLI Usage
//!
//! ```bash
//! # Incremental sync
//! lms-crm-sync sync --lms-base-url https://acme.lms.example/api/v1 \
//!   --lms-api-key ... --crm-token ... --database lms-crm-sync.db
//!
//! # Certificates and assignment due dates
//! lms-crm-sync certificates --crm-token ... --document-api-key ... \
//!   --document-template-id ... --document-folder-id ...
//!
//! # Inspect or move the time cursor
//! lms-crm-sync cursor show
//! lms-crm-sync cursor set 2024-03-01T00:00:00Z
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono_tz::Tz;
use clap::Parser;
use crm_sink::{CrmConfig, DEFAULT_CRM_BASE_URL, MAX_BATCH_SIZE};
use docgen_client::{
    DocumentConfig, DocumentTemplate, DEFAULT_DOCUMENT_BASE_URL, DEFAULT_SHARE_BASE_URL,
};
use lms_source::LmsConfig;
use sync_core::RetryConfig;

pub mod associate;
pub mod certificates;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod payload;
pub mod select;
pub mod stage;
pub mod sync;
pub mod template;
pub mod testing;

pub use certificates::{issue_certificates, CertificateReport, CertificateSettings};
pub use config::{parse_duration, QuerySet};
pub use sync::{run_sync, SyncReport, SyncSettings};

#[derive(Parser, Clone)]
pub struct LmsOpts {
    /// LMS API base URL
    #[arg(long, env = "LMS_BASE_URL")]
    pub lms_base_url: String,

    /// LMS API key
    #[arg(long, env = "LMS_API_KEY", hide_env_values = true)]
    pub lms_api_key: String,

    /// Minimum pause between LMS requests (e.g. "360ms", "1s")
    #[arg(long, default_value = "360ms")]
    pub request_pause: String,

    /// Retries for transient LMS failures
    #[arg(long, default_value = "3")]
    pub lms_max_retries: u32,
}

impl LmsOpts {
    pub fn to_config(&self) -> anyhow::Result<LmsConfig> {
        let mut config = LmsConfig::new(&self.lms_base_url, &self.lms_api_key);
        config.request_pause = parse_duration(&self.request_pause)
            .with_context(|| format!("Invalid --request-pause '{}'", self.request_pause))?;
        config.retry = RetryConfig::new(self.lms_max_retries);
        Ok(config)
    }
}

#[derive(Parser, Clone)]
pub struct CrmOpts {
    /// CRM API base URL
    #[arg(long, default_value = DEFAULT_CRM_BASE_URL, env = "CRM_BASE_URL")]
    pub crm_base_url: String,

    /// CRM private app token
    #[arg(long, env = "CRM_TOKEN", hide_env_values = true)]
    pub crm_token: String,

    /// Object type learners are synced to
    #[arg(long, default_value = "contacts")]
    pub learner_object: String,

    /// Object type courses are synced to
    #[arg(long, default_value = "courses")]
    pub course_object: String,

    /// Object type enrollment instances are synced to
    #[arg(long, default_value = "student_class_instance")]
    pub instance_object: String,

    /// Association type linking a learner to an instance
    #[arg(long, default_value = "student_class_instance_to_contact")]
    pub learner_instance_association: String,

    /// Association type linking a course to an instance
    #[arg(long, default_value = "course_to_student_class_instance")]
    pub course_instance_association: String,

    /// Enumerated property holding course template options
    #[arg(long, default_value = "course_template_name")]
    pub template_property: String,

    /// Inputs per batch request (at most 100)
    #[arg(long, default_value = "100")]
    pub batch_size: usize,

    /// Retries for transient CRM failures
    #[arg(long, default_value = "3")]
    pub crm_max_retries: u32,
}

impl CrmOpts {
    pub fn to_config(&self) -> CrmConfig {
        let mut config = CrmConfig::new(&self.crm_base_url, &self.crm_token);
        config.retry = RetryConfig::new(self.crm_max_retries);
        config
    }

    pub fn batch_size(&self) -> usize {
        if self.batch_size > MAX_BATCH_SIZE {
            tracing::warn!(
                "--batch-size {} exceeds the CRM limit, using {MAX_BATCH_SIZE}",
                self.batch_size
            );
        }
        self.batch_size.clamp(1, MAX_BATCH_SIZE)
    }
}

#[derive(Parser, Clone)]
pub struct StoreOpts {
    /// Local SQLite file holding staging tables, identity ledger and cursor
    #[arg(long, default_value = "lms-crm-sync.db", env = "SYNC_DATABASE")]
    pub database: PathBuf,

    /// Directory whose `<name>.sql` files replace the built-in query templates
    #[arg(long)]
    pub query_dir: Option<PathBuf>,
}

impl StoreOpts {
    pub fn queries(&self) -> anyhow::Result<QuerySet> {
        match &self.query_dir {
            Some(dir) => QuerySet::with_overrides(dir),
            None => Ok(QuerySet::builtin()),
        }
    }
}

#[derive(Parser, Clone)]
pub struct DocumentOpts {
    /// Document API base URL
    #[arg(long, default_value = DEFAULT_DOCUMENT_BASE_URL, env = "DOCUMENT_BASE_URL")]
    pub document_base_url: String,

    /// Base URL of shared document links
    #[arg(long, default_value = DEFAULT_SHARE_BASE_URL)]
    pub document_share_url: String,

    /// Document API key
    #[arg(long, env = "DOCUMENT_API_KEY", hide_env_values = true)]
    pub document_api_key: String,

    /// Certificate template id
    #[arg(long, env = "DOCUMENT_TEMPLATE_ID")]
    pub document_template_id: String,

    /// Folder new certificates are filed in
    #[arg(long, env = "DOCUMENT_FOLDER_ID")]
    pub document_folder_id: String,

    /// Placeholder recipient the template requires
    #[arg(long, default_value = "certificates@example.com")]
    pub document_recipient: String,

    /// Wait between creating a document and completing it
    #[arg(long, default_value = "5s")]
    pub settle_delay: String,

    /// Retries for transient document API failures
    #[arg(long, default_value = "3")]
    pub document_max_retries: u32,
}

impl DocumentOpts {
    pub fn template(&self) -> DocumentTemplate {
        DocumentTemplate {
            template_id: self.document_template_id.clone(),
            folder_id: self.document_folder_id.clone(),
            recipient_email: self.document_recipient.clone(),
        }
    }

    pub fn to_config(&self) -> DocumentConfig {
        DocumentConfig {
            base_url: self.document_base_url.clone(),
            share_base_url: self.document_share_url.clone(),
            api_key: self.document_api_key.clone(),
            template: self.template(),
            retry: RetryConfig::new(self.document_max_retries),
        }
    }

    pub fn settle_delay(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.settle_delay)
            .with_context(|| format!("Invalid --settle-delay '{}'", self.settle_delay))
    }
}

/// Parse an IANA zone name such as `US/Eastern`.
pub fn parse_timezone(name: &str) -> anyhow::Result<Tz> {
    name.parse::<Tz>()
        .map_err(|e| anyhow::anyhow!("Invalid time zone '{name}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        crm: CrmOpts,
        #[command(flatten)]
        lms: LmsOpts,
    }

    #[test]
    fn test_defaults_and_conversions() {
        let harness = Harness::parse_from([
            "test",
            "--crm-token",
            "t",
            "--lms-base-url",
            "https://lms.example/api/v1",
            "--lms-api-key",
            "k",
            "--batch-size",
            "250",
        ]);

        assert_eq!(harness.crm.crm_base_url, DEFAULT_CRM_BASE_URL);
        assert_eq!(harness.crm.learner_object, "contacts");
        assert_eq!(harness.crm.batch_size(), MAX_BATCH_SIZE);

        let lms = harness.lms.to_config().unwrap();
        assert_eq!(lms.request_pause, Duration::from_millis(360));
        assert_eq!(lms.retry.max_retries, 3);
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!(parse_timezone("US/Eastern").unwrap(), chrono_tz::US::Eastern);
        assert!(parse_timezone("Mars/Olympus").is_err());
    }
}
