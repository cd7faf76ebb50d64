//! Command-line interface for lms-crm-sync
//!
//! # Usage Examples
//!
//! ## Incremental Sync
//! ```bash
//! lms-crm-sync sync \
//!   --lms-base-url https://acme.lms.example/api/v1 --lms-api-key ... \
//!   --crm-token ... \
//!   --database /var/lib/lms-crm-sync/state.db
//!
//! # Stage and build payloads only, no remote or ledger writes
//! lms-crm-sync sync ... --dry-run
//! ```
//!
//! ## Certificates
//! ```bash
//! lms-crm-sync certificates --crm-token ... \
//!   --document-api-key ... --document-template-id ... --document-folder-id ...
//! ```
//!
//! ## Time Cursor
//! ```bash
//! lms-crm-sync cursor show
//! lms-crm-sync cursor set 1709251200000
//! lms-crm-sync cursor set 2024-03-01T00:00:00Z
//! ```

use anyhow::Context;
use checkpoint::{Checkpoint, SyncManager, TimeCursor};
use clap::{Parser, Subcommand};
use crm_sink::CrmClient;
use docgen_client::DocumentClient;
use lms_crm_sync::{
    issue_certificates, parse_timezone, run_sync, CertificateSettings, CrmOpts, DocumentOpts,
    LmsOpts, StoreOpts, SyncSettings,
};
use lms_source::LmsClient;
use staging::Store;

#[derive(Parser)]
#[command(name = "lms-crm-sync")]
#[command(about = "Synchronize LMS learners, courses and enrollments into a CRM")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one incremental sync from the LMS to the CRM
    Sync {
        #[command(flatten)]
        lms: LmsOpts,

        #[command(flatten)]
        crm: CrmOpts,

        #[command(flatten)]
        store: StoreOpts,

        /// Zone live-session datetimes are given in
        #[arg(long, default_value = "US/Eastern")]
        session_timezone: String,

        /// Stage and build payloads without writing to the CRM, the identity
        /// ledger or the cursor
        #[arg(long)]
        dry_run: bool,
    },

    /// Issue pending certificates and fill in assignment due dates
    Certificates {
        #[command(flatten)]
        crm: CrmOpts,

        #[command(flatten)]
        documents: DocumentOpts,

        #[command(flatten)]
        store: StoreOpts,

        /// Issue date, defaults to today (UTC)
        #[arg(long)]
        date: Option<chrono::NaiveDate>,

        /// Search and plan without creating documents or writing to the CRM
        #[arg(long)]
        dry_run: bool,
    },

    /// Inspect or overwrite the time cursor
    Cursor {
        #[command(flatten)]
        store: StoreOpts,

        #[command(subcommand)]
        action: CursorAction,
    },
}

#[derive(Subcommand)]
enum CursorAction {
    /// Print the stored cursor
    Show,
    /// Overwrite the cursor (epoch milliseconds or RFC 3339)
    Set { value: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sync {
            lms,
            crm,
            store,
            session_timezone,
            dry_run,
        } => run_sync_command(lms, crm, store, session_timezone, dry_run).await?,
        Commands::Certificates {
            crm,
            documents,
            store,
            date,
            dry_run,
        } => run_certificates(crm, documents, store, date, dry_run).await?,
        Commands::Cursor { store, action } => run_cursor(store, action)?,
    }

    Ok(())
}

fn open_store(opts: &StoreOpts) -> anyhow::Result<Store> {
    Store::open(&opts.database)
        .with_context(|| format!("Failed to open local store {}", opts.database.display()))
}

async fn run_sync_command(
    lms_opts: LmsOpts,
    crm_opts: CrmOpts,
    store_opts: StoreOpts,
    session_timezone: String,
    dry_run: bool,
) -> anyhow::Result<()> {
    let run_started = chrono::Utc::now();
    if dry_run {
        tracing::info!("Running in dry-run mode - no remote writes, cursor stays put");
    }

    let settings = SyncSettings {
        learner_object_type: crm_opts.learner_object.clone(),
        course_object_type: crm_opts.course_object.clone(),
        instance_object_type: crm_opts.instance_object.clone(),
        template_property: crm_opts.template_property.clone(),
        learner_instance_association: crm_opts.learner_instance_association.clone(),
        course_instance_association: crm_opts.course_instance_association.clone(),
        batch_size: crm_opts.batch_size(),
        session_zone: parse_timezone(&session_timezone)?,
        dry_run,
        queries: store_opts.queries()?,
    };

    let mut store = open_store(&store_opts)?;
    let lms = LmsClient::new(lms_opts.to_config()?).context("Failed to build LMS client")?;
    let crm = CrmClient::new(crm_opts.to_config()).context("Failed to build CRM client")?;

    let report = run_sync(&lms, &crm, &mut store, &settings, run_started).await?;
    tracing::info!(
        creates = report.creates_sent(),
        conflicts = report.conflicts(),
        learner_links = report.learner_associations.created,
        course_links = report.course_associations.created,
        "Sync completed"
    );
    Ok(())
}

async fn run_certificates(
    crm_opts: CrmOpts,
    document_opts: DocumentOpts,
    store_opts: StoreOpts,
    date: Option<chrono::NaiveDate>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let today = date.unwrap_or_else(|| chrono::Utc::now().date_naive());
    let settings = CertificateSettings {
        instance_object_type: crm_opts.instance_object.clone(),
        settle_delay: document_opts.settle_delay()?,
        batch_size: crm_opts.batch_size(),
        dry_run,
    };

    let store = open_store(&store_opts)?;
    let crm = CrmClient::new(crm_opts.to_config()).context("Failed to build CRM client")?;
    let docs = DocumentClient::new(document_opts.to_config())
        .context("Failed to build document client")?;

    let report = issue_certificates(
        &crm,
        &docs,
        &store,
        &document_opts.template(),
        &settings,
        today,
    )
    .await?;
    tracing::info!(
        issued = report.issued,
        failed = report.failed,
        due_dates = report.due_dates.updated,
        "Certificate run completed"
    );
    Ok(())
}

fn run_cursor(store_opts: StoreOpts, action: CursorAction) -> anyhow::Result<()> {
    let mut store = open_store(&store_opts)?;
    let manager = SyncManager::new(true);

    match action {
        CursorAction::Show => {
            let cursor = manager.read_checkpoint::<TimeCursor, _>(&store)?;
            match cursor {
                Some(cursor) => {
                    let at = cursor
                        .to_datetime()
                        .map(|dt| dt.to_rfc3339())
                        .unwrap_or_else(|| "out of range".to_string());
                    println!("{} ({at})", cursor.to_cli_string());
                }
                None => println!("no cursor stored, the next sync starts from the epoch"),
            }
        }
        CursorAction::Set { value } => {
            let cursor = TimeCursor::from_cli_string(&value)?;
            manager.emit_checkpoint(&mut store, &cursor)?;
        }
    }
    Ok(())
}
