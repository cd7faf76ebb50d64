//! One incremental sync run.
//!
//! Phases run strictly in order, each to completion:
//!
//! 1. read the time cursor (fatal on failure)
//! 2. clear the staging tables and stage courses, learners, instances
//! 3. per entity kind: partition into CREATE/UPDATE, dispatch, reconcile
//! 4. associations, now that both ends carry remote ids
//! 5. advance the cursor to this run's start
//!
//! Learners are dispatched before courses and courses before instances so
//! that associations find as many reconciled ids as possible.

use anyhow::Context;
use checkpoint::{SyncManager, TimeCursor};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use crm_sink::{CrmApi, MAX_BATCH_SIZE};
use lms_source::LmsApi;
use staging::Store;
use sync_core::EntityKind;

use crate::associate::{associate, AssociationLink, AssociationOutcome};
use crate::config::QuerySet;
use crate::context::RunContext;
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::payload::{build_create_batch, build_update_batch};
use crate::stage::{stage_courses, stage_instances, stage_learners, StageSettings};
use crate::template::{TemplateCatalog, TemplateTarget};

/// Everything a sync run needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub learner_object_type: String,
    pub course_object_type: String,
    pub instance_object_type: String,
    /// Enumerated property holding course template options
    pub template_property: String,
    pub learner_instance_association: String,
    pub course_instance_association: String,
    pub batch_size: usize,
    pub session_zone: Tz,
    pub dry_run: bool,
    pub queries: QuerySet,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            learner_object_type: "contacts".to_string(),
            course_object_type: "courses".to_string(),
            instance_object_type: "student_class_instance".to_string(),
            template_property: "course_template_name".to_string(),
            learner_instance_association: "student_class_instance_to_contact".to_string(),
            course_instance_association: "course_to_student_class_instance".to_string(),
            batch_size: MAX_BATCH_SIZE,
            session_zone: chrono_tz::US::Eastern,
            dry_run: false,
            queries: QuerySet::builtin(),
        }
    }
}

impl SyncSettings {
    pub fn object_type(&self, kind: EntityKind) -> &str {
        match kind {
            EntityKind::Learner => &self.learner_object_type,
            EntityKind::Course => &self.course_object_type,
            EntityKind::EnrollmentInstance => &self.instance_object_type,
        }
    }

    fn template_target(&self) -> TemplateTarget<'_> {
        TemplateTarget {
            property: &self.template_property,
            object_types: [&self.course_object_type, &self.instance_object_type],
        }
    }
}

/// Counts for one entity kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityReport {
    pub staged: usize,
    pub creates_planned: usize,
    pub updates_planned: usize,
    pub dispatch: DispatchOutcome,
}

/// What one run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Cursor the run started from
    pub cursor: Option<TimeCursor>,
    pub learners: EntityReport,
    pub courses: EntityReport,
    pub instances: EntityReport,
    pub learner_associations: AssociationOutcome,
    pub course_associations: AssociationOutcome,
    /// Cursor stored at the end, `None` on a dry run
    pub advanced_to: Option<TimeCursor>,
}

impl SyncReport {
    pub fn entity(&self, kind: EntityKind) -> &EntityReport {
        match kind {
            EntityKind::Learner => &self.learners,
            EntityKind::Course => &self.courses,
            EntityKind::EnrollmentInstance => &self.instances,
        }
    }

    fn entity_mut(&mut self, kind: EntityKind) -> &mut EntityReport {
        match kind {
            EntityKind::Learner => &mut self.learners,
            EntityKind::Course => &mut self.courses,
            EntityKind::EnrollmentInstance => &mut self.instances,
        }
    }

    pub fn creates_sent(&self) -> usize {
        EntityKind::ALL
            .iter()
            .map(|kind| self.entity(*kind).dispatch.creates_sent)
            .sum()
    }

    pub fn conflicts(&self) -> usize {
        EntityKind::ALL
            .iter()
            .map(|kind| self.entity(*kind).dispatch.conflicts)
            .sum()
    }
}

/// Run one incremental sync.
///
/// `run_started` becomes the new cursor when the run completes. Only a
/// cursor read failure, a staging reset failure or a cursor write failure
/// abort the run; everything else is logged and skipped.
pub async fn run_sync<L, C>(
    lms: &L,
    crm: &C,
    store: &mut Store,
    settings: &SyncSettings,
    run_started: DateTime<Utc>,
) -> anyhow::Result<SyncReport>
where
    L: LmsApi + ?Sized,
    C: CrmApi + ?Sized,
{
    let manager = SyncManager::new(!settings.dry_run);
    let cursor = manager
        .read_checkpoint::<TimeCursor, _>(&*store)
        .context("Failed to read the time cursor")?
        .unwrap_or(TimeCursor::EPOCH);
    let run_started_ms = run_started.timestamp_millis();
    tracing::info!(
        "--- BEGIN sync run (cursor {cursor}, dry run: {}) ---",
        settings.dry_run
    );

    let mut report = SyncReport {
        cursor: Some(cursor),
        ..SyncReport::default()
    };

    let catalog = load_template_catalog(crm, settings).await;
    let mut ctx = RunContext::new(run_started_ms, cursor, catalog);

    store
        .rebuild()
        .context("Failed to clear the staging tables")?;

    let stage_settings = StageSettings {
        template: settings.template_target(),
        session_zone: settings.session_zone,
        dry_run: settings.dry_run,
    };
    tracing::info!("--- BEGIN staging ---");
    let courses = stage_courses(lms, crm, store, &mut ctx, &stage_settings).await;
    let learners = stage_learners(lms, store, &mut ctx).await;
    let instances = stage_instances(lms, store, &ctx).await;
    report.courses.staged = courses.staged;
    report.learners.staged = learners.staged;
    report.instances.staged = instances.staged;
    tracing::info!(
        "--- END staging: {} courses, {} learners, {} instances ---",
        courses.staged,
        learners.staged,
        instances.staged
    );

    for kind in [
        EntityKind::Learner,
        EntityKind::Course,
        EntityKind::EnrollmentInstance,
    ] {
        tracing::info!("--- BEGIN {kind} ---");
        reconcile(crm, store, settings, kind, report.entity_mut(kind)).await;
        let entity = report.entity(kind);
        tracing::info!(
            "--- END {kind}: {} created, {} updated, {} recovered, {} conflicts ---",
            entity.dispatch.identities_recorded,
            entity.dispatch.updated,
            entity.dispatch.duplicates_recovered,
            entity.dispatch.conflicts
        );
    }

    tracing::info!("--- BEGIN associations ---");
    report.learner_associations = run_association(
        crm,
        store,
        settings,
        AssociationLink {
            query: &settings.queries.assoc_learner_instance,
            from_object_type: &settings.learner_object_type,
            to_object_type: &settings.instance_object_type,
            association_type: &settings.learner_instance_association,
        },
    )
    .await;
    report.course_associations = run_association(
        crm,
        store,
        settings,
        AssociationLink {
            query: &settings.queries.assoc_course_instance,
            from_object_type: &settings.course_object_type,
            to_object_type: &settings.instance_object_type,
            association_type: &settings.course_instance_association,
        },
    )
    .await;
    tracing::info!(
        "--- END associations: {} learner links, {} course links ---",
        report.learner_associations.created,
        report.course_associations.created
    );

    let next = TimeCursor::from_millis(run_started_ms);
    manager
        .emit_checkpoint(store, &next)
        .context("Failed to advance the time cursor")?;
    if manager.emits_checkpoints() {
        report.advanced_to = Some(next);
    }

    tracing::info!(
        "--- END sync run: {} creates sent, {} conflicts ---",
        report.creates_sent(),
        report.conflicts()
    );
    Ok(report)
}

/// The remote template options. An unreadable property yields an empty
/// catalog; non-definition courses then stay unresolved this run.
async fn load_template_catalog<C: CrmApi + ?Sized>(
    crm: &C,
    settings: &SyncSettings,
) -> TemplateCatalog {
    match crm
        .read_property(&settings.course_object_type, &settings.template_property)
        .await
    {
        Ok(definition) => {
            let catalog = TemplateCatalog::from_options(&definition.options);
            tracing::debug!("Loaded {} template options", catalog.len());
            catalog
        }
        Err(e) => {
            tracing::error!(
                property = %settings.template_property,
                error = %e,
                "Failed to read template options, continuing with none"
            );
            TemplateCatalog::default()
        }
    }
}

/// Partition, dispatch and reconcile one entity kind.
///
/// Both sets are built before any create is sent, so rows created in this
/// pass are not updated again right away.
async fn reconcile<C: CrmApi + ?Sized>(
    crm: &C,
    store: &Store,
    settings: &SyncSettings,
    kind: EntityKind,
    report: &mut EntityReport,
) {
    let creates = match build_create_batch(store, &settings.queries, kind) {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(kind = %kind, error = %e, "Failed to build create batch");
            Vec::new()
        }
    };
    let updates = match build_update_batch(store, &settings.queries, kind) {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(kind = %kind, error = %e, "Failed to build update batch");
            Vec::new()
        }
    };
    report.creates_planned = creates.len();
    report.updates_planned = updates.len();
    tracing::info!(
        kind = %kind,
        "{} records to create, {} to update",
        creates.len(),
        updates.len()
    );

    let dispatcher = Dispatcher::new(crm, store, kind, settings.object_type(kind))
        .with_batch_size(settings.batch_size)
        .with_dry_run(settings.dry_run);
    report.dispatch += dispatcher.dispatch_creates(creates).await;
    report.dispatch += dispatcher.dispatch_updates(updates).await;
}

async fn run_association<C: CrmApi + ?Sized>(
    crm: &C,
    store: &Store,
    settings: &SyncSettings,
    link: AssociationLink<'_>,
) -> AssociationOutcome {
    match associate(crm, store, &link, settings.batch_size, settings.dry_run).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(
                association_type = link.association_type,
                error = %e,
                "Failed to build associations"
            );
            AssociationOutcome::default()
        }
    }
}
