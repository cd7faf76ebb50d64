//! Staging phase: pull included records from the LMS, transform them and
//! upsert them into the staging tables.
//!
//! Per-record failures (unparseable dates, store errors, missing upstream
//! detail) are logged and the record is skipped; the phase always runs to
//! the end.

use std::collections::BTreeSet;

use anyhow::Context;
use chrono_tz::Tz;
use crm_sink::CrmApi;
use lms_source::{LmsApi, RawCourse, RawUser, UserCourse, UserDetail};
use staging::Store;
use sync_core::{
    localize_session_datetime, opt_unix_millis, Course, EnrollmentInstance, Learner,
    TimeParseError,
};

use crate::context::{CourseSession, RunContext};
use crate::select::{select_course, select_learner, Selection};
use crate::template::{self, TemplateTarget};

/// Settings the staging phase needs.
#[derive(Debug, Clone, Copy)]
pub struct StageSettings<'a> {
    pub template: TemplateTarget<'a>,
    /// Zone the LMS live-session datetimes are written in
    pub session_zone: Tz,
    pub dry_run: bool,
}

/// Counts of one staging step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseCount {
    /// Records returned by the LMS
    pub listed: usize,
    pub staged: usize,
    /// Records that were selected but failed to stage
    pub skipped: usize,
}

/// Stage every included course and collect, per course, its session data,
/// enrolled learners and assignment completers into `ctx`.
pub async fn stage_courses<L, C>(
    lms: &L,
    crm: &C,
    store: &Store,
    ctx: &mut RunContext,
    settings: &StageSettings<'_>,
) -> PhaseCount
where
    L: LmsApi + ?Sized,
    C: CrmApi + ?Sized,
{
    let mut count = PhaseCount::default();
    let courses = match lms.list_courses().await {
        Ok(courses) => courses,
        Err(e) => {
            tracing::error!(error = %e, "Failed to list courses, no courses staged");
            return count;
        }
    };
    count.listed = courses.len();
    tracing::info!("Obtained {} courses from the LMS", courses.len());

    for raw in &courses {
        match select_course(raw, ctx.cursor) {
            Ok(Selection::Include) => {}
            Ok(Selection::Skip) => continue,
            Err(e) => {
                tracing::warn!(course_id = raw.id, error = %e, "Skipping course with unreadable timestamp");
                count.skipped += 1;
                continue;
            }
        }

        match stage_course(lms, crm, store, ctx, settings, raw).await {
            Ok(()) => count.staged += 1,
            Err(e) => {
                let message = format!("{e:#}");
                tracing::error!(course_id = raw.id, error = %message, "Failed to stage course");
                count.skipped += 1;
            }
        }
    }

    count
}

async fn stage_course<L, C>(
    lms: &L,
    crm: &C,
    store: &Store,
    ctx: &mut RunContext,
    settings: &StageSettings<'_>,
    raw: &RawCourse,
) -> anyhow::Result<()>
where
    L: LmsApi + ?Sized,
    C: CrmApi + ?Sized,
{
    let name = raw.name.clone().unwrap_or_default();
    let template = template::resolve(
        crm,
        settings.template,
        &mut ctx.templates,
        raw.code.as_deref(),
        &name,
        settings.dry_run,
    )
    .await;

    let session = match raw.live_session.as_deref().filter(|v| !v.trim().is_empty()) {
        Some(value) => Some(
            localize_session_datetime(value, settings.session_zone)
                .context("live session datetime")?,
        ),
        None => None,
    };

    let course = Course {
        lms_course_id: raw.id,
        course_name: raw.name.clone(),
        code: raw.code.clone(),
        description: raw.description.clone(),
        start_date: opt_unix_millis(raw.start_date.as_deref()).context("start date")?,
        end_date: opt_unix_millis(raw.end_date.as_deref()).context("end date")?,
        live_session_datetime: session.as_ref().map(|s| s.epoch_millis),
        session_time: session.as_ref().map(|s| s.session_time.clone()),
        assignment_due_date: opt_unix_millis(raw.assignment_due.as_deref())
            .context("assignment due date")?,
        cohort_id: raw.cohort_id.clone(),
        course_template_code: template.code,
        course_template_name: template.name,
        trigger_datetime: Some(ctx.run_started_ms),
    };
    store.upsert_course(&course)?;

    let assignment_completers = collect_course_detail(lms, ctx, raw.id).await;
    ctx.course_sessions.insert(
        raw.id,
        CourseSession {
            code: course.code,
            live_session_ms: course.live_session_datetime,
            session_time: course.session_time,
            assignment_completers,
        },
    );
    Ok(())
}

/// Fetch a course's units and enrollments. Enrolled learners go into the
/// context; learners who answered an assignment unit are returned.
async fn collect_course_detail<L: LmsApi + ?Sized>(
    lms: &L,
    ctx: &mut RunContext,
    course_id: i64,
) -> BTreeSet<i64> {
    let mut completers = BTreeSet::new();
    let detail = match lms.get_course(course_id).await {
        Ok(Some(detail)) => detail,
        Ok(None) => {
            tracing::debug!(course_id, "No course detail in the LMS");
            return completers;
        }
        Err(e) => {
            tracing::warn!(course_id, error = %e, "Failed to fetch course detail");
            return completers;
        }
    };

    for unit in detail.assignment_units() {
        match lms.assignment_answers(unit.id).await {
            Ok(events) => completers.extend(events.iter().map(|e| e.user_id)),
            Err(e) => {
                tracing::warn!(course_id, unit_id = unit.id, error = %e, "Failed to fetch assignment timeline");
            }
        }
    }
    ctx.student_ids.extend(detail.users.iter().map(|u| u.id));
    completers
}

/// Stage every learner modified since the cursor.
pub async fn stage_learners<L: LmsApi + ?Sized>(
    lms: &L,
    store: &Store,
    ctx: &mut RunContext,
) -> PhaseCount {
    let mut count = PhaseCount::default();
    let users = match lms.list_users().await {
        Ok(users) => users,
        Err(e) => {
            tracing::error!(error = %e, "Failed to list users, no learners staged");
            return count;
        }
    };
    count.listed = users.len();
    tracing::info!("Obtained {} users from the LMS", users.len());

    for raw in &users {
        match select_learner(raw, ctx.cursor) {
            Ok(Selection::Include) => {}
            Ok(Selection::Skip) => continue,
            Err(e) => {
                tracing::warn!(user_id = raw.id, error = %e, "Skipping user with unreadable timestamp");
                count.skipped += 1;
                continue;
            }
        }

        match learner_row(raw) {
            Ok(learner) => match store.upsert_learner(&learner) {
                Ok(()) => {
                    ctx.student_ids.insert(raw.id);
                    count.staged += 1;
                }
                Err(e) => {
                    tracing::error!(user_id = raw.id, error = %e, "Failed to stage learner");
                    count.skipped += 1;
                }
            },
            Err(e) => {
                tracing::warn!(user_id = raw.id, error = %e, "Skipping learner");
                count.skipped += 1;
            }
        }
    }

    count
}

fn learner_row(raw: &RawUser) -> Result<Learner, TimeParseError> {
    Ok(Learner {
        lms_user_id: raw.id,
        first_name: raw.first_name.clone(),
        last_name: raw.last_name.clone(),
        login: raw.login.clone(),
        email: raw.email.clone(),
        status: raw.status.clone(),
        last_updated: opt_unix_millis(raw.last_updated_timestamp.as_deref())?,
    })
}

/// Stage the enrollments of every collected learner in every included
/// course. One LMS call per learner; nothing is fetched when no course was
/// included.
pub async fn stage_instances<L: LmsApi + ?Sized>(
    lms: &L,
    store: &Store,
    ctx: &RunContext,
) -> PhaseCount {
    let mut count = PhaseCount::default();
    if ctx.course_sessions.is_empty() {
        tracing::info!("No courses included this run, no instances to stage");
        return count;
    }

    for &learner_id in &ctx.student_ids {
        let detail = match lms.get_user(learner_id).await {
            Ok(Some(detail)) => detail,
            Ok(None) => {
                tracing::debug!(user_id = learner_id, "No user detail in the LMS");
                continue;
            }
            Err(e) => {
                tracing::warn!(user_id = learner_id, error = %e, "Failed to fetch user detail");
                count.skipped += 1;
                continue;
            }
        };

        for enrollment in &detail.courses {
            let Some(session) = ctx.course_sessions.get(&enrollment.id) else {
                continue;
            };
            count.listed += 1;

            let complete = ctx.is_assignment_complete(enrollment.id, learner_id);
            let staged = instance_row(learner_id, &detail, enrollment, session, complete)
                .map_err(anyhow::Error::from)
                .and_then(|instance| store.upsert_instance(&instance).map_err(Into::into));
            match staged {
                Ok(()) => count.staged += 1,
                Err(e) => {
                    tracing::warn!(
                        user_id = learner_id,
                        course_id = enrollment.id,
                        error = %e,
                        "Skipping enrollment instance"
                    );
                    count.skipped += 1;
                }
            }
        }
    }

    count
}

fn instance_row(
    learner_id: i64,
    user: &UserDetail,
    enrollment: &UserCourse,
    session: &CourseSession,
    assignment_complete: bool,
) -> Result<EnrollmentInstance, TimeParseError> {
    let first_name = user.first_name.as_deref().unwrap_or_default();
    let last_name = user.last_name.as_deref().unwrap_or_default();
    let course_name = enrollment.name.as_deref().unwrap_or_default();
    let decoded = html_escape::decode_html_entities(course_name);

    Ok(EnrollmentInstance {
        lms_user_id: learner_id,
        lms_course_id: enrollment.id,
        instance_name: EnrollmentInstance::display_name(first_name, last_name, &decoded),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        email: user.email.clone(),
        course_name: enrollment.name.clone(),
        code: session.code.clone(),
        company_cohort_id: user.cohort_id.clone(),
        completed_on: opt_unix_millis(enrollment.completed_on_timestamp.as_deref())?,
        completion_status: enrollment.completion_status.clone(),
        completion_percent: enrollment.completion_percentage,
        live_session_datetime: session.live_session_ms,
        session_time: session.session_time.clone(),
        role: enrollment.role.clone(),
        status: user.status.clone(),
        total_time: enrollment.total_time.clone(),
        total_time_seconds: enrollment.total_time_seconds,
        last_accessed_unit_url: enrollment.last_accessed_unit_url.clone(),
        assignment_complete,
    })
}
