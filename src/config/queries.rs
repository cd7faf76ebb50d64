//! Parameterized query templates.
//!
//! The payload and association queries are configuration: the defaults in
//! `sql/` are compiled in, and any `<name>.sql` file in a `--query-dir`
//! replaces the default of the same name.

use std::path::Path;

use anyhow::Context;
use sync_core::EntityKind;

/// The full set of query templates one run uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySet {
    pub learners_create: String,
    pub learners_update: String,
    pub courses_create: String,
    pub courses_update: String,
    pub instances_create: String,
    pub instances_update: String,
    pub assoc_learner_instance: String,
    pub assoc_course_instance: String,
}

impl Default for QuerySet {
    fn default() -> Self {
        Self::builtin()
    }
}

impl QuerySet {
    /// Templates shipped with the binary.
    pub fn builtin() -> Self {
        Self {
            learners_create: include_str!("../../sql/learners_create.sql").to_string(),
            learners_update: include_str!("../../sql/learners_update.sql").to_string(),
            courses_create: include_str!("../../sql/courses_create.sql").to_string(),
            courses_update: include_str!("../../sql/courses_update.sql").to_string(),
            instances_create: include_str!("../../sql/instances_create.sql").to_string(),
            instances_update: include_str!("../../sql/instances_update.sql").to_string(),
            assoc_learner_instance: include_str!("../../sql/assoc_learner_instance.sql")
                .to_string(),
            assoc_course_instance: include_str!("../../sql/assoc_course_instance.sql")
                .to_string(),
        }
    }

    /// Built-in templates with overrides read from `dir`.
    pub fn with_overrides(dir: &Path) -> anyhow::Result<Self> {
        let mut set = Self::builtin();
        for (name, slot) in set.slots_mut() {
            let path = dir.join(format!("{name}.sql"));
            if !path.exists() {
                continue;
            }
            *slot = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read query template {}", path.display()))?;
            tracing::info!("Using query template override {}", path.display());
        }
        Ok(set)
    }

    /// Query selecting staged rows of `kind` with no identity yet.
    pub fn create(&self, kind: EntityKind) -> &str {
        match kind {
            EntityKind::Learner => &self.learners_create,
            EntityKind::Course => &self.courses_create,
            EntityKind::EnrollmentInstance => &self.instances_create,
        }
    }

    /// Query selecting staged rows of `kind` with their remote id.
    pub fn update(&self, kind: EntityKind) -> &str {
        match kind {
            EntityKind::Learner => &self.learners_update,
            EntityKind::Course => &self.courses_update,
            EntityKind::EnrollmentInstance => &self.instances_update,
        }
    }

    fn slots_mut(&mut self) -> [(&'static str, &mut String); 8] {
        [
            ("learners_create", &mut self.learners_create),
            ("learners_update", &mut self.learners_update),
            ("courses_create", &mut self.courses_create),
            ("courses_update", &mut self.courses_update),
            ("instances_create", &mut self.instances_create),
            ("instances_update", &mut self.instances_update),
            ("assoc_learner_instance", &mut self.assoc_learner_instance),
            ("assoc_course_instance", &mut self.assoc_course_instance),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_override_replaces_only_named_template() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("courses_create.sql"),
            "SELECT lms_course_id FROM courses",
        )
        .unwrap();

        let set = QuerySet::with_overrides(dir.path()).unwrap();
        let builtin = QuerySet::builtin();

        assert_eq!(set.create(EntityKind::Course), "SELECT lms_course_id FROM courses");
        assert_eq!(set.update(EntityKind::Course), builtin.update(EntityKind::Course));
        assert_eq!(set.learners_create, builtin.learners_create);
    }

    #[test]
    fn test_builtin_queries_select_by_kind() {
        let set = QuerySet::builtin();
        assert!(set.create(EntityKind::Learner).contains("learner_mapping"));
        assert!(set.update(EntityKind::EnrollmentInstance).contains("m.remote_id"));
    }
}
