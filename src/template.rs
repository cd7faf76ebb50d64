//! Course template code resolution.
//!
//! A course code such as `101DB-T` is read as: leading digits (ignored),
//! template code (`DB`), and a suffix after the last dash. Suffix `T` marks
//! the course that defines a template; any other suffix marks an instance
//! of one. The CRM keeps the known templates as options of an enumerated
//! property (value = code, label = display name), and the CRM wins when its
//! naming disagrees with the LMS.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use crm_sink::{CrmApi, PropertyOption};
use regex::Regex;

/// Known template options, code to label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateCatalog {
    options: BTreeMap<String, String>,
}

impl TemplateCatalog {
    pub fn from_options(options: &[PropertyOption]) -> Self {
        Self {
            options: options
                .iter()
                .map(|o| (o.value.clone(), o.label.clone()))
                .collect(),
        }
    }

    pub fn contains_code(&self, code: &str) -> bool {
        self.options.contains_key(code)
    }

    /// Code of the option carrying `label`, if any.
    pub fn code_for_label(&self, label: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(_, l)| l.as_str() == label)
            .map(|(code, _)| code.as_str())
    }

    pub fn insert(&mut self, code: impl Into<String>, label: impl Into<String>) {
        self.options.insert(code.into(), label.into());
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

/// A course code split into template code and definition marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCode {
    pub template_code: String,
    pub is_definition: bool,
}

pub fn parse_course_code(code: &str) -> Option<ParsedCode> {
    let trimmed = code.trim_start_matches(|c: char| c.is_ascii_digit());
    let (template_code, suffix) = trimmed.rsplit_once('-')?;
    if template_code.is_empty() {
        return None;
    }
    Some(ParsedCode {
        template_code: template_code.to_string(),
        is_definition: suffix == "T",
    })
}

static TEMPLATE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i) \(TEMPLATE\)").expect("TEMPLATE_MARKER is a valid regex pattern")
});

/// Template label from a definition course's name: the name with
/// ` (TEMPLATE)` removed, in any case.
pub fn template_label(course_name: &str) -> String {
    TEMPLATE_MARKER.replace_all(course_name, "").into_owned()
}

/// What to do with a course's template code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplatePlan {
    /// Use this existing option
    Resolved { code: String },
    /// Add a new option, then use it
    Create { code: String, label: String },
    /// No matching option; keep the parsed code, leave the option unset
    Unresolved { code: String },
}

/// Decide against the catalog without touching the CRM.
pub fn plan(catalog: &TemplateCatalog, parsed: &ParsedCode, course_name: &str) -> TemplatePlan {
    let code = &parsed.template_code;
    if catalog.contains_code(code) {
        return TemplatePlan::Resolved { code: code.clone() };
    }
    if !parsed.is_definition {
        return TemplatePlan::Unresolved { code: code.clone() };
    }

    let label = template_label(course_name);
    match catalog.code_for_label(&label) {
        // Same name already on the CRM under another code: the CRM's code wins.
        Some(remote_code) => TemplatePlan::Resolved {
            code: remote_code.to_string(),
        },
        None => TemplatePlan::Create {
            code: code.clone(),
            label,
        },
    }
}

/// Template fields stored on a staged course.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateFields {
    pub code: Option<String>,
    /// The option value, only set when it exists on the CRM
    pub name: Option<String>,
}

/// Where the enumerated template property lives on the CRM.
#[derive(Debug, Clone, Copy)]
pub struct TemplateTarget<'a> {
    pub property: &'a str,
    /// Object types that carry the property (courses and instances)
    pub object_types: [&'a str; 2],
}

/// Resolve a course's template fields, adding a new option to the CRM and
/// the catalog when the course defines an unknown template.
///
/// If adding the option fails the course keeps its code but no option, and
/// the catalog is left unchanged so a later course may try again.
pub async fn resolve<A: CrmApi + ?Sized>(
    api: &A,
    target: TemplateTarget<'_>,
    catalog: &mut TemplateCatalog,
    course_code: Option<&str>,
    course_name: &str,
    dry_run: bool,
) -> TemplateFields {
    let Some(parsed) = course_code.and_then(parse_course_code) else {
        return TemplateFields::default();
    };

    match plan(catalog, &parsed, course_name) {
        TemplatePlan::Resolved { code } => TemplateFields {
            code: Some(code.clone()),
            name: Some(code),
        },
        TemplatePlan::Unresolved { code } => TemplateFields {
            code: Some(code),
            name: None,
        },
        TemplatePlan::Create { code, label } => {
            if dry_run {
                tracing::info!(code = %code, label = %label, "Dry run: would add template option");
            } else {
                for object_type in target.object_types {
                    let option = PropertyOption::new(code.clone(), label.clone());
                    if let Err(e) = api
                        .add_property_option(object_type, target.property, option)
                        .await
                    {
                        tracing::error!(
                            object_type = object_type,
                            code = %code,
                            error = %e,
                            "Failed to add template option"
                        );
                        return TemplateFields {
                            code: Some(code),
                            name: None,
                        };
                    }
                }
                tracing::info!(code = %code, label = %label, "Added template option");
            }
            catalog.insert(code.clone(), label);
            TemplateFields {
                code: Some(code.clone()),
                name: Some(code),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(entries: &[(&str, &str)]) -> TemplateCatalog {
        let options: Vec<PropertyOption> = entries
            .iter()
            .map(|(code, label)| PropertyOption::new(*code, *label))
            .collect();
        TemplateCatalog::from_options(&options)
    }

    fn parsed(code: &str) -> ParsedCode {
        parse_course_code(code).unwrap()
    }

    #[test]
    fn test_parse_course_code() {
        assert_eq!(
            parse_course_code("101DB-T"),
            Some(ParsedCode {
                template_code: "DB".to_string(),
                is_definition: true
            })
        );
        assert_eq!(
            parse_course_code("7ML-OPS-2024"),
            Some(ParsedCode {
                template_code: "ML-OPS".to_string(),
                is_definition: false
            })
        );
        assert_eq!(parse_course_code("DB"), None);
        assert_eq!(parse_course_code("123-T"), None);
    }

    #[test]
    fn test_template_label_strips_marker_any_case() {
        assert_eq!(template_label("Data Basics (TEMPLATE)"), "Data Basics");
        assert_eq!(template_label("Data Basics (Template)"), "Data Basics");
        assert_eq!(template_label("Data Basics"), "Data Basics");
    }

    #[test]
    fn test_plan_definition_unknown_everywhere_creates() {
        let plan = plan(&catalog(&[]), &parsed("1DB-T"), "Data Basics (Template)");
        assert_eq!(
            plan,
            TemplatePlan::Create {
                code: "DB".to_string(),
                label: "Data Basics".to_string()
            }
        );
    }

    #[test]
    fn test_plan_definition_label_known_under_other_code() {
        let plan = plan(
            &catalog(&[("DBX", "Data Basics")]),
            &parsed("1DB-T"),
            "Data Basics (TEMPLATE)",
        );
        assert_eq!(
            plan,
            TemplatePlan::Resolved {
                code: "DBX".to_string()
            }
        );
    }

    #[test]
    fn test_plan_known_code_resolves() {
        let cat = catalog(&[("DB", "Data Basics")]);
        assert_eq!(
            plan(&cat, &parsed("1DB-T"), "Renamed (Template)"),
            TemplatePlan::Resolved {
                code: "DB".to_string()
            }
        );
        assert_eq!(
            plan(&cat, &parsed("1DB-0324"), "Data Basics March"),
            TemplatePlan::Resolved {
                code: "DB".to_string()
            }
        );
    }

    #[test]
    fn test_plan_instance_unknown_code_is_unresolved() {
        assert_eq!(
            plan(&catalog(&[]), &parsed("1DB-0324"), "Data Basics March"),
            TemplatePlan::Unresolved {
                code: "DB".to_string()
            }
        );
    }

    #[test]
    fn test_resolve_creates_once_and_caches() {
        use crate::testing::InMemoryCrm;

        let crm = InMemoryCrm::new();
        let target = TemplateTarget {
            property: "course_template_name",
            object_types: ["courses", "instances"],
        };
        let mut cat = TemplateCatalog::default();

        let fields = tokio_test::block_on(resolve(
            &crm,
            target,
            &mut cat,
            Some("1DB-T"),
            "Data Basics (Template)",
            false,
        ));
        let follower = tokio_test::block_on(resolve(
            &crm,
            target,
            &mut cat,
            Some("2DB-0324"),
            "Data Basics March",
            false,
        ));

        assert_eq!(fields.name.as_deref(), Some("DB"));
        assert_eq!(follower.name.as_deref(), Some("DB"));
        assert_eq!(crm.option_additions(), 2);
        assert_eq!(crm.options("courses", "course_template_name").len(), 1);
        assert_eq!(crm.options("instances", "course_template_name").len(), 1);
        assert_eq!(cat.len(), 1);
    }
}
