//! Stage-specific rules and per-stage field requirements.
//!
//! The rule set is closed: every rule is a [`StageRule`] variant, and the
//! [`RuleBook`] maps each stage slug to its rules. A book is validated
//! against the registry when the workflow is built, so a stage without an
//! entry is a configuration error rather than a silent "no checks". An
//! explicit empty list is how a stage opts out of custom rules.

use super::checks::{CheckCategory, PrerequisiteCheck};
use crate::registry::StageRegistry;
use crate::sources::WorkflowSources;
use crate::{Project, ProjectField, StageGateError, StageId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

fn yes() -> bool {
    true
}

// =============================================================================
// STAGE RULES
// =============================================================================

/// A custom rule evaluated when entering a particular stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageRule {
    /// Every listed department has completed a review of the project.
    DepartmentReviews {
        departments: Vec<String>,
        #[serde(default = "yes")]
        required: bool,
    },
    /// A project attribute is set to a non-blank value.
    AttributePresent {
        key: String,
        #[serde(default)]
        label: Option<String>,
        #[serde(default = "yes")]
        required: bool,
    },
    /// The estimated value meets a floor, in cents.
    ValueAtLeast {
        min_cents: i64,
        #[serde(default = "yes")]
        required: bool,
    },
}

impl StageRule {
    #[must_use]
    pub fn required(&self) -> bool {
        match self {
            StageRule::DepartmentReviews { required, .. }
            | StageRule::AttributePresent { required, .. }
            | StageRule::ValueAtLeast { required, .. } => *required,
        }
    }

    /// Reject rules that could never be evaluated meaningfully.
    pub fn validate(&self) -> Result<(), StageGateError> {
        match self {
            StageRule::DepartmentReviews { departments, .. } => {
                if departments.is_empty() || departments.iter().any(|d| d.trim().is_empty()) {
                    return Err(StageGateError::Config(
                        "department_reviews needs at least one non-blank department".to_string(),
                    ));
                }
            }
            StageRule::AttributePresent { key, .. } => {
                if key.trim().is_empty() {
                    return Err(StageGateError::Config(
                        "attribute_present needs a key".to_string(),
                    ));
                }
            }
            StageRule::ValueAtLeast { min_cents, .. } => {
                if *min_cents < 0 {
                    return Err(StageGateError::Config(
                        "value_at_least needs a non-negative floor".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Evaluate against one project.
    pub fn evaluate(
        &self,
        index: usize,
        stage_slug: &str,
        project: &Project,
        sources: &dyn WorkflowSources,
    ) -> Result<PrerequisiteCheck, StageGateError> {
        let id = format!("stage_specific:{}:{}", stage_slug, index);
        let required = self.required();

        match self {
            StageRule::DepartmentReviews { departments, .. } => {
                let reviewed: BTreeSet<String> = sources
                    .reviews(project.id)?
                    .into_iter()
                    .map(|r| r.department.trim().to_lowercase())
                    .collect();
                let outstanding: Vec<&str> = departments
                    .iter()
                    .filter(|d| !reviewed.contains(&d.trim().to_lowercase()))
                    .map(String::as_str)
                    .collect();

                let name = "Department reviews";
                if outstanding.is_empty() {
                    Ok(PrerequisiteCheck::passed(
                        id,
                        CheckCategory::StageSpecific,
                        name,
                        format!("All {} department reviews present", departments.len()),
                        required,
                    ))
                } else {
                    Ok(PrerequisiteCheck::failed(
                        id,
                        CheckCategory::StageSpecific,
                        name,
                        format!(
                            "Department reviews outstanding: {}",
                            outstanding.join(", ")
                        ),
                        required,
                    )
                    .with_details(format!(
                        "{} of {} reviews present",
                        departments.len() - outstanding.len(),
                        departments.len()
                    )))
                }
            }
            StageRule::AttributePresent { key, label, .. } => {
                let name = label.clone().unwrap_or_else(|| key.clone());
                if let Some(value) = project.attribute(key) {
                    Ok(PrerequisiteCheck::passed(
                        id,
                        CheckCategory::StageSpecific,
                        name.clone(),
                        format!("{} recorded", name),
                        required,
                    )
                    .with_details(value.to_string()))
                } else {
                    Ok(PrerequisiteCheck::failed(
                        id,
                        CheckCategory::StageSpecific,
                        name.clone(),
                        format!("{} must be recorded", name),
                        required,
                    ))
                }
            }
            StageRule::ValueAtLeast { min_cents, .. } => {
                let name = "Minimum estimated value";
                match project.estimated_value_cents {
                    Some(value) if value >= *min_cents => Ok(PrerequisiteCheck::passed(
                        id,
                        CheckCategory::StageSpecific,
                        name,
                        format!("Estimated value meets {}", format_cents(*min_cents)),
                        required,
                    )),
                    other => Ok(PrerequisiteCheck::failed(
                        id,
                        CheckCategory::StageSpecific,
                        name,
                        format!(
                            "Estimated value must be at least {}",
                            format_cents(*min_cents)
                        ),
                        required,
                    )
                    .with_details(match other {
                        Some(value) => format!("currently {}", format_cents(value)),
                        None => "no estimate recorded".to_string(),
                    })),
                }
            }
        }
    }
}

/// Render cents as `1234.56` without floating point.
#[must_use]
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

// =============================================================================
// RULE BOOK
// =============================================================================

/// Closed map from stage slug to its rule set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleBook {
    by_slug: BTreeMap<String, Vec<StageRule>>,
}

impl RuleBook {
    #[must_use]
    pub fn new(by_slug: BTreeMap<String, Vec<StageRule>>) -> Self {
        Self { by_slug }
    }

    /// Every stage has an entry, every entry names a stage, every rule is well-formed.
    pub fn validate_against(&self, registry: &StageRegistry) -> Result<(), StageGateError> {
        for slug in registry.slugs() {
            if !self.by_slug.contains_key(slug) {
                return Err(StageGateError::Config(format!(
                    "stage '{}' has no rule set; use an empty list for no custom rules",
                    slug
                )));
            }
        }
        for (slug, rules) in &self.by_slug {
            if registry.by_slug(slug).is_none() {
                return Err(StageGateError::Config(format!(
                    "rule set configured for unknown stage '{}'",
                    slug
                )));
            }
            for rule in rules {
                rule.validate().map_err(|e| {
                    StageGateError::Config(format!("stage '{}': {}", slug, e))
                })?;
            }
        }
        Ok(())
    }

    /// Rules for a stage; `None` means the stage was never configured.
    #[must_use]
    pub fn for_stage(&self, slug: &str) -> Option<&[StageRule]> {
        self.by_slug.get(slug).map(Vec::as_slice)
    }
}

// =============================================================================
// FIELD REQUIREMENTS
// =============================================================================

/// Which project fields each target stage needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldTable {
    by_stage: BTreeMap<StageId, Vec<ProjectField>>,
}

impl FieldTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, stage: StageId, fields: Vec<ProjectField>) {
        self.by_stage.insert(stage, fields);
    }

    #[must_use]
    pub fn for_stage(&self, stage: StageId) -> &[ProjectField] {
        self.by_stage.get(&stage).map(Vec::as_slice).unwrap_or(&[])
    }
}
