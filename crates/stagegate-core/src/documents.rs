//! # Document Requirement Evaluator
//!
//! Computes per-stage document satisfaction from a static requirement table
//! and the documents attached to a project.
//!
//! For each requirement of the target stage the attached documents of that
//! category are counted:
//!
//! | count                 | required | outcome   |
//! |-----------------------|----------|-----------|
//! | `>= min_count`        | any      | satisfied |
//! | `0`                   | yes      | missing   |
//! | `0`                   | no       | unmet optional (advisory) |
//! | `0 < n < min_count`   | any      | invalid ("insufficient count") |
//!
//! A requirement is never both missing and invalid.

use crate::sources::WorkflowSources;
use crate::{ProjectId, StageGateError, StageId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// REQUIREMENTS
// =============================================================================

fn default_min_count() -> u32 {
    1
}

fn default_required() -> bool {
    true
}

/// One document requirement of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRequirement {
    /// Category key attached documents are matched on.
    pub category: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default = "default_min_count")]
    pub min_count: u32,
    /// Display name; falls back to the category key.
    #[serde(default)]
    pub label: Option<String>,
}

impl DocumentRequirement {
    #[must_use]
    pub fn required(category: impl Into<String>, min_count: u32) -> Self {
        Self {
            category: category.into(),
            required: true,
            min_count,
            label: None,
        }
    }

    #[must_use]
    pub fn optional(category: impl Into<String>, min_count: u32) -> Self {
        Self {
            required: false,
            ..Self::required(category, min_count)
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.category)
    }
}

/// Static per-stage requirement table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequirementTable {
    by_stage: BTreeMap<StageId, Vec<DocumentRequirement>>,
}

impl RequirementTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, stage: StageId, requirements: Vec<DocumentRequirement>) {
        self.by_stage.insert(stage, requirements);
    }

    /// Requirements for entering a stage. Stages without an entry need nothing.
    #[must_use]
    pub fn for_stage(&self, stage: StageId) -> &[DocumentRequirement] {
        self.by_stage.get(&stage).map(Vec::as_slice).unwrap_or(&[])
    }
}

// =============================================================================
// VALIDATION RESULT
// =============================================================================

/// Outcome of one requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementStatus {
    Satisfied,
    Missing,
    Invalid,
}

/// One requirement together with what was found for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementOutcome {
    pub requirement: DocumentRequirement,
    pub found: u32,
    pub status: RequirementStatus,
}

/// A requirement with some, but too few, matching documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidRequirement {
    pub requirement: DocumentRequirement,
    pub reason: String,
}

/// Counts over one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub total_required: usize,
    pub satisfied: usize,
    pub missing: usize,
    pub invalid: usize,
}

/// Document satisfaction of one project against one target stage.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentValidationResult {
    pub summary: DocumentSummary,
    /// Required requirements with no matching document.
    pub missing: Vec<DocumentRequirement>,
    /// Requirements with fewer documents than `min_count`.
    pub invalid: Vec<InvalidRequirement>,
    /// Optional requirements with no matching document.
    pub optional_missing: Vec<DocumentRequirement>,
    /// Every requirement in table order.
    pub outcomes: Vec<RequirementOutcome>,
}

/// Answer of `can_advance_to_stage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceReport {
    pub can_advance: bool,
    /// Required-requirement failures.
    pub blockers: Vec<String>,
    /// Optional-requirement failures.
    pub warnings: Vec<String>,
    pub validation: DocumentValidationResult,
}

// =============================================================================
// EVALUATOR
// =============================================================================

/// Evaluates a [`RequirementTable`] against attached documents.
#[derive(Debug, Clone, Copy)]
pub struct DocumentEvaluator<'a> {
    table: &'a RequirementTable,
}

impl<'a> DocumentEvaluator<'a> {
    #[must_use]
    pub fn new(table: &'a RequirementTable) -> Self {
        Self { table }
    }

    /// Evaluate every requirement of `target` for `project`.
    pub fn evaluate(
        &self,
        sources: &dyn WorkflowSources,
        project: ProjectId,
        target: StageId,
    ) -> Result<DocumentValidationResult, StageGateError> {
        let mut result = DocumentValidationResult::default();

        for requirement in self.table.for_stage(target) {
            let found = sources.documents(project, &requirement.category)?.len() as u32;
            let status = classify(requirement, found);

            match status {
                RequirementStatus::Satisfied => result.summary.satisfied += 1,
                RequirementStatus::Missing if requirement.required => {
                    result.missing.push(requirement.clone());
                }
                RequirementStatus::Missing => result.optional_missing.push(requirement.clone()),
                RequirementStatus::Invalid => result.invalid.push(InvalidRequirement {
                    requirement: requirement.clone(),
                    reason: format!(
                        "insufficient count: {} of {} provided",
                        found, requirement.min_count
                    ),
                }),
            }
            if requirement.required {
                result.summary.total_required += 1;
            }
            result.outcomes.push(RequirementOutcome {
                requirement: requirement.clone(),
                found,
                status,
            });
        }

        result.summary.missing = result.missing.len();
        result.summary.invalid = result.invalid.len();
        Ok(result)
    }

    /// Whether the documents alone allow entering `target`.
    ///
    /// `can_advance` is false only for missing or invalid *required*
    /// requirements; optional failures become warnings.
    pub fn can_advance_to_stage(
        &self,
        sources: &dyn WorkflowSources,
        project: ProjectId,
        target: StageId,
    ) -> Result<AdvanceReport, StageGateError> {
        let validation = self.evaluate(sources, project, target)?;

        let mut blockers = Vec::new();
        let mut warnings = Vec::new();

        for requirement in &validation.missing {
            blockers.push(missing_message(requirement));
        }
        for invalid in &validation.invalid {
            let message = invalid_message(invalid);
            if invalid.requirement.required {
                blockers.push(message);
            } else {
                warnings.push(message);
            }
        }
        for requirement in &validation.optional_missing {
            warnings.push(format!(
                "Optional document not provided: {}",
                requirement.display_name()
            ));
        }

        Ok(AdvanceReport {
            can_advance: blockers.is_empty(),
            blockers,
            warnings,
            validation,
        })
    }
}

fn classify(requirement: &DocumentRequirement, found: u32) -> RequirementStatus {
    if found >= requirement.min_count.max(1) {
        RequirementStatus::Satisfied
    } else if found == 0 {
        RequirementStatus::Missing
    } else {
        RequirementStatus::Invalid
    }
}

pub(crate) fn missing_message(requirement: &DocumentRequirement) -> String {
    format!(
        "Missing required document: {} ({} needed)",
        requirement.display_name(),
        requirement.min_count
    )
}

pub(crate) fn invalid_message(invalid: &InvalidRequirement) -> String {
    format!(
        "{}: {}",
        invalid.requirement.display_name(),
        invalid.reason
    )
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sources::{NewDocument, ProjectStore};
    use crate::storage::MemoryStore;
    use crate::{Project, StageGateError};
    use chrono::{TimeZone, Utc};

    const TARGET: StageId = StageId(2);

    fn attach(store: &mut MemoryStore, category: &str) {
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
        store
            .attach_document(
                NewDocument {
                    project_id: ProjectId(1),
                    category: category.to_string(),
                    file_name: format!("{}.pdf", category),
                },
                now,
            )
            .unwrap();
    }

    fn store() -> MemoryStore {
        let mut store = MemoryStore::new();
        store
            .save_project(&Project::new(ProjectId(1), "Gearbox housing"))
            .unwrap();
        store
    }

    fn table(requirements: Vec<DocumentRequirement>) -> RequirementTable {
        let mut table = RequirementTable::new();
        table.insert(TARGET, requirements);
        table
    }

    #[test]
    fn zero_documents_is_missing() {
        let table = table(vec![DocumentRequirement::required("rfq", 1)]);
        let store = store();
        let result = DocumentEvaluator::new(&table)
            .evaluate(&store, ProjectId(1), TARGET)
            .unwrap();

        assert_eq!(result.missing.len(), 1);
        assert_eq!(result.missing[0].category, "rfq");
        assert!(result.invalid.is_empty());
        assert_eq!(result.summary.total_required, 1);
        assert_eq!(result.summary.satisfied, 0);
    }

    #[test]
    fn one_document_satisfies_single_requirement() {
        let table = table(vec![DocumentRequirement::required("rfq", 1)]);
        let mut store = store();
        attach(&mut store, "rfq");

        let result = DocumentEvaluator::new(&table)
            .evaluate(&store, ProjectId(1), TARGET)
            .unwrap();
        assert!(result.missing.is_empty());
        assert!(result.invalid.is_empty());
        assert_eq!(result.summary.satisfied, 1);
        assert_eq!(result.outcomes[0].status, RequirementStatus::Satisfied);
    }

    #[test]
    fn one_of_two_copies_is_invalid_not_missing() {
        let table = table(vec![DocumentRequirement::required("drawing", 2)]);
        let mut store = store();
        attach(&mut store, "drawing");

        let result = DocumentEvaluator::new(&table)
            .evaluate(&store, ProjectId(1), TARGET)
            .unwrap();
        assert!(result.missing.is_empty());
        assert_eq!(result.invalid.len(), 1);
        assert!(result.invalid[0].reason.contains("insufficient count"));
        assert_eq!(result.outcomes[0].found, 1);
    }

    #[test]
    fn other_categories_do_not_count() {
        let table = table(vec![DocumentRequirement::required("bom", 1)]);
        let mut store = store();
        attach(&mut store, "rfq");

        let result = DocumentEvaluator::new(&table)
            .evaluate(&store, ProjectId(1), TARGET)
            .unwrap();
        assert_eq!(result.summary.missing, 1);
    }

    #[test]
    fn optional_missing_is_a_warning() {
        let table = table(vec![
            DocumentRequirement::required("rfq", 1),
            DocumentRequirement::optional("photos", 1).with_label("Site photos"),
        ]);
        let mut store = store();
        attach(&mut store, "rfq");

        let report = DocumentEvaluator::new(&table)
            .can_advance_to_stage(&store, ProjectId(1), TARGET)
            .unwrap();
        assert!(report.can_advance);
        assert!(report.blockers.is_empty());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("Site photos"));
        assert!(report.validation.missing.is_empty());
        assert_eq!(report.validation.optional_missing.len(), 1);
    }

    #[test]
    fn required_failures_block() {
        let table = table(vec![
            DocumentRequirement::required("rfq", 1),
            DocumentRequirement::required("drawing", 2),
        ]);
        let mut store = store();
        attach(&mut store, "drawing");

        let report = DocumentEvaluator::new(&table)
            .can_advance_to_stage(&store, ProjectId(1), TARGET)
            .unwrap();
        assert!(!report.can_advance);
        assert_eq!(report.blockers.len(), 2);
    }

    #[test]
    fn stage_without_requirements_can_advance() {
        let table = RequirementTable::new();
        let store = store();
        let report = DocumentEvaluator::new(&table)
            .can_advance_to_stage(&store, ProjectId(1), TARGET)
            .unwrap();
        assert!(report.can_advance);
        assert!(report.blockers.is_empty());
        assert_eq!(report.validation.summary, DocumentSummary::default());
    }

    struct Unavailable;

    impl WorkflowSources for Unavailable {
        fn documents(
            &self,
            _: ProjectId,
            _: &str,
        ) -> Result<Vec<crate::Document>, StageGateError> {
            Err(StageGateError::Io("document store offline".into()))
        }
        fn approvals(
            &self,
            _: ProjectId,
            _: StageId,
        ) -> Result<Vec<crate::ApprovalRequest>, StageGateError> {
            Ok(Vec::new())
        }
        fn reviews(&self, _: ProjectId) -> Result<Vec<crate::DepartmentReview>, StageGateError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn source_failure_propagates_to_caller() {
        let table = table(vec![DocumentRequirement::required("rfq", 1)]);
        let result = DocumentEvaluator::new(&table).evaluate(&Unavailable, ProjectId(1), TARGET);
        assert!(matches!(result, Err(StageGateError::Io(_))));
    }
}
