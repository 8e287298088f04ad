//! Check and result types of the prerequisite checker.

use serde::{Deserialize, Serialize};

/// The five fixed categories every run evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckCategory {
    ProjectData,
    Documents,
    Approvals,
    StageSpecific,
    System,
}

impl CheckCategory {
    /// Evaluation order of the categories.
    pub const ALL: [CheckCategory; 5] = [
        CheckCategory::ProjectData,
        CheckCategory::Documents,
        CheckCategory::Approvals,
        CheckCategory::StageSpecific,
        CheckCategory::System,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckCategory::ProjectData => "project_data",
            CheckCategory::Documents => "documents",
            CheckCategory::Approvals => "approvals",
            CheckCategory::StageSpecific => "stage_specific",
            CheckCategory::System => "system",
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            CheckCategory::ProjectData => "Project data",
            CheckCategory::Documents => "Documents",
            CheckCategory::Approvals => "Approvals",
            CheckCategory::StageSpecific => "Stage-specific",
            CheckCategory::System => "System",
        }
    }
}

impl std::fmt::Display for CheckCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Failed,
    Pending,
}

/// One atomic pass/fail/pending evaluation.
///
/// `description` is the human-readable sentence shown to the user; for a
/// failed check it states what has to be fixed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrerequisiteCheck {
    pub id: String,
    pub category: CheckCategory,
    pub name: String,
    pub description: String,
    pub required: bool,
    pub status: CheckStatus,
    pub details: Option<String>,
}

impl PrerequisiteCheck {
    /// A passed check.
    #[must_use]
    pub fn passed(
        id: impl Into<String>,
        category: CheckCategory,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        Self {
            id: id.into(),
            category,
            name: name.into(),
            description: description.into(),
            required,
            status: CheckStatus::Passed,
            details: None,
        }
    }

    /// A failed check.
    #[must_use]
    pub fn failed(
        id: impl Into<String>,
        category: CheckCategory,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        Self {
            status: CheckStatus::Failed,
            ..Self::passed(id, category, name, description, required)
        }
    }

    /// A check still waiting on someone else.
    #[must_use]
    pub fn pending(
        id: impl Into<String>,
        category: CheckCategory,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        Self {
            status: CheckStatus::Pending,
            ..Self::passed(id, category, name, description, required)
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    #[must_use]
    pub fn is_passed(&self) -> bool {
        self.status == CheckStatus::Passed
    }
}

/// Ordered outcome of one checker run. Transient; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PrerequisiteResult {
    pub checks: Vec<PrerequisiteCheck>,
    /// Every required check has status `passed` (vacuously true when there are none).
    pub required_passed: bool,
    /// Descriptions of failed required checks.
    pub errors: Vec<String>,
    /// Descriptions of failed optional checks and of required-but-pending checks.
    pub warnings: Vec<String>,
}

impl PrerequisiteResult {
    /// Aggregate an ordered list of checks.
    #[must_use]
    pub fn from_checks(checks: Vec<PrerequisiteCheck>) -> Self {
        let required_passed = checks.iter().filter(|c| c.required).all(|c| c.is_passed());

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for check in &checks {
            match (check.status, check.required) {
                (CheckStatus::Failed, true) => errors.push(check.description.clone()),
                (CheckStatus::Failed, false) | (CheckStatus::Pending, true) => {
                    warnings.push(check.description.clone());
                }
                (CheckStatus::Passed, _) | (CheckStatus::Pending, false) => {}
            }
        }

        Self {
            checks,
            required_passed,
            errors,
            warnings,
        }
    }

    /// Checks of one category, in evaluation order.
    pub fn in_category(&self, category: CheckCategory) -> impl Iterator<Item = &PrerequisiteCheck> {
        self.checks.iter().filter(move |c| c.category == category)
    }

    #[must_use]
    pub fn check(&self, id: &str) -> Option<&PrerequisiteCheck> {
        self.checks.iter().find(|c| c.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(required: bool, status: CheckStatus) -> PrerequisiteCheck {
        PrerequisiteCheck {
            status,
            ..PrerequisiteCheck::passed("c", CheckCategory::System, "c", "desc", required)
        }
    }

    #[test]
    fn empty_set_is_vacuously_passed() {
        let result = PrerequisiteResult::from_checks(Vec::new());
        assert!(result.required_passed);
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn failed_optional_does_not_block() {
        let result = PrerequisiteResult::from_checks(vec![
            check(true, CheckStatus::Passed),
            check(false, CheckStatus::Failed),
        ]);
        assert!(result.required_passed);
        assert!(result.errors.is_empty());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn pending_required_blocks_but_warns() {
        let result = PrerequisiteResult::from_checks(vec![check(true, CheckStatus::Pending)]);
        assert!(!result.required_passed);
        assert!(result.errors.is_empty());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn failed_required_is_an_error() {
        let result = PrerequisiteResult::from_checks(vec![
            check(true, CheckStatus::Failed),
            check(false, CheckStatus::Pending),
        ]);
        assert!(!result.required_passed);
        assert_eq!(result.errors.len(), 1);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn categories_in_evaluation_order() {
        assert_eq!(CheckCategory::ALL[0], CheckCategory::ProjectData);
        assert_eq!(CheckCategory::ALL[4], CheckCategory::System);
        assert_eq!(CheckCategory::StageSpecific.to_string(), "stage_specific");
    }
}
