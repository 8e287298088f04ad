//! # Prerequisite Checker
//!
//! Evaluates the five fixed categories of checks for a (project, target
//! stage) pair and aggregates them into one [`PrerequisiteResult`]:
//!
//! | Category         | Source                                        |
//! |------------------|-----------------------------------------------|
//! | `project_data`   | fields the *target* stage needs               |
//! | `documents`      | [`DocumentEvaluator`], one check per requirement |
//! | `approvals`      | approval requests, only if the stage needs them |
//! | `stage_specific` | the closed [`RuleBook`] entry of the target   |
//! | `system`         | target exists, forward move, project not terminal |
//!
//! A category that cannot be computed never aborts the run: it is replaced by
//! one failed, required `system` check describing the failure, and the
//! remaining categories still run. A partial result is always returned.

mod checks;
mod rules;

pub use checks::{CheckCategory, CheckStatus, PrerequisiteCheck, PrerequisiteResult};
pub use rules::{FieldTable, RuleBook, StageRule, format_cents};

use crate::config::Workflow;
use crate::documents::{DocumentEvaluator, RequirementStatus, invalid_message, missing_message};
use crate::registry::WorkflowStage;
use crate::sources::WorkflowSources;
use crate::{ApprovalStatus, Project, StageGateError, StageId};
use chrono::{DateTime, Utc};

/// Runs every category against one workflow.
#[derive(Debug, Clone, Copy)]
pub struct PrerequisiteChecker<'a> {
    workflow: &'a Workflow,
}

impl<'a> PrerequisiteChecker<'a> {
    #[must_use]
    pub fn new(workflow: &'a Workflow) -> Self {
        Self { workflow }
    }

    /// Evaluate all categories for moving `project` into `target`.
    ///
    /// `current` is the project's resolved current stage, if any. `now` is
    /// used for approval deadlines.
    pub fn check_prerequisites(
        &self,
        project: &Project,
        target: StageId,
        current: Option<&WorkflowStage>,
        sources: &dyn WorkflowSources,
        now: DateTime<Utc>,
    ) -> PrerequisiteResult {
        let target_stage = self.workflow.registry.get(target);
        let mut checks = Vec::new();

        for category in CheckCategory::ALL {
            let outcome = match category {
                CheckCategory::ProjectData => Ok(self.project_data(project, target)),
                CheckCategory::Documents => self.documents(project, target, sources),
                CheckCategory::Approvals => match target_stage {
                    Some(stage) => self.approvals(project, stage, sources, now),
                    None => Ok(Vec::new()),
                },
                CheckCategory::StageSpecific => match target_stage {
                    Some(stage) => self.stage_specific(project, stage, sources),
                    None => Ok(Vec::new()),
                },
                CheckCategory::System => Ok(self.system(project, target, target_stage, current)),
            };

            match outcome {
                Ok(mut category_checks) => checks.append(&mut category_checks),
                Err(e) => {
                    tracing::warn!(
                        project = project.id.0,
                        target = target.0,
                        category = category.as_str(),
                        error = %e,
                        "prerequisite category degraded"
                    );
                    checks.push(unavailable_check(category, &e));
                }
            }
        }

        PrerequisiteResult::from_checks(checks)
    }

    fn project_data(&self, project: &Project, target: StageId) -> Vec<PrerequisiteCheck> {
        self.workflow
            .fields
            .for_stage(target)
            .iter()
            .map(|field| {
                let id = format!("project_data:{}", field.key());
                if project.has_field(*field) {
                    PrerequisiteCheck::passed(
                        id,
                        CheckCategory::ProjectData,
                        field.label(),
                        format!("{} provided", field.label()),
                        true,
                    )
                } else {
                    PrerequisiteCheck::failed(
                        id,
                        CheckCategory::ProjectData,
                        field.label(),
                        format!("{} is required", field.label()),
                        true,
                    )
                }
            })
            .collect()
    }

    fn documents(
        &self,
        project: &Project,
        target: StageId,
        sources: &dyn WorkflowSources,
    ) -> Result<Vec<PrerequisiteCheck>, StageGateError> {
        let validation =
            DocumentEvaluator::new(&self.workflow.documents).evaluate(sources, project.id, target)?;

        let checks = validation
            .outcomes
            .iter()
            .map(|outcome| {
                let requirement = &outcome.requirement;
                let id = format!("documents:{}", requirement.category);
                let name = requirement.display_name().to_string();
                match outcome.status {
                    RequirementStatus::Satisfied => PrerequisiteCheck::passed(
                        id,
                        CheckCategory::Documents,
                        name,
                        format!(
                            "{}: {} of {} provided",
                            requirement.display_name(),
                            outcome.found,
                            requirement.min_count
                        ),
                        requirement.required,
                    ),
                    RequirementStatus::Missing if requirement.required => {
                        PrerequisiteCheck::failed(
                            id,
                            CheckCategory::Documents,
                            name,
                            missing_message(requirement),
                            true,
                        )
                    }
                    RequirementStatus::Missing => PrerequisiteCheck::failed(
                        id,
                        CheckCategory::Documents,
                        name,
                        format!(
                            "Optional document not provided: {}",
                            requirement.display_name()
                        ),
                        false,
                    ),
                    RequirementStatus::Invalid => {
                        let description = validation
                            .invalid
                            .iter()
                            .find(|i| i.requirement == *requirement)
                            .map(invalid_message)
                            .unwrap_or_else(|| {
                                format!("{}: insufficient count", requirement.display_name())
                            });
                        PrerequisiteCheck::failed(
                            id,
                            CheckCategory::Documents,
                            name,
                            description,
                            requirement.required,
                        )
                        .with_details(format!(
                            "{} of {} provided",
                            outcome.found, requirement.min_count
                        ))
                    }
                }
            })
            .collect();
        Ok(checks)
    }

    fn approvals(
        &self,
        project: &Project,
        target: &WorkflowStage,
        sources: &dyn WorkflowSources,
        now: DateTime<Utc>,
    ) -> Result<Vec<PrerequisiteCheck>, StageGateError> {
        if !target.required_approvals {
            return Ok(Vec::new());
        }

        let requests = sources.approvals(project.id, target.id)?;
        if requests.is_empty() {
            return Ok(vec![
                PrerequisiteCheck::pending(
                    format!("approvals:{}:requested", target.slug),
                    CheckCategory::Approvals,
                    "Approval requested",
                    format!("Approval for {} has not been requested yet", target.name),
                    true,
                )
                .with_details("no approvers assigned"),
            ]);
        }

        let checks = requests
            .iter()
            .map(|request| {
                let id = format!("approvals:{}", request.id.0);
                let name = format!("Approval by user {}", request.approver_id.0);
                match request.status {
                    ApprovalStatus::Approved => PrerequisiteCheck::passed(
                        id,
                        CheckCategory::Approvals,
                        name,
                        format!("Approved by user {}", request.approver_id.0),
                        true,
                    ),
                    ApprovalStatus::Rejected => {
                        let check = PrerequisiteCheck::failed(
                            id,
                            CheckCategory::Approvals,
                            name,
                            format!("Approval rejected by user {}", request.approver_id.0),
                            true,
                        );
                        match &request.comment {
                            Some(comment) => check.with_details(comment.clone()),
                            None => check,
                        }
                    }
                    ApprovalStatus::Pending if request.is_overdue(now) => {
                        PrerequisiteCheck::failed(
                            id,
                            CheckCategory::Approvals,
                            name,
                            format!(
                                "Approval deadline passed for user {}",
                                request.approver_id.0
                            ),
                            true,
                        )
                        .with_details(
                            request
                                .deadline
                                .map(|d| format!("deadline {}", d.to_rfc3339()))
                                .unwrap_or_default(),
                        )
                    }
                    ApprovalStatus::Pending => PrerequisiteCheck::pending(
                        id,
                        CheckCategory::Approvals,
                        name,
                        format!("Awaiting approval from user {}", request.approver_id.0),
                        true,
                    ),
                }
            })
            .collect();
        Ok(checks)
    }

    fn stage_specific(
        &self,
        project: &Project,
        target: &WorkflowStage,
        sources: &dyn WorkflowSources,
    ) -> Result<Vec<PrerequisiteCheck>, StageGateError> {
        let rules = self.workflow.rules.for_stage(&target.slug).ok_or_else(|| {
            StageGateError::Validation(format!("no rule set configured for stage '{}'", target.slug))
        })?;

        rules
            .iter()
            .enumerate()
            .map(|(index, rule)| rule.evaluate(index, &target.slug, project, sources))
            .collect()
    }

    fn system(
        &self,
        project: &Project,
        target: StageId,
        target_stage: Option<&WorkflowStage>,
        current: Option<&WorkflowStage>,
    ) -> Vec<PrerequisiteCheck> {
        let mut checks = Vec::with_capacity(3);

        match target_stage {
            Some(stage) => {
                checks.push(PrerequisiteCheck::passed(
                    "system:target_exists",
                    CheckCategory::System,
                    "Target stage exists",
                    format!("Target stage {} exists", stage.name),
                    true,
                ));
                let reachable = current.is_none_or(|c| stage.order > c.order);
                if reachable {
                    checks.push(PrerequisiteCheck::passed(
                        "system:forward_move",
                        CheckCategory::System,
                        "Forward move",
                        format!("{} is ahead of the current stage", stage.name),
                        true,
                    ));
                } else {
                    checks.push(PrerequisiteCheck::failed(
                        "system:forward_move",
                        CheckCategory::System,
                        "Forward move",
                        format!(
                            "{} is not ahead of the current stage {}",
                            stage.name,
                            current.map(|c| c.name.as_str()).unwrap_or("-")
                        ),
                        true,
                    ));
                }
            }
            None => checks.push(PrerequisiteCheck::failed(
                "system:target_exists",
                CheckCategory::System,
                "Target stage exists",
                format!("Target stage {} does not exist", target),
                true,
            )),
        }

        if project.status.is_terminal() {
            checks.push(PrerequisiteCheck::failed(
                "system:project_active",
                CheckCategory::System,
                "Project active",
                format!("Project is {} and cannot change stage", project.status.as_str()),
                true,
            ));
        } else {
            checks.push(PrerequisiteCheck::passed(
                "system:project_active",
                CheckCategory::System,
                "Project active",
                "Project is open for stage changes",
                true,
            ));
        }

        checks
    }
}

/// The failed system check substituted for a category that could not complete.
fn unavailable_check(category: CheckCategory, error: &StageGateError) -> PrerequisiteCheck {
    PrerequisiteCheck::failed(
        format!("system:{}_unavailable", category.as_str()),
        CheckCategory::System,
        format!("{} checks available", category.label()),
        format!("{} checks could not be completed", category.label()),
        true,
    )
    .with_details(error.to_string())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::WorkflowConfig;
    use crate::sources::{NewApproval, NewDocument, ProjectStore};
    use crate::storage::MemoryStore;
    use crate::{
        ApprovalRequest, DepartmentReview, Document, ProjectId, ProjectStatus, UserId,
    };
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 10, 0, 0).unwrap()
    }

    fn workflow() -> Workflow {
        WorkflowConfig::default_workflow().build().unwrap()
    }

    fn stage<'w>(workflow: &'w Workflow, slug: &str) -> &'w WorkflowStage {
        workflow.registry.by_slug(slug).unwrap()
    }

    fn complete_project() -> Project {
        let mut project = Project::new(ProjectId(1), "Conveyor retrofit");
        project.customer_reference = Some("ACME-2291".to_string());
        project.description = Some("Retrofit of line 3 conveyor".to_string());
        project.estimated_value_cents = Some(4_500_000);
        project.contact_email = Some("buyer@acme.test".to_string());
        project
    }

    fn attach(store: &mut MemoryStore, category: &str) {
        store
            .attach_document(
                NewDocument {
                    project_id: ProjectId(1),
                    category: category.to_string(),
                    file_name: format!("{}.pdf", category),
                },
                now(),
            )
            .unwrap();
    }

    #[test]
    fn documents_map_to_one_check_each() {
        let workflow = workflow();
        let store = MemoryStore::new();
        let project = complete_project();
        let inquiry = stage(&workflow, "inquiry");
        let target = stage(&workflow, "technical_review");

        let result = PrerequisiteChecker::new(&workflow).check_prerequisites(
            &project,
            target.id,
            Some(inquiry),
            &store,
            now(),
        );

        let documents: Vec<_> = result.in_category(CheckCategory::Documents).collect();
        assert_eq!(documents.len(), 3);
        assert!(documents.iter().all(|c| c.status == CheckStatus::Failed));
        assert!(!result.required_passed);
        assert_eq!(result.errors.len(), 3);
    }

    #[test]
    fn missing_project_fields_fail() {
        let workflow = workflow();
        let store = MemoryStore::new();
        let project = Project::new(ProjectId(1), "Bare");
        let target = stage(&workflow, "technical_review");

        let result = PrerequisiteChecker::new(&workflow).check_prerequisites(
            &project,
            target.id,
            Some(stage(&workflow, "inquiry")),
            &store,
            now(),
        );
        let check = result.check("project_data:customer_reference").unwrap();
        assert_eq!(check.status, CheckStatus::Failed);
        assert!(result.errors.iter().any(|e| e == "Customer reference is required"));
    }

    #[test]
    fn unrequested_approval_is_pending_not_failed() {
        let workflow = workflow();
        let store = MemoryStore::new();
        let project = complete_project();
        let target = stage(&workflow, "customer_approval");
        assert!(target.required_approvals);

        let result = PrerequisiteChecker::new(&workflow).check_prerequisites(
            &project,
            target.id,
            Some(stage(&workflow, "quotation")),
            &store,
            now(),
        );
        let approvals: Vec<_> = result.in_category(CheckCategory::Approvals).collect();
        assert_eq!(approvals.len(), 1);
        assert_eq!(approvals[0].status, CheckStatus::Pending);
        assert!(!result.required_passed);
        assert!(
            result
                .warnings
                .iter()
                .any(|w| w.contains("has not been requested"))
        );
    }

    #[test]
    fn overdue_approval_fails() {
        let workflow = workflow();
        let mut store = MemoryStore::new();
        let project = complete_project();
        store.save_project(&project).unwrap();
        let target = stage(&workflow, "customer_approval");

        store
            .request_approval(
                NewApproval {
                    project_id: project.id,
                    stage_id: target.id,
                    approver_id: UserId(3),
                    deadline: Some(now() - Duration::hours(1)),
                },
                now() - Duration::days(2),
            )
            .unwrap();
        store
            .request_approval(
                NewApproval {
                    project_id: project.id,
                    stage_id: target.id,
                    approver_id: UserId(4),
                    deadline: Some(now() + Duration::days(1)),
                },
                now() - Duration::days(2),
            )
            .unwrap();

        let result = PrerequisiteChecker::new(&workflow).check_prerequisites(
            &project,
            target.id,
            Some(stage(&workflow, "quotation")),
            &store,
            now(),
        );
        let statuses: Vec<_> = result
            .in_category(CheckCategory::Approvals)
            .map(|c| c.status)
            .collect();
        assert_eq!(statuses, vec![CheckStatus::Failed, CheckStatus::Pending]);
        assert!(result.errors.iter().any(|e| e.contains("deadline passed")));
    }

    #[test]
    fn approvals_skipped_when_stage_does_not_need_them() {
        let workflow = workflow();
        let store = MemoryStore::new();
        let target = stage(&workflow, "technical_review");
        assert!(!target.required_approvals);

        let result = PrerequisiteChecker::new(&workflow).check_prerequisites(
            &complete_project(),
            target.id,
            Some(stage(&workflow, "inquiry")),
            &store,
            now(),
        );
        assert_eq!(result.in_category(CheckCategory::Approvals).count(), 0);
    }

    #[test]
    fn backward_move_fails_system_check() {
        let workflow = workflow();
        let store = MemoryStore::new();
        let target = stage(&workflow, "inquiry");

        let result = PrerequisiteChecker::new(&workflow).check_prerequisites(
            &complete_project(),
            target.id,
            Some(stage(&workflow, "quotation")),
            &store,
            now(),
        );
        assert_eq!(
            result.check("system:forward_move").unwrap().status,
            CheckStatus::Failed
        );
    }

    #[test]
    fn unknown_target_only_fails_system() {
        let workflow = workflow();
        let store = MemoryStore::new();
        let result = PrerequisiteChecker::new(&workflow).check_prerequisites(
            &complete_project(),
            StageId(999),
            None,
            &store,
            now(),
        );
        assert_eq!(
            result.check("system:target_exists").unwrap().status,
            CheckStatus::Failed
        );
        assert!(
            result
                .checks
                .iter()
                .all(|c| c.category == CheckCategory::System)
        );
    }

    #[test]
    fn terminal_project_fails_system() {
        let workflow = workflow();
        let store = MemoryStore::new();
        let mut project = complete_project();
        project.status = ProjectStatus::Cancelled;
        let target = stage(&workflow, "technical_review");

        let result = PrerequisiteChecker::new(&workflow).check_prerequisites(
            &project,
            target.id,
            Some(stage(&workflow, "inquiry")),
            &store,
            now(),
        );
        assert!(
            result
                .errors
                .iter()
                .any(|e| e.contains("cancelled"))
        );
    }

    #[test]
    fn all_documents_present_passes() {
        let workflow = workflow();
        let mut store = MemoryStore::new();
        store.save_project(&complete_project()).unwrap();
        for category in ["rfq", "drawing", "bom"] {
            attach(&mut store, category);
        }
        let target = stage(&workflow, "technical_review");

        let result = PrerequisiteChecker::new(&workflow).check_prerequisites(
            &complete_project(),
            target.id,
            Some(stage(&workflow, "inquiry")),
            &store,
            now(),
        );
        assert!(result.required_passed, "errors: {:?}", result.errors);
    }

    /// Sources whose document store is down while everything else works.
    struct DocumentsDown(MemoryStore);

    impl WorkflowSources for DocumentsDown {
        fn documents(&self, _: ProjectId, _: &str) -> Result<Vec<Document>, StageGateError> {
            Err(StageGateError::Io("document service timed out".into()))
        }
        fn approvals(
            &self,
            project: ProjectId,
            stage: StageId,
        ) -> Result<Vec<ApprovalRequest>, StageGateError> {
            self.0.approvals(project, stage)
        }
        fn reviews(&self, project: ProjectId) -> Result<Vec<DepartmentReview>, StageGateError> {
            self.0.reviews(project)
        }
    }

    #[test]
    fn failed_category_degrades_to_system_check() {
        let workflow = workflow();
        let sources = DocumentsDown(MemoryStore::new());
        let target = stage(&workflow, "technical_review");

        let result = PrerequisiteChecker::new(&workflow).check_prerequisites(
            &complete_project(),
            target.id,
            Some(stage(&workflow, "inquiry")),
            &sources,
            now(),
        );

        assert_eq!(result.in_category(CheckCategory::Documents).count(), 0);
        let degraded = result.check("system:documents_unavailable").unwrap();
        assert_eq!(degraded.category, CheckCategory::System);
        assert_eq!(degraded.status, CheckStatus::Failed);
        assert!(degraded.required);
        assert!(
            degraded
                .details
                .as_deref()
                .unwrap()
                .contains("timed out")
        );
        // The remaining categories still ran.
        assert!(result.check("system:project_active").is_some());
        assert!(result.check("project_data:customer_reference").is_some());
        assert!(!result.required_passed);
    }

    #[test]
    fn unconfigured_rule_set_degrades_loudly() {
        let mut workflow = workflow();
        workflow.rules = RuleBook::default();
        let store = MemoryStore::new();
        let target = stage(&workflow, "technical_review").id;

        let result = PrerequisiteChecker::new(&workflow).check_prerequisites(
            &complete_project(),
            target,
            None,
            &store,
            now(),
        );
        assert!(result.check("system:stage_specific_unavailable").is_some());
    }
}
