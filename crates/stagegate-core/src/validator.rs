//! # Stage Transition Validator
//!
//! Merges the registry, the prerequisite checker and the caller's
//! permissions into one [`Verdict`], and performs the confirm step.
//!
//! ## Transition attempt state machine
//!
//! ```text
//! Idle -> Validating -> Valid   -> (confirm) -> Recording -> Committed
//!                    \-> Invalid                         \-> Failed
//! ```
//!
//! ## Verdict rules
//!
//! - `is_valid`          = service check passed AND every required check passed
//! - `requires_bypass`   = NOT `is_valid` AND the caller holds the bypass permission
//!                         AND the target exists and lies ahead of the current stage
//! - `can_proceed`       = `is_valid` OR `requires_bypass`
//! - `requires_approval` = target needs approvals AND not every approval check passed
//!
//! Verdicts are recomputed on every call. The confirm step never trusts a
//! verdict handed back by the caller.

use crate::config::Workflow;
use crate::history::{StageHistoryEntry, TransitionRecord, record_transition};
use crate::prerequisites::{CheckCategory, PrerequisiteChecker, PrerequisiteResult};
use crate::primitives::{BYPASS_ACTION, MAX_REASON_LENGTH, NON_SEQUENTIAL_ACTION, TRANSITION_RESOURCE};
use crate::registry::WorkflowStage;
use crate::sources::{HistoryStore, PermissionChecker, ProjectStore, WorkflowSources};
use crate::{Project, ProjectId, StageGateError, StageId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// TYPES
// =============================================================================

/// Phases of one transition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPhase {
    Idle,
    Validating,
    Valid,
    Invalid,
    Recording,
    Committed,
    Failed,
}

/// The combined decision for one transition attempt. Transient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub project_id: ProjectId,
    pub from_stage_id: Option<StageId>,
    pub target_stage_id: StageId,
    pub is_valid: bool,
    pub can_proceed: bool,
    pub requires_approval: bool,
    /// Set only when the target exists and lies ahead of the current stage.
    pub requires_bypass: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub prerequisite_result: PrerequisiteResult,
}

/// Everything a validation reads besides the project and the workflow.
#[derive(Clone, Copy)]
pub struct TransitionContext<'a> {
    pub sources: &'a dyn WorkflowSources,
    pub history: &'a dyn HistoryStore,
    pub permissions: &'a dyn PermissionChecker,
    pub now: DateTime<Utc>,
}

/// A request to commit a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmTransition {
    pub project_id: ProjectId,
    pub target_stage_id: StageId,
    pub user_id: UserId,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub bypass_reason: Option<String>,
}

/// Outcome of a committed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionReceipt {
    pub project_id: ProjectId,
    pub from_stage_id: Option<StageId>,
    pub to_stage_id: StageId,
    /// Phases the attempt went through, ending in `Committed`.
    pub phases: Vec<TransitionPhase>,
    pub bypassed: bool,
    /// The opened history entry; `None` if the history write failed.
    pub entry: Option<StageHistoryEntry>,
    /// Non-blocking notices, e.g. a failed history write.
    pub notices: Vec<String>,
    pub verdict: Verdict,
}

impl TransitionReceipt {
    #[must_use]
    pub fn final_phase(&self) -> TransitionPhase {
        self.phases.last().copied().unwrap_or(TransitionPhase::Idle)
    }
}

// =============================================================================
// VALIDATOR
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct TransitionValidator<'a> {
    workflow: &'a Workflow,
}

/// Result of the sequencing check.
struct ServiceCheck {
    passed: bool,
    error: Option<String>,
    warnings: Vec<String>,
}

impl<'a> TransitionValidator<'a> {
    #[must_use]
    pub fn new(workflow: &'a Workflow) -> Self {
        Self { workflow }
    }

    /// Compute the verdict for moving `project` into `target`.
    pub fn validate_transition(
        &self,
        project: &Project,
        target: StageId,
        ctx: TransitionContext<'_>,
    ) -> Verdict {
        let registry = &self.workflow.registry;
        let target_stage = registry.get(target);
        let current_stage = project.current_stage_id.and_then(|id| registry.get(id));

        let mut warnings = Vec::new();
        let non_sequential = holds(ctx.permissions, NON_SEQUENTIAL_ACTION, &mut warnings);
        let service = self.service_check(project, target_stage, current_stage, non_sequential, ctx);
        warnings.extend(service.warnings);

        let prerequisite_result = PrerequisiteChecker::new(self.workflow).check_prerequisites(
            project,
            target,
            current_stage,
            ctx.sources,
            ctx.now,
        );

        let is_valid = service.passed && prerequisite_result.required_passed;
        // Unknown targets and backward moves are never bypassable.
        let bypassable = target_stage
            .is_some_and(|stage| current_stage.is_none_or(|c| stage.order > c.order));
        let requires_bypass =
            !is_valid && bypassable && holds(ctx.permissions, BYPASS_ACTION, &mut warnings);
        let can_proceed = is_valid || requires_bypass;

        let requires_approval = target_stage.is_some_and(|stage| {
            let mut approvals = prerequisite_result
                .in_category(CheckCategory::Approvals)
                .peekable();
            stage.required_approvals
                && !(approvals.peek().is_some() && approvals.all(|c| c.is_passed()))
        });

        let mut errors: Vec<String> = service.error.into_iter().collect();
        errors.extend(prerequisite_result.errors.iter().cloned());
        warnings.extend(prerequisite_result.warnings.iter().cloned());

        tracing::debug!(
            project = project.id.0,
            target = target.0,
            is_valid,
            can_proceed,
            requires_bypass,
            requires_approval,
            errors = errors.len(),
            "verdict computed"
        );

        Verdict {
            project_id: project.id,
            from_stage_id: project.current_stage_id,
            target_stage_id: target,
            is_valid,
            can_proceed,
            requires_approval,
            requires_bypass,
            errors,
            warnings,
            prerequisite_result,
        }
    }

    fn service_check(
        &self,
        project: &Project,
        target: Option<&WorkflowStage>,
        current: Option<&WorkflowStage>,
        non_sequential: bool,
        ctx: TransitionContext<'_>,
    ) -> ServiceCheck {
        let fail = |error: String| ServiceCheck {
            passed: false,
            error: Some(error),
            warnings: Vec::new(),
        };
        let pass = |warnings: Vec<String>| ServiceCheck {
            passed: true,
            error: None,
            warnings,
        };

        // An unknown target is reported by the system checks.
        let Some(target) = target else {
            return ServiceCheck {
                passed: false,
                error: None,
                warnings: Vec::new(),
            };
        };

        if let Some(stage_id) = project.current_stage_id
            && current.is_none()
        {
            return fail(format!(
                "Current stage {} is not part of the workflow",
                stage_id
            ));
        }

        match current {
            Some(current) if target.order == current.order.saturating_add(1) => pass(Vec::new()),
            Some(current) if non_sequential && target.order > current.order => {
                pass(vec![format!(
                    "Non-sequential move from {} to {}",
                    current.name, target.name
                )])
            }
            Some(current) => fail(format!(
                "{} does not directly follow {}",
                target.name, current.name
            )),
            None => {
                match ctx.history.entries(project.id) {
                    Ok(entries) if !entries.is_empty() => {
                        return fail(
                            "Project has stage history but no current stage".to_string(),
                        );
                    }
                    Ok(_) => {}
                    Err(e) => return fail(format!("Stage history unavailable: {}", e)),
                }
                let is_first = self
                    .workflow
                    .registry
                    .first()
                    .is_some_and(|first| first.id == target.id);
                if is_first {
                    pass(Vec::new())
                } else if non_sequential {
                    pass(vec![format!("Project enters the workflow at {}", target.name)])
                } else {
                    fail(format!(
                        "A project's first transition must enter {}",
                        self.workflow
                            .registry
                            .first()
                            .map(|s| s.name.as_str())
                            .unwrap_or("the first stage")
                    ))
                }
            }
        }
    }

    /// Re-validate and commit a transition.
    ///
    /// Applies the stage change first, then appends history. A history
    /// failure after a successful stage change is reported as a notice on
    /// the receipt and never rolls the stage change back.
    pub fn confirm_transition<S>(
        &self,
        store: &mut S,
        request: &ConfirmTransition,
        permissions: &dyn PermissionChecker,
        now: DateTime<Utc>,
    ) -> Result<TransitionReceipt, StageGateError>
    where
        S: ProjectStore + WorkflowSources + HistoryStore,
    {
        let mut phases = vec![TransitionPhase::Idle, TransitionPhase::Validating];

        let project = store
            .project(request.project_id)?
            .ok_or(StageGateError::ProjectNotFound(request.project_id))?;
        if self.workflow.registry.get(request.target_stage_id).is_none() {
            return Err(StageGateError::StageNotFound(request.target_stage_id));
        }
        let verdict = self.validate_transition(
            &project,
            request.target_stage_id,
            TransitionContext {
                sources: &*store,
                history: &*store,
                permissions,
                now,
            },
        );

        let bypass_reason = request
            .bypass_reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());

        if !verdict.can_proceed {
            phases.push(TransitionPhase::Invalid);
            let mut ignored = Vec::new();
            if bypass_reason.is_some() && !holds(permissions, BYPASS_ACTION, &mut ignored) {
                tracing::info!(
                    project = project.id.0,
                    user = request.user_id.0,
                    "bypass attempted without permission"
                );
                return Err(StageGateError::PermissionDenied(format!(
                    "bypassing prerequisites requires {}:{}",
                    TRANSITION_RESOURCE, BYPASS_ACTION
                )));
            }
            return Err(StageGateError::TransitionBlocked(verdict.errors.clone()));
        }
        phases.push(TransitionPhase::Valid);

        let mut notices = Vec::new();
        let bypass_reason = if verdict.requires_bypass {
            match bypass_reason {
                Some(reason) if reason.len() <= MAX_REASON_LENGTH => Some(reason.to_string()),
                Some(_) => {
                    return Err(StageGateError::InvalidArgument(format!(
                        "bypass reason exceeds {} bytes",
                        MAX_REASON_LENGTH
                    )));
                }
                None => {
                    return Err(StageGateError::Precondition(
                        "a bypass reason is required when bypassing prerequisites".to_string(),
                    ));
                }
            }
        } else {
            if bypass_reason.is_some() {
                notices.push("Bypass reason ignored: all prerequisites passed".to_string());
            }
            None
        };

        phases.push(TransitionPhase::Recording);
        if let Err(e) = store.set_current_stage(project.id, request.target_stage_id) {
            tracing::error!(
                project = project.id.0,
                target = request.target_stage_id.0,
                error = %e,
                phase = ?TransitionPhase::Failed,
                "stage change failed"
            );
            return Err(e);
        }

        let record = TransitionRecord {
            project_id: project.id,
            from_stage_id: project.current_stage_id,
            to_stage_id: request.target_stage_id,
            user_id: request.user_id,
            reason: request
                .reason
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
            bypass_required: verdict.requires_bypass,
            bypass_reason,
        };

        let entry = match record_transition(store, &record, now) {
            Ok(entry) => Some(entry),
            Err(e) => {
                let notice = StageGateError::Persistence(format!(
                    "stage changed but the history entry was not recorded: {}",
                    e
                ));
                tracing::warn!(project = project.id.0, error = %e, "history write failed after stage change");
                notices.push(notice.to_string());
                None
            }
        };
        phases.push(TransitionPhase::Committed);

        if let Some(reason) = &record.bypass_reason {
            tracing::info!(
                project = project.id.0,
                user = request.user_id.0,
                target = request.target_stage_id.0,
                reason_len = reason.len(),
                "transition committed with bypass"
            );
        } else {
            tracing::info!(
                project = project.id.0,
                target = request.target_stage_id.0,
                "transition committed"
            );
        }

        Ok(TransitionReceipt {
            project_id: project.id,
            from_stage_id: project.current_stage_id,
            to_stage_id: request.target_stage_id,
            phases,
            bypassed: record.bypass_required,
            entry,
            notices,
            verdict,
        })
    }
}

/// Permission lookup; a failed lookup counts as not held.
fn holds(permissions: &dyn PermissionChecker, action: &str, warnings: &mut Vec<String>) -> bool {
    match permissions.check_permission(TRANSITION_RESOURCE, action) {
        Ok(decision) => decision.allowed,
        Err(e) => {
            tracing::warn!(action, error = %e, "permission lookup failed");
            warnings.push(format!(
                "Permission {}:{} could not be checked: {}",
                TRANSITION_RESOURCE, action, e
            ));
            false
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::config::WorkflowConfig;
    use crate::sources::{NewDocument, StaticPermissions};
    use crate::storage::MemoryStore;
    use crate::{ApprovalRequest, DepartmentReview, Document, ProjectStatus};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 3, 14, 0, 0).unwrap()
    }

    fn workflow() -> Workflow {
        WorkflowConfig::default_workflow().build().unwrap()
    }

    fn stage_id(workflow: &Workflow, slug: &str) -> StageId {
        workflow.registry.by_slug(slug).unwrap().id
    }

    /// A project sitting in `inquiry` with an open history entry.
    fn seeded(workflow: &Workflow) -> MemoryStore {
        let mut store = MemoryStore::new();
        let mut project = Project::new(ProjectId(1), "Press brake tooling");
        project.customer_reference = Some("ACME-17".to_string());
        project.description = Some("Tooling set for 3m press brake".to_string());
        store.save_project(&project).unwrap();

        let first = stage_id(workflow, "inquiry");
        TransitionValidator::new(workflow)
            .confirm_transition(
                &mut store,
                &ConfirmTransition {
                    project_id: ProjectId(1),
                    target_stage_id: first,
                    user_id: UserId(1),
                    reason: None,
                    bypass_reason: None,
                },
                &StaticPermissions::none(),
                now(),
            )
            .unwrap();
        store
    }

    fn validate(
        workflow: &Workflow,
        store: &MemoryStore,
        target: StageId,
        permissions: &StaticPermissions,
    ) -> Verdict {
        let project = store.project(ProjectId(1)).unwrap().unwrap();
        TransitionValidator::new(workflow).validate_transition(
            &project,
            target,
            TransitionContext {
                sources: store,
                history: store,
                permissions,
                now: now(),
            },
        )
    }

    fn upload(store: &mut MemoryStore, category: &str) {
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
    fn first_transition_must_enter_first_stage() {
        let workflow = workflow();
        let mut store = MemoryStore::new();
        store
            .save_project(&Project::new(ProjectId(1), "New"))
            .unwrap();

        let verdict = validate(
            &workflow,
            &store,
            stage_id(&workflow, "quotation"),
            &StaticPermissions::none(),
        );
        assert!(!verdict.is_valid);
        assert!(verdict.errors[0].contains("first transition"));

        let verdict = validate(
            &workflow,
            &store,
            stage_id(&workflow, "inquiry"),
            &StaticPermissions::none(),
        );
        assert!(verdict.is_valid, "errors: {:?}", verdict.errors);
        assert_eq!(verdict.from_stage_id, None);
    }

    #[test]
    fn skipping_a_stage_needs_non_sequential_permission() {
        let workflow = workflow();
        let store = seeded(&workflow);
        let target = stage_id(&workflow, "quotation");

        let verdict = validate(&workflow, &store, target, &StaticPermissions::none());
        assert!(
            verdict
                .errors
                .iter()
                .any(|e| e.contains("does not directly follow"))
        );

        let permissions =
            StaticPermissions::none().grant(TRANSITION_RESOURCE, NON_SEQUENTIAL_ACTION);
        let verdict = validate(&workflow, &store, target, &permissions);
        assert!(
            !verdict
                .errors
                .iter()
                .any(|e| e.contains("does not directly follow"))
        );
        assert!(verdict.warnings.iter().any(|w| w.contains("Non-sequential")));
    }

    #[test]
    fn bypass_permission_makes_invalid_transition_proceedable() {
        let workflow = workflow();
        let store = seeded(&workflow);
        let target = stage_id(&workflow, "technical_review");

        let verdict = validate(&workflow, &store, target, &StaticPermissions::none());
        assert!(!verdict.is_valid);
        assert!(!verdict.requires_bypass);
        assert!(!verdict.can_proceed);

        let permissions = StaticPermissions::none().grant(TRANSITION_RESOURCE, BYPASS_ACTION);
        let verdict = validate(&workflow, &store, target, &permissions);
        assert!(!verdict.is_valid);
        assert!(verdict.requires_bypass);
        assert!(verdict.can_proceed);
    }

    #[test]
    fn valid_transition_never_requires_bypass() {
        let workflow = workflow();
        let mut store = seeded(&workflow);
        for category in ["rfq", "drawing", "bom"] {
            upload(&mut store, category);
        }
        let permissions = StaticPermissions::none().grant(TRANSITION_RESOURCE, BYPASS_ACTION);
        let verdict = validate(
            &workflow,
            &store,
            stage_id(&workflow, "technical_review"),
            &permissions,
        );
        assert!(verdict.is_valid);
        assert!(!verdict.requires_bypass);
        assert!(!verdict.requires_approval);
    }

    #[test]
    fn approval_stage_requires_approval() {
        let workflow = workflow();
        let mut store = seeded(&workflow);
        store
            .set_current_stage(ProjectId(1), stage_id(&workflow, "quotation"))
            .unwrap();
        let verdict = validate(
            &workflow,
            &store,
            stage_id(&workflow, "customer_approval"),
            &StaticPermissions::none(),
        );
        assert!(verdict.requires_approval);
    }

    #[test]
    fn confirm_without_bypass_permission_but_with_reason_is_denied() {
        let workflow = workflow();
        let mut store = seeded(&workflow);
        let result = TransitionValidator::new(&workflow).confirm_transition(
            &mut store,
            &ConfirmTransition {
                project_id: ProjectId(1),
                target_stage_id: stage_id(&workflow, "technical_review"),
                user_id: UserId(2),
                reason: None,
                bypass_reason: Some("customer is waiting".to_string()),
            },
            &StaticPermissions::none(),
            now(),
        );
        assert!(matches!(result, Err(StageGateError::PermissionDenied(_))));
    }

    #[test]
    fn blocked_confirm_lists_errors() {
        let workflow = workflow();
        let mut store = seeded(&workflow);
        let err = TransitionValidator::new(&workflow)
            .confirm_transition(
                &mut store,
                &ConfirmTransition {
                    project_id: ProjectId(1),
                    target_stage_id: stage_id(&workflow, "technical_review"),
                    user_id: UserId(2),
                    reason: None,
                    bypass_reason: None,
                },
                &StaticPermissions::none(),
                now(),
            )
            .unwrap_err();
        match err {
            StageGateError::TransitionBlocked(errors) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn bypass_cannot_reach_unknown_stage() {
        let workflow = workflow();
        let mut store = seeded(&workflow);
        let permissions = StaticPermissions::none().grant(TRANSITION_RESOURCE, BYPASS_ACTION);

        let verdict = validate(&workflow, &store, StageId(999), &permissions);
        assert!(!verdict.requires_bypass);
        assert!(!verdict.can_proceed);

        let result = TransitionValidator::new(&workflow).confirm_transition(
            &mut store,
            &ConfirmTransition {
                project_id: ProjectId(1),
                target_stage_id: StageId(999),
                user_id: UserId(7),
                reason: None,
                bypass_reason: Some("because".to_string()),
            },
            &permissions,
            now(),
        );
        assert!(matches!(
            result,
            Err(StageGateError::StageNotFound(StageId(999)))
        ));

        let project = store.project(ProjectId(1)).unwrap().unwrap();
        assert_eq!(project.current_stage_id, Some(stage_id(&workflow, "inquiry")));
        assert_eq!(store.entries(ProjectId(1)).unwrap().len(), 1);
    }

    #[test]
    fn bypass_cannot_move_backward() {
        let workflow = workflow();
        let mut store = seeded(&workflow);
        store
            .set_current_stage(ProjectId(1), stage_id(&workflow, "quotation"))
            .unwrap();
        let permissions = StaticPermissions::none().grant(TRANSITION_RESOURCE, BYPASS_ACTION);
        let target = stage_id(&workflow, "inquiry");

        let verdict = validate(&workflow, &store, target, &permissions);
        assert!(!verdict.requires_bypass);
        assert!(!verdict.can_proceed);

        let result = TransitionValidator::new(&workflow).confirm_transition(
            &mut store,
            &ConfirmTransition {
                project_id: ProjectId(1),
                target_stage_id: target,
                user_id: UserId(7),
                reason: None,
                bypass_reason: Some("rework".to_string()),
            },
            &permissions,
            now(),
        );
        assert!(matches!(result, Err(StageGateError::TransitionBlocked(_))));
    }

    #[test]
    fn terminal_project_cannot_advance() {
        let workflow = workflow();
        let mut store = seeded(&workflow);
        let mut project = store.project(ProjectId(1)).unwrap().unwrap();
        project.status = ProjectStatus::Completed;
        store.save_project(&project).unwrap();
        for category in ["rfq", "drawing", "bom"] {
            upload(&mut store, category);
        }
        let verdict = validate(
            &workflow,
            &store,
            stage_id(&workflow, "technical_review"),
            &StaticPermissions::none(),
        );
        assert!(!verdict.is_valid);
    }

    /// Store whose history writes always fail.
    struct HistoryDown(MemoryStore);

    impl WorkflowSources for HistoryDown {
        fn documents(&self, p: ProjectId, c: &str) -> Result<Vec<Document>, StageGateError> {
            self.0.documents(p, c)
        }
        fn approvals(
            &self,
            p: ProjectId,
            s: StageId,
        ) -> Result<Vec<ApprovalRequest>, StageGateError> {
            self.0.approvals(p, s)
        }
        fn reviews(&self, p: ProjectId) -> Result<Vec<DepartmentReview>, StageGateError> {
            self.0.reviews(p)
        }
    }

    impl ProjectStore for HistoryDown {
        fn project(&self, id: ProjectId) -> Result<Option<Project>, StageGateError> {
            self.0.project(id)
        }
        fn save_project(&mut self, project: &Project) -> Result<(), StageGateError> {
            self.0.save_project(project)
        }
        fn set_current_stage(
            &mut self,
            id: ProjectId,
            stage: StageId,
        ) -> Result<(), StageGateError> {
            self.0.set_current_stage(id, stage)
        }
        fn attach_document(
            &mut self,
            document: NewDocument,
            now: DateTime<Utc>,
        ) -> Result<Document, StageGateError> {
            self.0.attach_document(document, now)
        }
        fn request_approval(
            &mut self,
            approval: crate::sources::NewApproval,
            now: DateTime<Utc>,
        ) -> Result<ApprovalRequest, StageGateError> {
            self.0.request_approval(approval, now)
        }
        fn decide_approval(
            &mut self,
            id: crate::ApprovalId,
            status: crate::ApprovalStatus,
            comment: Option<String>,
            now: DateTime<Utc>,
        ) -> Result<ApprovalRequest, StageGateError> {
            self.0.decide_approval(id, status, comment, now)
        }
        fn add_review(
            &mut self,
            review: crate::sources::NewReview,
            now: DateTime<Utc>,
        ) -> Result<DepartmentReview, StageGateError> {
            self.0.add_review(review, now)
        }
    }

    impl HistoryStore for HistoryDown {
        fn append_transition(
            &mut self,
            _: &TransitionRecord,
            _: DateTime<Utc>,
        ) -> Result<StageHistoryEntry, StageGateError> {
            Err(StageGateError::Io("history table locked".into()))
        }
        fn entries(&self, p: ProjectId) -> Result<Vec<StageHistoryEntry>, StageGateError> {
            self.0.entries(p)
        }
    }

    #[test]
    fn history_failure_keeps_stage_change() {
        let workflow = workflow();
        let mut inner = seeded(&workflow);
        for category in ["rfq", "drawing", "bom"] {
            upload(&mut inner, category);
        }
        let mut store = HistoryDown(inner);
        let target = stage_id(&workflow, "technical_review");

        let receipt = TransitionValidator::new(&workflow)
            .confirm_transition(
                &mut store,
                &ConfirmTransition {
                    project_id: ProjectId(1),
                    target_stage_id: target,
                    user_id: UserId(2),
                    reason: Some("scope clear".to_string()),
                    bypass_reason: None,
                },
                &StaticPermissions::none(),
                now(),
            )
            .unwrap();

        assert_eq!(receipt.final_phase(), TransitionPhase::Committed);
        assert!(receipt.entry.is_none());
        assert_eq!(receipt.notices.len(), 1);
        assert!(receipt.notices[0].starts_with("Persistence error"));
        let project = store.project(ProjectId(1)).unwrap().unwrap();
        assert_eq!(project.current_stage_id, Some(target));
    }
}
