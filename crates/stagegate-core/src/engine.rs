//! # Engine
//!
//! Bundles a validated [`Workflow`] with a [`StoreBackend`] and exposes the
//! engine operations plus the caller-side writes that feed them.
//!
//! The engine keeps no verdict between calls. Anything a caller wants to
//! remember about a previous validation it holds itself.

use crate::config::Workflow;
use crate::documents::{AdvanceReport, DocumentEvaluator};
use crate::history::{self, StageHistoryEntry, TimelineEntry, TransitionRecord};
use crate::sources::{
    NewApproval, NewDocument, NewReview, PermissionChecker, ProjectStore,
};
use crate::storage::StoreBackend;
use crate::validator::{
    ConfirmTransition, TransitionContext, TransitionReceipt, TransitionValidator, Verdict,
};
use crate::{
    ApprovalId, ApprovalRequest, ApprovalStatus, DepartmentReview, Document, Project, ProjectId,
    StageGateError, StageId,
};
use chrono::{DateTime, Utc};
use std::path::Path;

#[derive(Debug)]
pub struct Engine {
    workflow: Workflow,
    store: StoreBackend,
}

impl Engine {
    #[must_use]
    pub fn new(workflow: Workflow, store: StoreBackend) -> Self {
        Self { workflow, store }
    }

    /// Engine over a fresh in-memory store.
    #[must_use]
    pub fn in_memory(workflow: Workflow) -> Self {
        Self::new(workflow, StoreBackend::default())
    }

    /// Engine over a redb database at `path`.
    pub fn with_redb(workflow: Workflow, path: impl AsRef<Path>) -> Result<Self, StageGateError> {
        Ok(Self::new(workflow, StoreBackend::open_redb(path)?))
    }

    #[must_use]
    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.store.is_persistent()
    }

    fn require_stage(&self, stage: StageId) -> Result<(), StageGateError> {
        if self.workflow.registry.get(stage).is_some() {
            Ok(())
        } else {
            Err(StageGateError::StageNotFound(stage))
        }
    }

    // =========================================================================
    // PROJECTS
    // =========================================================================

    /// Register a new project. It enters the workflow through its first
    /// confirmed transition.
    pub fn create_project(&mut self, project: Project) -> Result<Project, StageGateError> {
        if project.name.trim().is_empty() {
            return Err(StageGateError::InvalidArgument(
                "project name must not be empty".to_string(),
            ));
        }
        if project.current_stage_id.is_some() {
            return Err(StageGateError::InvalidArgument(
                "a new project cannot start in a stage".to_string(),
            ));
        }
        if self.store.project(project.id)?.is_some() {
            return Err(StageGateError::InvalidArgument(format!(
                "{} already exists",
                project.id
            )));
        }
        self.store.save_project(&project)?;
        tracing::info!(project = project.id.0, "project registered");
        Ok(project)
    }

    /// Replace a project's data. The current stage is kept; only confirmed
    /// transitions move it.
    pub fn update_project(&mut self, mut project: Project) -> Result<Project, StageGateError> {
        let existing = self.project(project.id)?;
        project.current_stage_id = existing.current_stage_id;
        self.store.save_project(&project)?;
        Ok(project)
    }

    pub fn project(&self, id: ProjectId) -> Result<Project, StageGateError> {
        self.store
            .project(id)?
            .ok_or(StageGateError::ProjectNotFound(id))
    }

    // =========================================================================
    // CALLER-SIDE WRITES
    // =========================================================================

    pub fn attach_document(
        &mut self,
        document: NewDocument,
        now: DateTime<Utc>,
    ) -> Result<Document, StageGateError> {
        self.store.attach_document(document, now)
    }

    pub fn request_approval(
        &mut self,
        approval: NewApproval,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, StageGateError> {
        self.require_stage(approval.stage_id)?;
        self.store.request_approval(approval, now)
    }

    pub fn decide_approval(
        &mut self,
        id: ApprovalId,
        status: ApprovalStatus,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, StageGateError> {
        self.store.decide_approval(id, status, comment, now)
    }

    pub fn add_review(
        &mut self,
        review: NewReview,
        now: DateTime<Utc>,
    ) -> Result<DepartmentReview, StageGateError> {
        self.store.add_review(review, now)
    }

    // =========================================================================
    // ENGINE OPERATIONS
    // =========================================================================

    pub fn validate_transition(
        &self,
        project: ProjectId,
        target: StageId,
        permissions: &dyn PermissionChecker,
        now: DateTime<Utc>,
    ) -> Result<Verdict, StageGateError> {
        let project = self.project(project)?;
        Ok(TransitionValidator::new(&self.workflow).validate_transition(
            &project,
            target,
            TransitionContext {
                sources: &self.store,
                history: &self.store,
                permissions,
                now,
            },
        ))
    }

    pub fn confirm_transition(
        &mut self,
        request: &ConfirmTransition,
        permissions: &dyn PermissionChecker,
        now: DateTime<Utc>,
    ) -> Result<TransitionReceipt, StageGateError> {
        TransitionValidator::new(&self.workflow).confirm_transition(
            &mut self.store,
            request,
            permissions,
            now,
        )
    }

    /// Document-only readiness for entering `target`.
    pub fn can_advance_to_stage(
        &self,
        project: ProjectId,
        target: StageId,
    ) -> Result<AdvanceReport, StageGateError> {
        self.project(project)?;
        self.require_stage(target)?;
        DocumentEvaluator::new(&self.workflow.documents).can_advance_to_stage(
            &self.store,
            project,
            target,
        )
    }

    /// Append a ledger entry directly, outside the confirm step.
    pub fn record_transition(
        &mut self,
        record: &TransitionRecord,
        now: DateTime<Utc>,
    ) -> Result<StageHistoryEntry, StageGateError> {
        self.project(record.project_id)?;
        self.require_stage(record.to_stage_id)?;
        if let Some(from) = record.from_stage_id {
            self.require_stage(from)?;
        }
        history::record_transition(&mut self.store, record, now)
    }

    pub fn get_history(&self, project: ProjectId) -> Result<Vec<StageHistoryEntry>, StageGateError> {
        history::get_history(&self.store, project)
    }

    pub fn days_in_current_stage(
        &self,
        project: ProjectId,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, StageGateError> {
        let entries = self.get_history(project)?;
        Ok(history::days_in_current_stage(&entries, now))
    }

    pub fn stage_timeline(
        &self,
        project: ProjectId,
        now: DateTime<Utc>,
    ) -> Result<Vec<TimelineEntry>, StageGateError> {
        let entries = self.get_history(project)?;
        Ok(history::stage_timeline(&entries, now))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::WorkflowConfig;
    use crate::sources::StaticPermissions;
    use crate::UserId;
    use chrono::TimeZone;

    fn engine() -> Engine {
        Engine::in_memory(WorkflowConfig::default_workflow().build().unwrap())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 9, 9, 0, 0).unwrap()
    }

    #[test]
    fn duplicate_project_rejected() {
        let mut engine = engine();
        engine
            .create_project(Project::new(ProjectId(1), "Boiler"))
            .unwrap();
        assert!(
            engine
                .create_project(Project::new(ProjectId(1), "Boiler again"))
                .is_err()
        );
        assert!(
            engine
                .create_project(Project::new(ProjectId(2), "  "))
                .is_err()
        );
    }

    #[test]
    fn update_keeps_current_stage() {
        let mut engine = engine();
        engine
            .create_project(Project::new(ProjectId(1), "Boiler"))
            .unwrap();
        engine
            .confirm_transition(
                &ConfirmTransition {
                    project_id: ProjectId(1),
                    target_stage_id: StageId(1),
                    user_id: UserId(1),
                    reason: None,
                    bypass_reason: None,
                },
                &StaticPermissions::none(),
                now(),
            )
            .unwrap();

        let mut edited = Project::new(ProjectId(1), "Boiler (revised)");
        edited.current_stage_id = None;
        let saved = engine.update_project(edited).unwrap();
        assert_eq!(saved.current_stage_id, Some(StageId(1)));
    }

    #[test]
    fn unknown_ids_are_contract_errors() {
        let mut engine = engine();
        assert!(matches!(
            engine.validate_transition(ProjectId(5), StageId(1), &StaticPermissions::none(), now()),
            Err(StageGateError::ProjectNotFound(_))
        ));
        engine
            .create_project(Project::new(ProjectId(5), "Mixer"))
            .unwrap();
        assert!(matches!(
            engine.can_advance_to_stage(ProjectId(5), StageId(70)),
            Err(StageGateError::StageNotFound(_))
        ));
    }

    #[test]
    fn days_in_stage_without_history_is_none() {
        let mut engine = engine();
        engine
            .create_project(Project::new(ProjectId(1), "Boiler"))
            .unwrap();
        assert_eq!(engine.days_in_current_stage(ProjectId(1), now()).unwrap(), None);
        assert!(engine.stage_timeline(ProjectId(1), now()).unwrap().is_empty());
    }
}
