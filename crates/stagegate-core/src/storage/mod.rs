//! # Storage Backends
//!
//! Two implementations of the collaborator traits:
//! - [`MemoryStore`]: BTreeMap-backed, deterministic, volatile
//! - [`RedbStore`]: disk-backed redb tables with postcard values
//!
//! [`StoreBackend`] wraps either one so the engine and the binary can pick
//! a backend at runtime without generics leaking into their signatures.
//!
//! Both backends enforce at most one open history entry per project at the
//! storage layer. The engine holds no lock of its own.

mod memory;
mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use crate::history::{StageHistoryEntry, TransitionRecord};
use crate::sources::{
    HistoryStore, NewApproval, NewDocument, NewReview, ProjectStore, WorkflowSources,
};
use crate::{
    ApprovalId, ApprovalRequest, ApprovalStatus, DepartmentReview, Document, Project, ProjectId,
    StageGateError, StageId,
};
use chrono::{DateTime, Utc};
use std::path::Path;

/// Runtime-selected storage backend.
#[derive(Debug)]
pub enum StoreBackend {
    /// In-memory maps (fast, volatile).
    InMemory(MemoryStore),
    /// Disk-backed redb database (ACID, persistent).
    Persistent(RedbStore),
}

impl Default for StoreBackend {
    fn default() -> Self {
        Self::InMemory(MemoryStore::new())
    }
}

impl StoreBackend {
    /// Open or create a redb database at `path`.
    pub fn open_redb(path: impl AsRef<Path>) -> Result<Self, StageGateError> {
        Ok(Self::Persistent(RedbStore::open(path)?))
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Persistent(_))
    }
}

macro_rules! delegate {
    ($self:ident, $store:ident => $call:expr) => {
        match $self {
            StoreBackend::InMemory($store) => $call,
            StoreBackend::Persistent($store) => $call,
        }
    };
}

impl WorkflowSources for StoreBackend {
    fn documents(
        &self,
        project: ProjectId,
        category: &str,
    ) -> Result<Vec<Document>, StageGateError> {
        delegate!(self, s => s.documents(project, category))
    }

    fn approvals(
        &self,
        project: ProjectId,
        stage: StageId,
    ) -> Result<Vec<ApprovalRequest>, StageGateError> {
        delegate!(self, s => s.approvals(project, stage))
    }

    fn reviews(&self, project: ProjectId) -> Result<Vec<DepartmentReview>, StageGateError> {
        delegate!(self, s => s.reviews(project))
    }
}

impl ProjectStore for StoreBackend {
    fn project(&self, id: ProjectId) -> Result<Option<Project>, StageGateError> {
        delegate!(self, s => s.project(id))
    }

    fn save_project(&mut self, project: &Project) -> Result<(), StageGateError> {
        delegate!(self, s => s.save_project(project))
    }

    fn set_current_stage(&mut self, id: ProjectId, stage: StageId) -> Result<(), StageGateError> {
        delegate!(self, s => s.set_current_stage(id, stage))
    }

    fn attach_document(
        &mut self,
        document: NewDocument,
        now: DateTime<Utc>,
    ) -> Result<Document, StageGateError> {
        delegate!(self, s => s.attach_document(document, now))
    }

    fn request_approval(
        &mut self,
        approval: NewApproval,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, StageGateError> {
        delegate!(self, s => s.request_approval(approval, now))
    }

    fn decide_approval(
        &mut self,
        id: ApprovalId,
        status: ApprovalStatus,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, StageGateError> {
        delegate!(self, s => s.decide_approval(id, status, comment, now))
    }

    fn add_review(
        &mut self,
        review: NewReview,
        now: DateTime<Utc>,
    ) -> Result<DepartmentReview, StageGateError> {
        delegate!(self, s => s.add_review(review, now))
    }
}

impl HistoryStore for StoreBackend {
    fn append_transition(
        &mut self,
        record: &TransitionRecord,
        now: DateTime<Utc>,
    ) -> Result<StageHistoryEntry, StageGateError> {
        delegate!(self, s => s.append_transition(record, now))
    }

    fn entries(&self, project: ProjectId) -> Result<Vec<StageHistoryEntry>, StageGateError> {
        delegate!(self, s => s.entries(project))
    }
}

// =============================================================================
// SHARED WRITE RULES
// =============================================================================

/// Apply an approver's decision to a pending request.
pub(crate) fn apply_decision(
    request: &mut ApprovalRequest,
    status: ApprovalStatus,
    comment: Option<String>,
    now: DateTime<Utc>,
) -> Result<(), StageGateError> {
    if status == ApprovalStatus::Pending {
        return Err(StageGateError::InvalidArgument(
            "a decision must approve or reject".to_string(),
        ));
    }
    if request.status != ApprovalStatus::Pending {
        return Err(StageGateError::Precondition(format!(
            "approval {} was already decided",
            request.id.0
        )));
    }
    request.status = status;
    request.decided_at = Some(now);
    request.comment = comment.filter(|c| !c.trim().is_empty());
    Ok(())
}

/// Build a pending approval request.
pub(crate) fn pending_request(
    id: ApprovalId,
    approval: NewApproval,
    now: DateTime<Utc>,
) -> ApprovalRequest {
    ApprovalRequest {
        id,
        project_id: approval.project_id,
        stage_id: approval.stage_id,
        approver_id: approval.approver_id,
        status: ApprovalStatus::Pending,
        deadline: approval.deadline,
        requested_at: now,
        decided_at: None,
        comment: None,
    }
}
