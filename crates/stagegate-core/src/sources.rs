//! # Collaborator Traits
//!
//! The engine owns no data. Everything it reads or writes goes through the
//! traits in this module, so the same gating logic runs against the
//! in-memory store, the redb store, or a test double.
//!
//! All methods are fallible: a read that fails inside a prerequisite category
//! is contained by the checker, a write that fails is reported to the caller.

use crate::history::{StageHistoryEntry, TransitionRecord};
use crate::primitives::{MAX_CATEGORY_LENGTH, MAX_REASON_LENGTH};
use crate::{
    ApprovalId, ApprovalRequest, ApprovalStatus, DepartmentReview, Document, Project, ProjectId,
    StageGateError, StageId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// =============================================================================
// READ SIDE (consumed by the prerequisite checker)
// =============================================================================

/// Read access to the records prerequisite categories are computed from.
pub trait WorkflowSources {
    /// Documents attached to a project under one category key.
    fn documents(&self, project: ProjectId, category: &str)
    -> Result<Vec<Document>, StageGateError>;

    /// Approval requests for a project's entry into a stage.
    fn approvals(
        &self,
        project: ProjectId,
        stage: StageId,
    ) -> Result<Vec<ApprovalRequest>, StageGateError>;

    /// Completed department reviews for a project.
    fn reviews(&self, project: ProjectId) -> Result<Vec<DepartmentReview>, StageGateError>;
}

// =============================================================================
// PROJECT STORE (caller-side writes)
// =============================================================================

/// A new document to attach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    pub project_id: ProjectId,
    pub category: String,
    pub file_name: String,
}

/// A new approval request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewApproval {
    pub project_id: ProjectId,
    pub stage_id: StageId,
    pub approver_id: crate::UserId,
    pub deadline: Option<DateTime<Utc>>,
}

impl NewDocument {
    pub fn validate(&self) -> Result<(), StageGateError> {
        validate_key("document category", &self.category)?;
        if self.file_name.trim().is_empty() {
            return Err(StageGateError::InvalidArgument(
                "document file name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// A completed department review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReview {
    pub project_id: ProjectId,
    pub department: String,
    pub reviewer_id: crate::UserId,
    pub notes: Option<String>,
}

impl NewReview {
    pub fn validate(&self) -> Result<(), StageGateError> {
        validate_key("department", &self.department)?;
        if self
            .notes
            .as_ref()
            .is_some_and(|n| n.len() > MAX_REASON_LENGTH)
        {
            return Err(StageGateError::InvalidArgument(format!(
                "review notes exceed {} bytes",
                MAX_REASON_LENGTH
            )));
        }
        Ok(())
    }
}

fn validate_key(what: &str, value: &str) -> Result<(), StageGateError> {
    if value.trim().is_empty() {
        return Err(StageGateError::InvalidArgument(format!(
            "{} must not be empty",
            what
        )));
    }
    if value.len() > MAX_CATEGORY_LENGTH {
        return Err(StageGateError::InvalidArgument(format!(
            "{} exceeds {} bytes",
            what, MAX_CATEGORY_LENGTH
        )));
    }
    Ok(())
}

/// Project records and the writes callers make around a transition.
///
/// The engine itself only ever calls `project` and `set_current_stage`;
/// the remaining methods exist for callers (CLI, HTTP API) to feed the
/// collaborator data that prerequisite checks read.
pub trait ProjectStore {
    fn project(&self, id: ProjectId) -> Result<Option<Project>, StageGateError>;

    /// Insert or replace a project.
    fn save_project(&mut self, project: &Project) -> Result<(), StageGateError>;

    /// Apply a confirmed stage change.
    fn set_current_stage(&mut self, id: ProjectId, stage: StageId) -> Result<(), StageGateError>;

    fn attach_document(
        &mut self,
        document: NewDocument,
        now: DateTime<Utc>,
    ) -> Result<Document, StageGateError>;

    fn request_approval(
        &mut self,
        approval: NewApproval,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, StageGateError>;

    /// Record an approver's decision. Only pending requests can be decided.
    fn decide_approval(
        &mut self,
        id: ApprovalId,
        status: ApprovalStatus,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, StageGateError>;

    fn add_review(
        &mut self,
        review: NewReview,
        now: DateTime<Utc>,
    ) -> Result<DepartmentReview, StageGateError>;
}

// =============================================================================
// HISTORY STORE
// =============================================================================

/// Persistence for stage history entries.
///
/// Implementations own the at-most-one-open-entry-per-project invariant:
/// `append_transition` closes the open entry and opens the new one as one
/// unit, and must refuse to leave two open entries behind.
pub trait HistoryStore {
    fn append_transition(
        &mut self,
        record: &TransitionRecord,
        now: DateTime<Utc>,
    ) -> Result<StageHistoryEntry, StageGateError>;

    /// All entries for a project, ascending by `entered_at`.
    fn entries(&self, project: ProjectId) -> Result<Vec<StageHistoryEntry>, StageGateError>;
}

// =============================================================================
// PERMISSIONS
// =============================================================================

/// Answer of the permission subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDecision {
    pub allowed: bool,
}

/// Permission lookups for the current caller. Used only to gate bypass and
/// non-sequential moves.
pub trait PermissionChecker {
    fn check_permission(
        &self,
        resource: &str,
        action: &str,
    ) -> Result<PermissionDecision, StageGateError>;
}

/// A fixed set of `resource:action` grants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticPermissions {
    grants: BTreeSet<(String, String)>,
}

impl StaticPermissions {
    /// No grants at all.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn grant(mut self, resource: &str, action: &str) -> Self {
        self.grants
            .insert((resource.to_string(), action.to_string()));
        self
    }

    /// Parse `resource:action` strings, as written in configuration.
    pub fn from_grants<I, S>(grants: I) -> Result<Self, StageGateError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut permissions = Self::none();
        for grant in grants {
            let grant = grant.as_ref();
            let (resource, action) = grant.split_once(':').ok_or_else(|| {
                StageGateError::Config(format!(
                    "permission grant '{}' must look like resource:action",
                    grant
                ))
            })?;
            if resource.is_empty() || action.is_empty() {
                return Err(StageGateError::Config(format!(
                    "permission grant '{}' has an empty part",
                    grant
                )));
            }
            permissions = permissions.grant(resource, action);
        }
        Ok(permissions)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

impl PermissionChecker for StaticPermissions {
    fn check_permission(
        &self,
        resource: &str,
        action: &str,
    ) -> Result<PermissionDecision, StageGateError> {
        Ok(PermissionDecision {
            allowed: self
                .grants
                .contains(&(resource.to_string(), action.to_string())),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::primitives::{BYPASS_ACTION, NON_SEQUENTIAL_ACTION, TRANSITION_RESOURCE};

    #[test]
    fn static_permissions_grant_exact_pairs() {
        let permissions = StaticPermissions::none().grant(TRANSITION_RESOURCE, BYPASS_ACTION);
        assert!(
            permissions
                .check_permission(TRANSITION_RESOURCE, BYPASS_ACTION)
                .unwrap()
                .allowed
        );
        assert!(
            !permissions
                .check_permission(TRANSITION_RESOURCE, NON_SEQUENTIAL_ACTION)
                .unwrap()
                .allowed
        );
    }

    #[test]
    fn grants_parse_from_strings() {
        let permissions =
            StaticPermissions::from_grants(["stage_transition:bypass", "reports:read"]).unwrap();
        assert!(
            permissions
                .check_permission("reports", "read")
                .unwrap()
                .allowed
        );
    }

    #[test]
    fn blank_document_category_rejected() {
        let document = NewDocument {
            project_id: ProjectId(1),
            category: "  ".to_string(),
            file_name: "a.pdf".to_string(),
        };
        assert!(matches!(
            document.validate(),
            Err(StageGateError::InvalidArgument(_))
        ));
    }

    #[test]
    fn malformed_grant_rejected() {
        assert!(StaticPermissions::from_grants(["bypass"]).is_err());
        assert!(StaticPermissions::from_grants([":bypass"]).is_err());
    }
}
