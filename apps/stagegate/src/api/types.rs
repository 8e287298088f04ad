//! # API Request/Response Types
//!
//! This module defines the JSON structures for the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stagegate_core::{
    ApprovalId, ApprovalStatus, ConfirmTransition, NewApproval, NewDocument, NewReview, Project,
    ProjectId, StageGateError, StageHistoryEntry, StageId, TimelineEntry, UserId, WorkflowStage,
    primitives::MAX_REASON_LENGTH,
};
use std::collections::BTreeMap;

/// Maximum project name length in bytes.
const MAX_NAME_LENGTH: usize = 256;

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// ERROR RESPONSE
// =============================================================================

/// Body of every non-2xx response produced by a handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine code, see `StageGateError::code`.
    pub code: String,
    pub error: String,
    /// Itemized blockers when a transition was refused.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl From<&StageGateError> for ErrorResponse {
    fn from(e: &StageGateError) -> Self {
        let errors = match e {
            StageGateError::TransitionBlocked(errors) => errors.clone(),
            _ => Vec::new(),
        };
        Self {
            code: e.code().to_string(),
            error: e.to_string(),
            errors,
        }
    }
}

// =============================================================================
// STAGES
// =============================================================================

/// Ordered stage catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagesResponse {
    pub stages: Vec<WorkflowStage>,
}

// =============================================================================
// PROJECTS
// =============================================================================

/// Register a new project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProjectRequest {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub customer_reference: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub estimated_value_cents: Option<i64>,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl CreateProjectRequest {
    /// Convert to a [`Project`], validating sizes at the boundary.
    pub fn to_project(&self) -> Result<Project, StageGateError> {
        if self.name.len() > MAX_NAME_LENGTH {
            return Err(StageGateError::InvalidArgument(format!(
                "Project name length {} exceeds maximum {} bytes",
                self.name.len(),
                MAX_NAME_LENGTH
            )));
        }
        let text_fields = [
            &self.customer_reference,
            &self.description,
            &self.contact_email,
        ];
        let too_long = text_fields
            .iter()
            .filter_map(|f| f.as_deref())
            .chain(self.attributes.values().map(String::as_str))
            .any(|v| v.len() > MAX_REASON_LENGTH);
        if too_long {
            return Err(StageGateError::InvalidArgument(format!(
                "Project fields must not exceed {} bytes",
                MAX_REASON_LENGTH
            )));
        }

        let mut project = Project::new(ProjectId(self.id), self.name.clone());
        project.customer_reference = self.customer_reference.clone();
        project.description = self.description.clone();
        project.estimated_value_cents = self.estimated_value_cents;
        project.contact_email = self.contact_email.clone();
        project.due_date = self.due_date;
        project.attributes = self.attributes.clone();
        Ok(project)
    }
}

// =============================================================================
// CALLER-SIDE WRITES
// =============================================================================

/// Attach a document to a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachDocumentRequest {
    pub category: String,
    pub file_name: String,
}

impl AttachDocumentRequest {
    #[must_use]
    pub fn into_new(self, project: ProjectId) -> NewDocument {
        NewDocument {
            project_id: project,
            category: self.category,
            file_name: self.file_name,
        }
    }
}

/// Ask an approver to sign off entry into a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestApprovalRequest {
    pub stage_id: u64,
    pub approver_id: u64,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

impl RequestApprovalRequest {
    #[must_use]
    pub fn into_new(self, project: ProjectId) -> NewApproval {
        NewApproval {
            project_id: project,
            stage_id: StageId(self.stage_id),
            approver_id: UserId(self.approver_id),
            deadline: self.deadline,
        }
    }
}

/// Record an approver's decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecideApprovalRequest {
    pub approval_id: u64,
    pub status: ApprovalStatus,
    #[serde(default)]
    pub comment: Option<String>,
}

impl DecideApprovalRequest {
    pub fn validate(&self) -> Result<ApprovalId, StageGateError> {
        if self.status == ApprovalStatus::Pending {
            return Err(StageGateError::InvalidArgument(
                "a decision must be approved or rejected".to_string(),
            ));
        }
        if self.comment.as_ref().is_some_and(|c| c.len() > MAX_REASON_LENGTH) {
            return Err(StageGateError::InvalidArgument(format!(
                "comment exceeds {} bytes",
                MAX_REASON_LENGTH
            )));
        }
        Ok(ApprovalId(self.approval_id))
    }
}

/// Record a completed department review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddReviewRequest {
    pub department: String,
    pub reviewer_id: u64,
    #[serde(default)]
    pub notes: Option<String>,
}

impl AddReviewRequest {
    #[must_use]
    pub fn into_new(self, project: ProjectId) -> NewReview {
        NewReview {
            project_id: project,
            department: self.department,
            reviewer_id: UserId(self.reviewer_id),
            notes: self.notes,
        }
    }
}

// =============================================================================
// TRANSITIONS
// =============================================================================

/// Evaluate a transition without committing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateTransitionRequest {
    pub project_id: u64,
    pub target_stage_id: u64,
}

/// Commit a transition. The acting user comes from the request header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmTransitionRequest {
    pub project_id: u64,
    pub target_stage_id: u64,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub bypass_reason: Option<String>,
}

impl ConfirmTransitionRequest {
    /// Check free text before it reaches the engine.
    ///
    /// A bypass reason that is present must carry text; the engine checks
    /// again once it knows whether a bypass is actually needed.
    pub fn to_confirm(&self, user: UserId) -> Result<ConfirmTransition, StageGateError> {
        if let Some(bypass) = &self.bypass_reason
            && bypass.trim().is_empty()
        {
            return Err(StageGateError::Precondition(
                "bypass reason must not be blank".to_string(),
            ));
        }
        for text in [&self.reason, &self.bypass_reason].into_iter().flatten() {
            if text.len() > MAX_REASON_LENGTH {
                return Err(StageGateError::InvalidArgument(format!(
                    "reason length {} exceeds maximum {} bytes",
                    text.len(),
                    MAX_REASON_LENGTH
                )));
            }
        }
        Ok(ConfirmTransition {
            project_id: ProjectId(self.project_id),
            target_stage_id: StageId(self.target_stage_id),
            user_id: user,
            reason: self.reason.clone(),
            bypass_reason: self.bypass_reason.clone(),
        })
    }
}

// =============================================================================
// HISTORY
// =============================================================================

/// Ledger entries of one project plus derived timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub project_id: ProjectId,
    pub entries: Vec<StageHistoryEntry>,
    pub timeline: Vec<TimelineEntry>,
    pub days_in_current_stage: Option<i64>,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn confirm(bypass: Option<&str>) -> ConfirmTransitionRequest {
        ConfirmTransitionRequest {
            project_id: 1,
            target_stage_id: 2,
            reason: None,
            bypass_reason: bypass.map(str::to_string),
        }
    }

    #[test]
    fn blank_bypass_reason_rejected_at_boundary() {
        assert!(matches!(
            confirm(Some("  ")).to_confirm(UserId(1)),
            Err(StageGateError::Precondition(_))
        ));
        let ok = confirm(Some("customer escalation"))
            .to_confirm(UserId(1))
            .unwrap();
        assert_eq!(ok.user_id, UserId(1));
        assert!(confirm(None).to_confirm(UserId(1)).is_ok());
    }

    #[test]
    fn oversized_reason_rejected() {
        let long = "x".repeat(MAX_REASON_LENGTH + 1);
        assert!(matches!(
            confirm(Some(&long)).to_confirm(UserId(1)),
            Err(StageGateError::InvalidArgument(_))
        ));
    }

    #[test]
    fn pending_is_not_a_decision() {
        let request = DecideApprovalRequest {
            approval_id: 3,
            status: ApprovalStatus::Pending,
            comment: None,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn blocked_error_carries_items() {
        let e = StageGateError::TransitionBlocked(vec!["a".to_string(), "b".to_string()]);
        let body = ErrorResponse::from(&e);
        assert_eq!(body.code, "TRANSITION_BLOCKED");
        assert_eq!(body.errors.len(), 2);
    }
}
