//! # Core Type Definitions
//!
//! This module contains the records the gating engine reads and writes:
//! - Identifiers (`ProjectId`, `StageId`, `UserId`, ...)
//! - The work item under gating (`Project`, `ProjectStatus`, `ProjectField`)
//! - Collaborator records (`Document`, `ApprovalRequest`, `DepartmentReview`)
//! - Error types (`StageGateError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer arithmetic only (money is stored in cents)
//! - Implement `Ord` on identifiers for deterministic ordering in `BTreeMap`
//! - Carry explicit timestamps; nothing here reads the wall clock

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Identifier of a project (the work item moving through the lifecycle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub u64);

/// Identifier of a workflow stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StageId(pub u64);

/// Identifier of a user acting on a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

/// Identifier of an attached document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub u64);

/// Identifier of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub u64);

/// Identifier of a department review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReviewId(pub u64);

/// Identifier of a stage history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub u64);

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "project#{}", self.0)
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stage#{}", self.0)
    }
}

// =============================================================================
// PROJECT
// =============================================================================

/// Lifecycle status of a project, orthogonal to its stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Active,
    OnHold,
    Completed,
    Cancelled,
}

impl ProjectStatus {
    /// Completed and cancelled projects never move again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProjectStatus::Completed | ProjectStatus::Cancelled)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::OnHold => "on_hold",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Cancelled => "cancelled",
        }
    }
}

/// Fields of a project that a stage can demand before entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectField {
    CustomerReference,
    Description,
    EstimatedValue,
    ContactEmail,
    DueDate,
}

impl ProjectField {
    /// Human-readable label used in check names and messages.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            ProjectField::CustomerReference => "Customer reference",
            ProjectField::Description => "Description",
            ProjectField::EstimatedValue => "Estimated value",
            ProjectField::ContactEmail => "Contact email",
            ProjectField::DueDate => "Due date",
        }
    }

    #[must_use]
    pub fn key(&self) -> &'static str {
        match self {
            ProjectField::CustomerReference => "customer_reference",
            ProjectField::Description => "description",
            ProjectField::EstimatedValue => "estimated_value",
            ProjectField::ContactEmail => "contact_email",
            ProjectField::DueDate => "due_date",
        }
    }
}

/// The work item being gated.
///
/// `current_stage_id` is `None` until the project's first confirmed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub customer_reference: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Estimated contract value in cents.
    #[serde(default)]
    pub estimated_value_cents: Option<i64>,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    /// Free-form attributes consulted by stage-specific rules.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub current_stage_id: Option<StageId>,
    #[serde(default)]
    pub status: ProjectStatus,
}

impl Project {
    /// Create an active project with only a name.
    #[must_use]
    pub fn new(id: ProjectId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            customer_reference: None,
            description: None,
            estimated_value_cents: None,
            contact_email: None,
            due_date: None,
            attributes: BTreeMap::new(),
            current_stage_id: None,
            status: ProjectStatus::Active,
        }
    }

    /// Whether the given field holds a usable value.
    ///
    /// Strings must be non-blank after trimming; the estimated value must be positive.
    #[must_use]
    pub fn has_field(&self, field: ProjectField) -> bool {
        fn filled(value: Option<&String>) -> bool {
            value.is_some_and(|v| !v.trim().is_empty())
        }
        match field {
            ProjectField::CustomerReference => filled(self.customer_reference.as_ref()),
            ProjectField::Description => filled(self.description.as_ref()),
            ProjectField::EstimatedValue => self.estimated_value_cents.is_some_and(|v| v > 0),
            ProjectField::ContactEmail => filled(self.contact_email.as_ref()),
            ProjectField::DueDate => self.due_date.is_some(),
        }
    }

    /// Non-blank attribute value, if any.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

// =============================================================================
// COLLABORATOR RECORDS
// =============================================================================

/// A document attached to a project, classified by category key (`rfq`, `drawing`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub project_id: ProjectId,
    pub category: String,
    pub file_name: String,
    pub uploaded_at: DateTime<Utc>,
}

/// State of an approval workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// A request for one approver to sign off a project's entry into a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub project_id: ProjectId,
    pub stage_id: StageId,
    pub approver_id: UserId,
    pub status: ApprovalStatus,
    pub deadline: Option<DateTime<Utc>>,
    pub requested_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub comment: Option<String>,
}

impl ApprovalRequest {
    /// A pending request whose deadline is already behind `now`.
    #[must_use]
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Pending && self.deadline.is_some_and(|d| d < now)
    }
}

/// A completed review by one department.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartmentReview {
    pub id: ReviewId,
    pub project_id: ProjectId,
    pub department: String,
    pub reviewer_id: UserId,
    pub completed_at: DateTime<Utc>,
    pub notes: Option<String>,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Stagegate engine.
///
/// - Category-level failures are contained by the prerequisite checker and
///   surface as verdict errors; only contract violations propagate as `Err`
/// - The engine never panics; all errors are recoverable
#[derive(Debug, Error)]
pub enum StageGateError {
    /// A prerequisite category could not be computed (upstream data unavailable).
    #[error("Validation unavailable: {0}")]
    Validation(String),

    /// Bypass requested by a caller without the bypass capability.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A precondition of the confirm step was not met (e.g. empty bypass reason).
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// A storage write failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// More than one open history entry exists for a project.
    #[error("Concurrency anomaly for {project}: {open_entries} open history entries")]
    ConcurrencyAnomaly {
        project: ProjectId,
        open_entries: usize,
    },

    /// The transition is not allowed and no bypass is available.
    #[error("Transition blocked: {}", .0.join("; "))]
    TransitionBlocked(Vec<String>),

    /// The requested project does not exist.
    #[error("Project not found: {0}")]
    ProjectNotFound(ProjectId),

    /// The requested stage does not exist.
    #[error("Stage not found: {0}")]
    StageNotFound(StageId),

    /// A required argument was missing or malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Workflow configuration failed validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

impl StageGateError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            StageGateError::Validation(_) => "VALIDATION_ERROR",
            StageGateError::PermissionDenied(_) => "PERMISSION_DENIED",
            StageGateError::Precondition(_) => "PRECONDITION_FAILED",
            StageGateError::Persistence(_) => "PERSISTENCE_ERROR",
            StageGateError::ConcurrencyAnomaly { .. } => "CONCURRENCY_ANOMALY",
            StageGateError::TransitionBlocked(_) => "TRANSITION_BLOCKED",
            StageGateError::ProjectNotFound(_) => "PROJECT_NOT_FOUND",
            StageGateError::StageNotFound(_) => "STAGE_NOT_FOUND",
            StageGateError::InvalidArgument(_) => "INVALID_ARGUMENT",
            StageGateError::Config(_) => "CONFIG_ERROR",
            StageGateError::Serialization(_) => "SERIALIZATION_ERROR",
            StageGateError::Io(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
