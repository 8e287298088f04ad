//! # stagegate-core
//!
//! The stage-transition prerequisite validation engine - THE LOGIC.
//!
//! Decides whether a project may move from its current lifecycle stage to a
//! target stage, and returns an itemized verdict: allowed, blocked, or
//! eligible for a permission-gated bypass. Confirmed transitions are
//! recorded in an append-only stage history ledger with timing metadata.
//!
//! ## Components (leaves first)
//!
//! - `registry`: ordered catalog of stages
//! - `documents`: per-stage document requirement evaluator
//! - `prerequisites`: the five-category prerequisite checker
//! - `validator`: verdicts and the confirm step
//! - `history`: stage history ledger
//!
//! ## Architectural Constraints
//!
//! - No async, no network dependencies (pure Rust)
//! - Deterministic: BTreeMap ordering, integer money, time passed in by callers
//! - Stateless gating: verdicts are recomputed on every call
//! - Storage is a collaborator behind traits (`sources`), with in-memory and
//!   redb implementations in `storage`

// =============================================================================
// MODULES
// =============================================================================

pub mod config;
pub mod documents;
pub mod engine;
pub mod history;
pub mod prerequisites;
pub mod primitives;
pub mod registry;
pub mod sources;
pub mod storage;
pub mod types;
pub mod validator;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    ApprovalId, ApprovalRequest, ApprovalStatus, DepartmentReview, Document, DocumentId, EntryId,
    Project, ProjectField, ProjectId, ProjectStatus, ReviewId, StageGateError, StageId, UserId,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use config::{PermissionTable, StageConfig, Workflow, WorkflowConfig};
pub use documents::{
    AdvanceReport, DocumentEvaluator, DocumentRequirement, DocumentSummary,
    DocumentValidationResult, InvalidRequirement, RequirementStatus, RequirementTable,
};
pub use engine::Engine;
pub use history::{StageHistoryEntry, TimelineEntry, TransitionRecord};
pub use prerequisites::{
    CheckCategory, CheckStatus, FieldTable, PrerequisiteCheck, PrerequisiteChecker,
    PrerequisiteResult, RuleBook, StageRule,
};
pub use registry::{StageRegistry, WorkflowStage};
pub use sources::{
    HistoryStore, NewApproval, NewDocument, NewReview, PermissionChecker, PermissionDecision,
    ProjectStore, StaticPermissions, WorkflowSources,
};
pub use storage::{MemoryStore, RedbStore, StoreBackend};
pub use validator::{
    ConfirmTransition, TransitionContext, TransitionPhase, TransitionReceipt,
    TransitionValidator, Verdict,
};
