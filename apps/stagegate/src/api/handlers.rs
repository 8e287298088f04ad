//! # API Endpoint Handlers
//!
//! Each handler takes the engine lock, reads the wall clock once, and maps
//! the engine's result onto a status code and a JSON body.

use super::{
    AppState,
    auth::acting_user,
    types::{
        AddReviewRequest, AttachDocumentRequest, ConfirmTransitionRequest, CreateProjectRequest,
        DecideApprovalRequest, ErrorResponse, HealthResponse, HistoryResponse,
        RequestApprovalRequest, StagesResponse, ValidateTransitionRequest,
    },
};
use crate::config::resolve_stage;
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use stagegate_core::{
    AdvanceReport, ApprovalRequest, DepartmentReview, Document, Project, ProjectId,
    StageGateError, StageId, TransitionReceipt, Verdict, history,
};

// =============================================================================
// ERROR MAPPING
// =============================================================================

/// An engine error on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub StageGateError);

impl From<StageGateError> for ApiError {
    fn from(e: StageGateError) -> Self {
        Self(e)
    }
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            StageGateError::ProjectNotFound(_) | StageGateError::StageNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            StageGateError::InvalidArgument(_) | StageGateError::Serialization(_) => {
                StatusCode::BAD_REQUEST
            }
            StageGateError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            StageGateError::Precondition(_) => StatusCode::UNPROCESSABLE_ENTITY,
            StageGateError::TransitionBlocked(_) => StatusCode::CONFLICT,
            StageGateError::Validation(_)
            | StageGateError::Persistence(_)
            | StageGateError::ConcurrencyAnomaly { .. }
            | StageGateError::Config(_)
            | StageGateError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.0.code(), "{}", self.0);
        } else {
            tracing::debug!(code = self.0.code(), status = status.as_u16(), "{}", self.0);
        }
        (status, Json(ErrorResponse::from(&self.0))).into_response()
    }
}

type ApiResult<T> = Result<(StatusCode, Json<T>), ApiError>;

// =============================================================================
// HEALTH & CATALOG
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

/// Ordered stage catalog.
pub async fn stages_handler(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.engine.read().await;
    let stages = engine.workflow().registry.stages().cloned().collect();
    (StatusCode::OK, Json(StagesResponse { stages }))
}

// =============================================================================
// PROJECTS
// =============================================================================

pub async fn create_project_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateProjectRequest>,
) -> ApiResult<Project> {
    let project = request.to_project()?;
    let mut engine = state.engine.write().await;
    let created = engine.create_project(project)?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_project_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Project> {
    let engine = state.engine.read().await;
    Ok((StatusCode::OK, Json(engine.project(ProjectId(id))?)))
}

// =============================================================================
// CALLER-SIDE WRITES
// =============================================================================

pub async fn attach_document_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<AttachDocumentRequest>,
) -> ApiResult<Document> {
    let mut engine = state.engine.write().await;
    let document = engine.attach_document(request.into_new(ProjectId(id)), Utc::now())?;
    Ok((StatusCode::CREATED, Json(document)))
}

pub async fn request_approval_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<RequestApprovalRequest>,
) -> ApiResult<ApprovalRequest> {
    let mut engine = state.engine.write().await;
    let approval = engine.request_approval(request.into_new(ProjectId(id)), Utc::now())?;
    Ok((StatusCode::CREATED, Json(approval)))
}

pub async fn decide_approval_handler(
    State(state): State<AppState>,
    Json(request): Json<DecideApprovalRequest>,
) -> ApiResult<ApprovalRequest> {
    let id = request.validate()?;
    let mut engine = state.engine.write().await;
    let decided = engine.decide_approval(id, request.status, request.comment, Utc::now())?;
    Ok((StatusCode::OK, Json(decided)))
}

pub async fn add_review_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<AddReviewRequest>,
) -> ApiResult<DepartmentReview> {
    let mut engine = state.engine.write().await;
    let review = engine.add_review(request.into_new(ProjectId(id)), Utc::now())?;
    Ok((StatusCode::CREATED, Json(review)))
}

// =============================================================================
// TRANSITIONS
// =============================================================================

/// Evaluate a transition. Never writes.
pub async fn validate_transition_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ValidateTransitionRequest>,
) -> ApiResult<Verdict> {
    let permissions = state.permissions_for(acting_user(&headers)?);
    let engine = state.engine.read().await;
    let verdict = engine.validate_transition(
        ProjectId(request.project_id),
        StageId(request.target_stage_id),
        &permissions,
        Utc::now(),
    )?;
    Ok((StatusCode::OK, Json(verdict)))
}

/// Commit a transition as the user named in `X-Stagegate-User`.
pub async fn confirm_transition_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ConfirmTransitionRequest>,
) -> ApiResult<TransitionReceipt> {
    let user = acting_user(&headers)?.ok_or_else(|| {
        StageGateError::InvalidArgument(
            "X-Stagegate-User is required to confirm a transition".to_string(),
        )
    })?;
    let confirm = request.to_confirm(user)?;
    let permissions = state.permissions_for(Some(user));

    let mut engine = state.engine.write().await;
    let receipt = engine.confirm_transition(&confirm, &permissions, Utc::now())?;
    Ok((StatusCode::OK, Json(receipt)))
}

/// Document-only readiness; `stage` is a slug or a numeric id.
pub async fn can_advance_handler(
    State(state): State<AppState>,
    Path((id, stage)): Path<(u64, String)>,
) -> ApiResult<AdvanceReport> {
    let engine = state.engine.read().await;
    let stage = resolve_stage(engine.workflow(), &stage)?;
    let report = engine.can_advance_to_stage(ProjectId(id), stage)?;
    Ok((StatusCode::OK, Json(report)))
}

pub async fn history_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<HistoryResponse> {
    let now = Utc::now();
    let engine = state.engine.read().await;
    let project = engine.project(ProjectId(id))?;
    let entries = engine.get_history(project.id)?;

    Ok((
        StatusCode::OK,
        Json(HistoryResponse {
            project_id: project.id,
            timeline: history::stage_timeline(&entries, now),
            days_in_current_stage: history::days_in_current_stage(&entries, now),
            entries,
        }),
    ))
}
