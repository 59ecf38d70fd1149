use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{rate_limit_headers, ApiError};
use crate::models::verification::{
    DeleteScanResponse, JobStatusResponse, OwnerQuery, SubmitScanRequest, SubmitScanResponse,
    VisibilityRequest, VisibilityResponse,
};

fn job_id(path: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, ApiError> {
    path.map(|Path(id)| id).map_err(|_| ApiError::InvalidJobId)
}

/// POST /verify: accept a photo for background verification.
pub async fn submit_scan(
    State(state): State<AppState>,
    payload: Result<Json<SubmitScanRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::MalformedBody(e.body_text()))?;
    let receipt = state.orchestrator.submit(request).await?;

    Ok((
        StatusCode::ACCEPTED,
        rate_limit_headers(&receipt.rate),
        Json(SubmitScanResponse {
            job_id: receipt.job_id,
            state: receipt.state,
        }),
    ))
}

/// GET /verify/status/{job_id}: current state and, once terminal, the outcome.
pub async fn get_scan_status(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state.orchestrator.get_status(job_id(path)?).await?;
    Ok(Json(JobStatusResponse::from(job)))
}

/// DELETE /verify/{job_id}?actorId=: owner removes a scan and its points.
pub async fn delete_scan(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<OwnerQuery>, QueryRejection>,
) -> Result<Json<DeleteScanResponse>, ApiError> {
    let id = job_id(path)?;
    let actor_id = query.ok().and_then(|Query(q)| q.actor_id);
    let total_score = state.orchestrator.delete(id, actor_id).await?;

    Ok(Json(DeleteScanResponse {
        success: true,
        total_score,
    }))
}

/// PATCH /verify/{job_id}: owner toggles public visibility.
pub async fn update_visibility(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<VisibilityRequest>, JsonRejection>,
) -> Result<Json<VisibilityResponse>, ApiError> {
    let id = job_id(path)?;
    let Json(request) = payload.map_err(|e| ApiError::MalformedBody(e.body_text()))?;
    let is_public = state
        .orchestrator
        .set_visibility(id, request.actor_id, request.is_public)
        .await?;

    Ok(Json(VisibilityResponse {
        success: true,
        is_public,
    }))
}
