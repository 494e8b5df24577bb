//! REST API handlers for job lifecycle and maintenance.
//!
//! Everything that touches placement or the job↔server association goes
//! through the `JobOrchestrator`, never straight to the store.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, info, warn};

use scribegrid_scheduler::{JobSpec, SchedulerError};
use scribegrid_state::JobPatch;

use crate::ApiState;
use crate::handlers::{ApiResponse, error_response};

/// Map a scheduler error onto a status code.
///
/// `UserLink` is a partial success: the placed job is returned alongside
/// the error so the client can retry the link alone.
fn scheduler_error(e: SchedulerError) -> Response {
    let status = match &e {
        SchedulerError::Validation(_) => StatusCode::BAD_REQUEST,
        SchedulerError::NotFound(_) => StatusCode::NOT_FOUND,
        SchedulerError::Conflict(_) => StatusCode::CONFLICT,
        SchedulerError::NoCandidates => StatusCode::SERVICE_UNAVAILABLE,
        SchedulerError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        SchedulerError::UserLink { job, .. } => {
            warn!(job_id = %job.id, error = %e, "returning partially linked job");
            let msg = e.to_string();
            return (StatusCode::BAD_GATEWAY, ApiResponse::failed_with(job.as_ref(), &msg))
                .into_response();
        }
        SchedulerError::Assignment(_) | SchedulerError::Persistence(_) => {
            error!(error = %e, "scheduler operation failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(&e.to_string(), status).into_response()
}

/// GET /api/v1/users/{id}/jobs
pub async fn list_user_jobs(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.list_user_jobs(&id).await {
        Ok(jobs) => ApiResponse::ok(jobs).into_response(),
        Err(e) => scheduler_error(e),
    }
}

/// POST /api/v1/users/{id}/jobs
pub async fn submit_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(spec): Json<JobSpec>,
) -> impl IntoResponse {
    match state.orchestrator.submit_job(&id, spec).await {
        Ok(job) => (StatusCode::CREATED, ApiResponse::ok(job)).into_response(),
        Err(e) => scheduler_error(e),
    }
}

/// DELETE /api/v1/users/{id}/jobs/{job_id}
pub async fn delete_user_job(
    State(state): State<ApiState>,
    Path((id, job_id)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.orchestrator.delete_user_job(&id, &job_id).await {
        Ok(()) => ApiResponse::ok("deleted").into_response(),
        Err(e) => scheduler_error(e),
    }
}

/// POST /api/v1/users/{id}/jobs/{job_id}/link
pub async fn link_user_job(
    State(state): State<ApiState>,
    Path((id, job_id)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.orchestrator.link_user_job(&id, &job_id).await {
        Ok(job) => ApiResponse::ok(job).into_response(),
        Err(e) => scheduler_error(e),
    }
}

/// POST /api/v1/servers/{id}/jobs/{job_id}
pub async fn attach_job(
    State(state): State<ApiState>,
    Path((id, job_id)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.orchestrator.attach_job(&id, &job_id).await {
        Ok(assignment) => {
            info!(%job_id, server_id = %id, "job attached");
            ApiResponse::ok(assignment).into_response()
        }
        Err(e) => scheduler_error(e),
    }
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.orchestrator.stores().get_job(&id).await {
        Ok(Some(job)) => ApiResponse::ok(job).into_response(),
        Ok(None) => error_response("job not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => scheduler_error(e),
    }
}

/// PATCH /api/v1/jobs/{id}
pub async fn patch_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(patch): Json<JobPatch>,
) -> impl IntoResponse {
    match state.orchestrator.update_job(&id, patch).await {
        Ok(job) => ApiResponse::ok(job).into_response(),
        Err(e) => scheduler_error(e),
    }
}

/// POST /api/v1/maintenance/sweep
pub async fn run_sweep(State(state): State<ApiState>) -> impl IntoResponse {
    match state.orchestrator.sweeper().sweep().await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => scheduler_error(e),
    }
}

/// POST /api/v1/maintenance/reconcile
pub async fn run_reconcile(State(state): State<ApiState>) -> impl IntoResponse {
    match state.reconciler.reconcile().await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => scheduler_error(e),
    }
}
