//! Health and deletion job administration endpoints.

use crate::deletion::{BacklogStats, backlog_stats, trigger_deletion_job};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use pacs_core::{DeletionCheckpoint, DeletionJobId, DeletionStats};
use pacs_metadata::{MetadataError, MetadataStore};
use pacs_metadata::models::DeletionJobRow;
use pacs_metadata::repos::DeletionJobRepo;
use pacs_storage::ObjectStore;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub storage_backend: &'static str,
}

/// GET /v1/health - Health check.
///
/// Unauthenticated so load balancers and probes can reach it. Reports only
/// status, version, and backend kind.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.metadata.health_check().await?;
    state.storage.health_check().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        storage_backend: state.storage.backend_name(),
    }))
}

/// Trigger deletion job response.
#[derive(Debug, Serialize)]
pub struct TriggerDeletionJobResponse {
    pub job_id: String,
}

/// POST /v1/admin/deletion/jobs - Start a cleanup job.
pub async fn trigger_deletion(
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<TriggerDeletionJobResponse>)> {
    let job_id = match trigger_deletion_job(&state).await {
        Ok(job_id) => job_id,
        Err(MetadataError::Constraint(_)) => {
            return Err(ApiError::Conflict(
                "a deletion job is already active; wait for it to complete".to_string(),
            ));
        }
        Err(e) => return Err(e.into()),
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerDeletionJobResponse {
            job_id: job_id.to_string(),
        }),
    ))
}

/// Deletion job status response.
#[derive(Debug, Serialize)]
pub struct DeletionJobResponse {
    pub job_id: String,
    pub job_type: String,
    pub state: String,
    pub created_at: String,
    pub updated_at: String,
    pub finished_at: Option<String>,
    pub checkpoint: Option<DeletionCheckpoint>,
    pub stats: Option<DeletionStats>,
}

fn format_time(t: OffsetDateTime, field: &str) -> ApiResult<String> {
    t.format(&Rfc3339)
        .map_err(|e| ApiError::Internal(format!("failed to format {field}: {e}")))
}

fn job_row_to_response(job: DeletionJobRow) -> ApiResult<DeletionJobResponse> {
    let checkpoint = job
        .checkpoint_json
        .as_deref()
        .and_then(|json| match DeletionCheckpoint::from_json(json) {
            Ok(checkpoint) => Some(checkpoint),
            Err(e) => {
                tracing::warn!(job_id = %job.job_id, error = %e, "Unreadable job checkpoint");
                None
            }
        });
    let stats: Option<DeletionStats> = job
        .stats_json
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok());

    Ok(DeletionJobResponse {
        job_id: job.job_id.to_string(),
        created_at: format_time(job.created_at, "created_at")?,
        updated_at: format_time(job.updated_at, "updated_at")?,
        finished_at: job
            .finished_at
            .map(|t| format_time(t, "finished_at"))
            .transpose()?,
        job_type: job.job_type,
        state: job.state,
        checkpoint,
        stats,
    })
}

/// Query parameters for listing deletion jobs.
#[derive(Debug, Deserialize)]
pub struct ListDeletionJobsParams {
    /// Maximum number of jobs to return (default: 20, max: 100).
    pub limit: Option<u32>,
}

/// GET /v1/admin/deletion/jobs - List recent deletion jobs.
pub async fn list_deletion_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListDeletionJobsParams>,
) -> ApiResult<Json<Vec<DeletionJobResponse>>> {
    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    let jobs = state.metadata.get_recent_deletion_jobs(limit).await?;

    let responses = jobs
        .into_iter()
        .map(job_row_to_response)
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(responses))
}

/// GET /v1/admin/deletion/jobs/{job_id} - Get deletion job status.
pub async fn get_deletion_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<DeletionJobResponse>> {
    let job_id = DeletionJobId::parse(&job_id)
        .map_err(|e| ApiError::BadRequest(format!("invalid job ID: {e}")))?;

    let job = state
        .metadata
        .get_deletion_job(*job_id.as_uuid())
        .await?
        .ok_or_else(|| ApiError::NotFound("deletion job not found".to_string()))?;

    Ok(Json(job_row_to_response(job)?))
}

/// GET /v1/admin/deletion/stats - Purge backlog health.
pub async fn get_deletion_stats(State(state): State<AppState>) -> ApiResult<Json<BacklogStats>> {
    let stats = backlog_stats(
        state.metadata.as_ref(),
        state.config.deletion.max_delete_retries,
    )
    .await?;
    Ok(Json(stats))
}
