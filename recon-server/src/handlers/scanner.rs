//! Control-surface handlers: start, query, and lifecycle requests.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use recon_core::StartScanRequest;
use recon_model::{ProjectId, ScanId, ScanJob, ScanStats, ScanStatus};

use crate::errors::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StartScanBody {
    pub project_id: Option<ProjectId>,
    pub project_name: Option<String>,
    pub target_domain: String,
    pub scan_type: String,
}

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    pub project_id: Option<ProjectId>,
}

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub message: String,
    pub status: ScanStatus,
}

#[derive(Debug, Serialize)]
pub struct JobDetails {
    #[serde(flatten)]
    pub job: ScanJob,
    /// Most recent live stats snapshot, when the pipeline has emitted one.
    pub live: Option<ScanStats>,
}

pub async fn start_scan(
    State(state): State<AppState>,
    Json(body): Json<StartScanBody>,
) -> Result<impl IntoResponse, AppError> {
    let job = state
        .service()
        .start_scan(StartScanRequest {
            project_id: body.project_id,
            project_name: body.project_name,
            target_domain: body.target_domain,
            scan_type: body.scan_type,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobsQuery>,
) -> Json<Vec<ScanJob>> {
    Json(state.service().list(query.project_id).await)
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(scan_id): Path<Uuid>,
) -> Result<Json<ScanJob>, AppError> {
    let job = state.service().get(&ScanId(scan_id)).await?;
    Ok(Json(job))
}

pub async fn job_details(
    State(state): State<AppState>,
    Path(scan_id): Path<Uuid>,
) -> Result<Json<JobDetails>, AppError> {
    let (job, live) = state.service().details(&ScanId(scan_id)).await?;
    Ok(Json(JobDetails { job, live }))
}

pub async fn pause_job(
    State(state): State<AppState>,
    Path(scan_id): Path<Uuid>,
) -> Result<Json<ControlResponse>, AppError> {
    let job = state.service().pause(&ScanId(scan_id)).await?;
    Ok(Json(ControlResponse {
        message: "Scan paused".into(),
        status: job.status,
    }))
}

pub async fn resume_job(
    State(state): State<AppState>,
    Path(scan_id): Path<Uuid>,
) -> Result<Json<ControlResponse>, AppError> {
    let job = state.service().resume(&ScanId(scan_id)).await?;
    Ok(Json(ControlResponse {
        message: "Scan resumed".into(),
        status: job.status,
    }))
}

pub async fn stop_job(
    State(state): State<AppState>,
    Path(scan_id): Path<Uuid>,
) -> Result<Json<ControlResponse>, AppError> {
    let job = state.service().stop(&ScanId(scan_id)).await?;
    Ok(Json(ControlResponse {
        message: "Scan stopped. Partial results saved.".into(),
        status: job.status,
    }))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(scan_id): Path<Uuid>,
) -> Result<Json<ControlResponse>, AppError> {
    let job = state.service().cancel(&ScanId(scan_id)).await?;
    Ok(Json(ControlResponse {
        message: "Scan cancelled".into(),
        status: job.status,
    }))
}
