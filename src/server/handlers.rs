use axum::{
    body::Bytes,
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::cluster::ClusterContext;
use crate::error::ClusterJobError;
use crate::manager::builders::JobBuilderRegistry;
use crate::manager::command::{CommandResponse, JobCommandRequest};
use crate::manager::{JobManager, RegisterOutcome};
use crate::server::protocol::{NodeStatusResponse, SubmitJobRequest, SubmitJobResponse};

pub async fn handle_submit_job(
    Extension(manager): Extension<Arc<JobManager>>,
    Extension(registry): Extension<Arc<JobBuilderRegistry>>,
    Extension(ctx): Extension<Arc<ClusterContext>>,
    Json(req): Json<SubmitJobRequest>,
) -> (StatusCode, Json<SubmitJobResponse>) {
    let job = match registry.build(&req.job_type, req.spec, ctx.clone()) {
        Ok(job) => job,
        Err(e) => {
            tracing::warn!("Job build failed for type '{}': {}", req.job_type, e);
            return (
                StatusCode::BAD_REQUEST,
                Json(SubmitJobResponse {
                    accepted: false,
                    job_id: None,
                    message: e.to_string(),
                }),
            );
        }
    };

    match manager.submit(job, ctx) {
        RegisterOutcome::Registered { job_id } => (
            StatusCode::OK,
            Json(SubmitJobResponse {
                accepted: true,
                job_id: Some(job_id),
                message: "registered".to_string(),
            }),
        ),
        RegisterOutcome::MergedWithExisting { job_id } => (
            StatusCode::OK,
            Json(SubmitJobResponse {
                accepted: true,
                job_id: Some(job_id),
                message: "merged with existing job".to_string(),
            }),
        ),
        RegisterOutcome::Rejected { reason } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(SubmitJobResponse {
                accepted: false,
                job_id: None,
                message: reason,
            }),
        ),
    }
}

pub async fn handle_job_command(
    Extension(manager): Extension<Arc<JobManager>>,
    Json(req): Json<JobCommandRequest>,
) -> (StatusCode, Json<CommandResponse>) {
    match manager.command(req.job_id, req.command).await {
        Ok(response) => (StatusCode::OK, Json(response)),
        Err(ClusterJobError::JobNotFound(id)) => (
            StatusCode::NOT_FOUND,
            Json(CommandResponse::Text(format!("job not found: {}", id))),
        ),
        Err(e) => {
            tracing::error!("Command failed: {}", e);
            (
                StatusCode::BAD_REQUEST,
                Json(CommandResponse::Text(e.to_string())),
            )
        }
    }
}

/// The raw work protocol: one text line in, one text line out.
pub async fn handle_work_request(
    Extension(manager): Extension<Arc<JobManager>>,
    Path(job_id): Path<u64>,
    body: String,
) -> (StatusCode, String) {
    match manager.operate(job_id, &body).await {
        Ok(response) => (StatusCode::OK, response),
        Err(ClusterJobError::JobNotFound(id)) => {
            (StatusCode::NOT_FOUND, format!("job not found: {}", id))
        }
        Err(ClusterJobError::MalformedRequest(line)) => (
            StatusCode::BAD_REQUEST,
            format!("malformed work request: {}", line),
        ),
        Err(e) => {
            tracing::error!("Work request to job {} failed: {}", job_id, e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeliverFileParams {
    pub dir: String,
    pub name: String,
}

pub async fn handle_deliver_file(
    Query(params): Query<DeliverFileParams>,
    body: Bytes,
) -> StatusCode {
    // The file name must be a plain name; the directory is the sender's
    // choice but the name never escapes it.
    if params.name.contains('/') || params.name.contains("..") {
        tracing::warn!("Rejecting file delivery with unsafe name: {}", params.name);
        return StatusCode::BAD_REQUEST;
    }

    let dir = std::path::PathBuf::from(&params.dir);
    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        tracing::error!("Failed to create delivery dir {}: {}", dir.display(), e);
        return StatusCode::INTERNAL_SERVER_ERROR;
    }

    let target = dir.join(&params.name);
    match tokio::fs::write(&target, &body).await {
        Ok(()) => {
            tracing::debug!("Received file {} ({} bytes)", target.display(), body.len());
            StatusCode::OK
        }
        Err(e) => {
            tracing::error!("Failed to write {}: {}", target.display(), e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub async fn handle_node_status(
    Extension(manager): Extension<Arc<JobManager>>,
) -> Json<NodeStatusResponse> {
    Json(NodeStatusResponse {
        node: manager.node_name().to_string(),
        live_jobs: manager.live_count(),
        bad_jobs: manager.bad_count(),
        finished_jobs: manager.old_count(),
        probes: manager.probe_all(),
    })
}
