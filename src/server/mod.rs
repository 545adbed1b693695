//! Node Control Surface
//!
//! The HTTP face of a node: job submission and commands, the raw text work
//! protocol, file delivery between pipeline stages, and node status.
//!
//! ## Submodules
//! - **`protocol`**: the pipe-delimited work protocol (requests, sentinels)
//!   and the control-surface DTOs.
//! - **`work_server`**: the work-serving job types (`BatchWorkServer`,
//!   `FactoryWorkServer`).
//! - **`handlers`**: the axum handlers behind each route.

pub mod handlers;
pub mod protocol;
pub mod work_server;


use crate::cluster::ClusterContext;
use crate::manager::builders::JobBuilderRegistry;
use crate::manager::JobManager;
use axum::routing::{get, post};
use axum::{Extension, Router};
use std::sync::Arc;

/// The node's full route table with its shared state attached.
pub fn router(
    manager: Arc<JobManager>,
    registry: Arc<JobBuilderRegistry>,
    ctx: Arc<ClusterContext>,
) -> Router {
    Router::new()
        .route(protocol::ENDPOINT_JOB_SUBMIT, post(handlers::handle_submit_job))
        .route(protocol::ENDPOINT_JOB_COMMAND, post(handlers::handle_job_command))
        .route(protocol::ENDPOINT_WORK_REQUEST, post(handlers::handle_work_request))
        .route(protocol::ENDPOINT_DELIVER_FILE, post(handlers::handle_deliver_file))
        .route(protocol::ENDPOINT_NODE_STATUS, get(handlers::handle_node_status))
        .layer(Extension(manager))
        .layer(Extension(registry))
        .layer(Extension(ctx))
}
