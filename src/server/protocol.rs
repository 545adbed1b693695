//! Work Protocol Definitions
//!
//! The text protocol spoken to work-serving jobs plus the HTTP DTOs for the
//! node's control surface (job submission, job commands, node status).
//!
//! A work request is one pipe-delimited line:
//! - `get|requestingJobId|requestingNodeId` — ask for the next work string;
//! - `add|workString` — splice a work string into the server's batch
//!   (the work string may itself contain pipes, so only the first pipe
//!   splits);
//! - `report` — human-readable server state.
//!
//! A `get` answers with the work string itself or one of the two sentinels.

use crate::error::{ClusterJobError, Result};
use crate::job::JobProbeData;
use serde::{Deserialize, Serialize};

/// Sentinel response: the server will never produce more work.
pub const WORK_IS_DONE: &str = "*** DONE ***";
/// Sentinel response: work remains but none is available to this requester
/// right now.
pub const WORK_IS_WAITING: &str = "*** WAITING ***";

pub const ENDPOINT_JOB_SUBMIT: &str = "/job/submit";
pub const ENDPOINT_JOB_COMMAND: &str = "/job/command";
pub const ENDPOINT_WORK_REQUEST: &str = "/work/request/:job_id";
pub const ENDPOINT_DELIVER_FILE: &str = "/internal/deliver_file";
pub const ENDPOINT_NODE_STATUS: &str = "/status";

/// A parsed work-protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkRequest {
    Get {
        requesting_job_id: u64,
        requesting_node: String,
    },
    Add {
        work: String,
    },
    Report,
}

impl WorkRequest {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut parts = line.splitn(2, '|');
        let verb = parts.next().unwrap_or_default();

        match verb {
            "get" => {
                let rest = parts
                    .next()
                    .ok_or_else(|| ClusterJobError::MalformedRequest(line.to_string()))?;
                let mut fields = rest.splitn(2, '|');
                let job_id = fields
                    .next()
                    .and_then(|f| f.parse::<u64>().ok())
                    .ok_or_else(|| ClusterJobError::MalformedRequest(line.to_string()))?;
                let node = fields
                    .next()
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| ClusterJobError::MalformedRequest(line.to_string()))?;
                Ok(WorkRequest::Get {
                    requesting_job_id: job_id,
                    requesting_node: node.to_string(),
                })
            }
            "add" => {
                let work = parts
                    .next()
                    .filter(|w| !w.is_empty())
                    .ok_or_else(|| ClusterJobError::MalformedRequest(line.to_string()))?;
                Ok(WorkRequest::Add {
                    work: work.to_string(),
                })
            }
            "report" => Ok(WorkRequest::Report),
            _ => Err(ClusterJobError::MalformedRequest(line.to_string())),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    /// Registered builder name, e.g. `"batch_work_server"`.
    pub job_type: String,
    /// Builder-specific spec, deserialized by the builder itself.
    pub spec: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub accepted: bool,
    pub job_id: Option<u64>,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeStatusResponse {
    pub node: String,
    pub live_jobs: usize,
    pub bad_jobs: usize,
    pub finished_jobs: usize,
    pub probes: Vec<JobProbeData>,
}
