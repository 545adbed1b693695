//! Job Commands
//!
//! The command vocabulary accepted by the `JobManager` on behalf of its jobs,
//! and the response envelope. Commands arrive over the node's HTTP control
//! surface and are dispatched by local job id; omitting the id addresses
//! every job on the node at once, with text answers aggregated per job.

use crate::job::JobProbeData;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum JobCommand {
    /// Forward one raw protocol line to the job's `operate` entry point.
    Operate { line: String },
    Pause,
    Resume,
    Flush,
    /// Stop, wait for the job to settle, then resume it fresh.
    Bounce,
    Interrupt,
    Status,
    Probe,
    Detail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum CommandResponse {
    /// The addressed job is already done; the command had nothing to act on.
    Done,
    Ack,
    Text(String),
    Probe(Vec<JobProbeData>),
}

/// HTTP envelope for a command: which job (if any) plus the command fields.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobCommandRequest {
    pub job_id: Option<u64>,
    #[serde(flatten)]
    pub command: JobCommand,
}
