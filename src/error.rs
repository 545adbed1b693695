//! Crate Error Taxonomy
//!
//! Failures are split into a small number of families with very different
//! propagation rules:
//!
//! - **Config / Restart**: fatal at construction or job start. These abort the
//!   job (or the node startup) instead of being retried.
//! - **Registration**: the job is filed as "bad" by the `JobManager` and never
//!   run, but the node keeps serving its other jobs.
//! - **Transport**: bounded retries at the call site; the remote work factory
//!   converts an exhausted retry budget into normal completion.
//!
//! Unit-of-work failures never appear here at all: they are recorded on the
//! unit itself (`WorkStatus::Failed` / `WorkStatus::Error`) and absorbed.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClusterJobError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("job registration failed: {0}")]
    Registration(String),

    #[error("restart precondition failed: {0}")]
    Restart(String),

    #[error("partition index {index} out of range for group '{group}' ({destinations} destinations)")]
    PartitionOutOfRange {
        group: String,
        index: usize,
        destinations: usize,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("job not found: {0}")]
    JobNotFound(u64),

    #[error("malformed work request: {0}")]
    MalformedRequest(String),

    #[error("work pool saturated (waited {waited_ms} ms)")]
    PoolSaturated { waited_ms: u64 },

    #[error("work pool is shut down")]
    PoolClosed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClusterJobError>;
