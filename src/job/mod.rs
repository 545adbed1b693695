//! Job Lifecycle
//!
//! A `Job` is a registered, stateful unit of orchestrated work running on one
//! node. This module defines the lifecycle contract every job type shares:
//!
//! - **`status`**: the job state machine (transition table + CAS status cell).
//! - **`ids`**: per-node (`LocalJobId`) and cluster-wide (`GlobalJobId`)
//!   identity.
//! - the **`Job` trait** with default command semantics (stop → interrupted,
//!   pause → paused, resume → running, suspend → pause unless a job type
//!   supports real suspension) and the **`JobCore`** state block each concrete
//!   job embeds.
//!
//! Concrete job types (work servers, pipeline stages) live in `server/` and
//! `pipeline/`.

pub mod ids;
pub mod status;


use crate::cluster::ClusterContext;
use crate::error::Result;
use crate::job::ids::{GlobalJobId, LocalJobId};
use crate::job::status::{CancelFlag, JobStatus, JobStatusCell};
use crate::work::unit::now_ms;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// The fields persisted for every job so it can be reconstructed in another
/// process. Concrete job types flatten this into their own spec structs and
/// add their own fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub description: String,
    /// Worker threads for unit-of-work execution inside the job.
    pub thread_count: usize,
    /// Explicit local id; `None` lets the registry assign one.
    pub job_id: Option<u64>,
    /// Target every node of this named group; `None` means a single node.
    pub group: Option<String>,
    /// Pin the job to one named node even when a group is configured.
    pub single_node: Option<String>,
    pub global_id: Option<GlobalJobId>,
    pub begin_immediately: bool,
}

impl JobSpec {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            thread_count: 1,
            job_id: None,
            group: None,
            single_node: None,
            global_id: None,
            begin_immediately: true,
        }
    }
}

/// One introspection record, as gathered by a `Probe` command. Records from
/// several jobs are accumulated into one ordered list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProbeData {
    pub local_id: Option<u64>,
    pub description: String,
    pub job_type: String,
    pub status: JobStatus,
    pub remaining_estimate: Option<usize>,
    pub info: String,
}

/// Shared mutable state every concrete job embeds.
pub struct JobCore {
    spec: JobSpec,
    status: JobStatusCell,
    local_id: Mutex<Option<LocalJobId>>,
    cancel: CancelFlag,
    context: Mutex<Option<Arc<ClusterContext>>>,
    created_at_ms: u64,
}

impl JobCore {
    pub fn new(spec: JobSpec) -> Self {
        Self {
            spec,
            status: JobStatusCell::new(),
            local_id: Mutex::new(None),
            cancel: CancelFlag::new(),
            context: Mutex::new(None),
            created_at_ms: now_ms(),
        }
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    pub fn status(&self) -> JobStatus {
        self.status.get()
    }

    pub fn status_cell(&self) -> &JobStatusCell {
        &self.status
    }

    pub fn local_id(&self) -> Option<LocalJobId> {
        self.local_id.lock().expect("local id poisoned").clone()
    }

    pub fn set_local_id(&self, id: LocalJobId) {
        *self.local_id.lock().expect("local id poisoned") = Some(id);
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn context(&self) -> Option<Arc<ClusterContext>> {
        self.context.lock().expect("context poisoned").clone()
    }

    pub fn bind_context(&self, ctx: Arc<ClusterContext>) {
        *self.context.lock().expect("context poisoned") = Some(ctx);
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }
}

/// The job lifecycle contract.
///
/// Default methods implement the generic state machine; concrete types
/// provide `operate` (the per-message entry point) and usually `run` (the
/// body of the job's own logical thread) plus the start hook.
#[async_trait]
pub trait Job: Send + Sync {
    fn core(&self) -> &JobCore;

    fn job_type(&self) -> &'static str;

    /// Handles one received protocol line and produces the response.
    async fn operate(&self, line: &str) -> Result<String>;

    /// Start hook. Signalling failure here parks the job as `Paused`
    /// instead of letting it run.
    async fn on_start(&self) -> Result<()> {
        Ok(())
    }

    /// The body of the job's logical thread. Request-driven jobs idle here.
    async fn run(&self) -> Result<()> {
        Ok(())
    }

    /// Completion hook, invoked exactly once on entering `Finished`.
    async fn on_finished(&self) {}

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Gate checked before a submitted job is registered at all.
    fn can_handle(&self) -> bool {
        true
    }

    fn description(&self) -> String {
        self.core().spec().description.clone()
    }

    fn remaining_estimate(&self) -> Option<usize> {
        None
    }

    fn detail(&self) -> String {
        format!(
            "{} '{}' status={} remaining={:?}",
            self.job_type(),
            self.description(),
            self.core().status(),
            self.remaining_estimate()
        )
    }

    fn probe(&self) -> JobProbeData {
        JobProbeData {
            local_id: self.core().local_id().map(|id| id.id),
            description: self.description(),
            job_type: self.job_type().to_string(),
            status: self.core().status(),
            remaining_estimate: self.remaining_estimate(),
            info: self.detail(),
        }
    }

    /// Table-checked status write; fires the completion hook the first time
    /// the job enters `Finished`.
    async fn set_status(&self, to: JobStatus) -> bool {
        let changed = self.core().status_cell().apply(to);
        if self.core().status_cell().take_finished_latch() {
            tracing::info!("Job '{}' finished", self.description());
            self.on_finished().await;
        }
        changed
    }

    /// Runs the start hook and moves the job into its initial state.
    /// Returns whether the job is actually allowed to proceed.
    async fn initialize(&self, start_immediately: bool) -> bool {
        match self.on_start().await {
            Ok(()) => {
                self.set_status(JobStatus::Initialized).await;
                if start_immediately {
                    self.set_status(JobStatus::Running).await;
                }
                true
            }
            Err(e) => {
                tracing::warn!(
                    "Start hook failed for job '{}', parking it: {}",
                    self.description(),
                    e
                );
                self.set_status(JobStatus::Paused).await;
                false
            }
        }
    }

    async fn stop(&self) {
        self.core().cancel_flag().set();
        self.set_status(JobStatus::Interrupted).await;
    }

    async fn pause(&self) {
        self.set_status(JobStatus::Paused).await;
    }

    async fn resume(&self) {
        self.core().cancel_flag().clear();
        self.set_status(JobStatus::Running).await;
    }

    /// Suspension is only meaningful for specialized job types; the default
    /// falls back to a plain pause.
    async fn suspend(&self) {
        self.pause().await;
    }

    async fn shutdown(&self) {
        self.set_status(JobStatus::Finished).await;
    }
}
