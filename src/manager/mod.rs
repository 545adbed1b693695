//! Per-Node Job Registry
//!
//! One `JobManager` runs on every node. It owns the node's live jobs keyed by
//! local id, enforces the registration rules (capability gate, global-id
//! resolution, duplicate-description merging), drives each job's lifecycle on
//! its own tokio task, and dispatches commands.
//!
//! Jobs that fail registration are filed as *bad* and never run, but the node
//! keeps serving everything else. Finished jobs are retired into a bounded
//! history so probes can still report on recently completed work.

pub mod builders;
pub mod command;


use crate::error::{ClusterJobError, Result};
use crate::job::ids::LocalJobId;
use crate::job::status::JobStatus;
use crate::job::{Job, JobProbeData};
use crate::manager::command::{CommandResponse, JobCommand};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Retired-job history kept per node.
const MAX_OLD_JOBS: usize = 64;
/// How long `Bounce` waits for a stopped job's task to settle.
const BOUNCE_SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RegisterOutcome {
    Registered { job_id: u64 },
    /// A live job with the same description already exists; the submission
    /// was folded into it.
    MergedWithExisting { job_id: u64 },
    Rejected { reason: String },
}

pub struct JobManager {
    node_name: String,
    jobs: DashMap<u64, Arc<dyn Job>>,
    /// Description -> local id, the duplicate-submission index.
    descriptions: DashMap<String, u64>,
    /// Description -> rejection reason.
    bad_jobs: DashMap<String, String>,
    old_jobs: Mutex<VecDeque<JobProbeData>>,
    next_local_id: AtomicU64,
    run_handles: DashMap<u64, tokio::task::JoinHandle<()>>,
}

impl JobManager {
    pub fn new(node_name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            node_name: node_name.into(),
            jobs: DashMap::new(),
            descriptions: DashMap::new(),
            bad_jobs: DashMap::new(),
            old_jobs: Mutex::new(VecDeque::new()),
            next_local_id: AtomicU64::new(1),
            run_handles: DashMap::new(),
        })
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    fn allocate_id(&self) -> u64 {
        loop {
            let id = self.next_local_id.fetch_add(1, Ordering::SeqCst);
            if !self.jobs.contains_key(&id) {
                return id;
            }
        }
    }

    fn file_bad(&self, description: &str, reason: String) -> RegisterOutcome {
        tracing::warn!("Rejecting job '{}': {}", description, reason);
        self.bad_jobs.insert(description.to_string(), reason.clone());
        RegisterOutcome::Rejected { reason }
    }

    fn retire(&self, id: u64, job: &Arc<dyn Job>) {
        self.descriptions.remove(&job.description());
        self.run_handles.remove(&id);
        let mut old = self.old_jobs.lock().expect("old jobs poisoned");
        if old.len() == MAX_OLD_JOBS {
            old.pop_front();
        }
        old.push_back(job.probe());
    }

    /// Applies the registration rules and files the job under a local id.
    /// The job is not started; see [`JobManager::start`].
    pub fn register(&self, job: Arc<dyn Job>) -> RegisterOutcome {
        let description = job.description();

        if !job.can_handle() {
            return self.file_bad(&description, "job cannot run on this node".to_string());
        }

        // A global id must name this node explicitly; a job addressed
        // cluster-wide but unplaceable here is a submission error.
        let global_local_id = match &job.core().spec().global_id {
            Some(global) => match global.resolve(&self.node_name) {
                Some(id) => Some(id),
                None => {
                    return self.file_bad(
                        &description,
                        format!(
                            "global id '{}' has no local id for node '{}'",
                            global.name, self.node_name
                        ),
                    );
                }
            },
            None => None,
        };

        // A group-targeted job only lands on nodes that are members of the
        // group. The check needs the topology, so it applies once a cluster
        // context is bound (the submit path always binds one first).
        if let Some(group) = job.core().spec().group.clone() {
            if let Some(ctx) = job.core().context() {
                let member = ctx
                    .topology
                    .position_in_group(&group, &self.node_name)
                    .is_some();
                if !member {
                    return self.file_bad(
                        &description,
                        format!(
                            "node '{}' is not a member of group '{}'",
                            self.node_name, group
                        ),
                    );
                }
            }
        }

        if let Some(existing_id) = self.descriptions.get(&description).map(|e| *e.value()) {
            if let Some(existing) = self.jobs.get(&existing_id).map(|e| e.value().clone()) {
                if existing.core().status() != JobStatus::Finished {
                    tracing::info!(
                        "Job '{}' already live as {}, merging submission",
                        description,
                        existing_id
                    );
                    return RegisterOutcome::MergedWithExisting {
                        job_id: existing_id,
                    };
                }
                // The previous incarnation finished; retire it and let the
                // new submission take its place.
                self.jobs.remove(&existing_id);
                self.retire(existing_id, &existing);
            }
        }

        let id = match global_local_id.or(job.core().spec().job_id) {
            Some(requested) => {
                if self.jobs.contains_key(&requested) {
                    return self.file_bad(
                        &description,
                        format!("requested job id {} is already taken", requested),
                    );
                }
                requested
            }
            None => self.allocate_id(),
        };

        let local_id = match &job.core().spec().group {
            Some(group) => LocalJobId::scoped(id, group),
            None => LocalJobId::new(id),
        };
        job.core().set_local_id(local_id);
        self.descriptions.insert(description.clone(), id);
        self.jobs.insert(id, job);
        tracing::info!("Registered job '{}' as {}", description, id);
        RegisterOutcome::Registered { job_id: id }
    }

    fn spawn_run(self: &Arc<Self>, id: u64, job: Arc<dyn Job>, start_immediately: bool) {
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            if !job.initialize(start_immediately).await {
                return;
            }
            if job.core().status() != JobStatus::Running {
                return;
            }
            if let Err(e) = job.run().await {
                tracing::error!("Job '{}' run failed, parking it: {}", job.description(), e);
                job.pause().await;
            }
            manager.run_handles.remove(&id);
        });
        self.run_handles.insert(id, handle);
    }

    /// Gives a resumed job a fresh run task *without* re-running its start
    /// hook: initialization happened on the original start, and repeating it
    /// would rebuild state the job already carries. Jobs whose run loop
    /// idles through `Paused` still own their task, so a new one is spawned
    /// only when the previous task has exited.
    fn respawn_run(self: &Arc<Self>, id: u64, job: Arc<dyn Job>) {
        let still_running = self
            .run_handles
            .get(&id)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false);
        if still_running {
            return;
        }

        let manager = self.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = job.run().await {
                tracing::error!("Job '{}' run failed, parking it: {}", job.description(), e);
                job.pause().await;
            }
            manager.run_handles.remove(&id);
        });
        self.run_handles.insert(id, handle);
    }

    /// Starts a registered job's lifecycle on its own task.
    pub fn start(self: &Arc<Self>, id: u64) -> Result<()> {
        let job = self
            .jobs
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(ClusterJobError::JobNotFound(id))?;
        let start_immediately = job.core().spec().begin_immediately;
        self.spawn_run(id, job, start_immediately);
        Ok(())
    }

    /// Registration plus start in one step; the common submission path.
    pub fn register_and_start(self: &Arc<Self>, job: Arc<dyn Job>) -> RegisterOutcome {
        let outcome = self.register(job);
        if let RegisterOutcome::Registered { job_id } = outcome {
            // Registered above, cannot be missing.
            let _ = self.start(job_id);
        }
        outcome
    }

    /// Full submission path for a freshly built job: bind the cluster
    /// context, then register and start.
    pub fn submit(
        self: &Arc<Self>,
        job: Arc<dyn Job>,
        ctx: Arc<crate::cluster::ClusterContext>,
    ) -> RegisterOutcome {
        job.core().bind_context(ctx);
        self.register_and_start(job)
    }

    /// Forwards one raw protocol line to a job. The work-request HTTP path
    /// lands here.
    pub async fn operate(&self, id: u64, line: &str) -> Result<String> {
        let job = self
            .jobs
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(ClusterJobError::JobNotFound(id))?;
        job.operate(line).await
    }

    fn job(&self, id: u64) -> Result<Arc<dyn Job>> {
        self.jobs
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(ClusterJobError::JobNotFound(id))
    }

    /// Probe records for every live job (ordered by local id) followed by
    /// the retired history.
    pub fn probe_all(&self) -> Vec<JobProbeData> {
        let mut ids: Vec<u64> = self.jobs.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();

        let mut probes: Vec<JobProbeData> = ids
            .into_iter()
            .filter_map(|id| self.jobs.get(&id).map(|e| e.value().probe()))
            .collect();
        probes.extend(self.old_jobs.lock().expect("old jobs poisoned").iter().cloned());
        probes
    }

    pub async fn command(
        self: &Arc<Self>,
        job_id: Option<u64>,
        command: JobCommand,
    ) -> Result<CommandResponse> {
        // Probe aggregates its own record type; everything else goes through
        // the per-job path, fanned out when no id is given.
        if let JobCommand::Probe = command {
            return Ok(match job_id {
                None => CommandResponse::Probe(self.probe_all()),
                Some(id) => CommandResponse::Probe(vec![self.job(id)?.probe()]),
            });
        }

        match job_id {
            Some(id) => self.command_one(id, command).await,
            None => self.command_all(command).await,
        }
    }

    /// Node-wide dispatch: the command goes to every live job in id order.
    /// Text answers are aggregated one line per job; a command that only
    /// acknowledged everywhere collapses to a single `Ack`.
    async fn command_all(self: &Arc<Self>, command: JobCommand) -> Result<CommandResponse> {
        let mut ids: Vec<u64> = self.jobs.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();

        let mut lines = Vec::new();
        for id in ids {
            match self.command_one(id, command.clone()).await {
                Ok(CommandResponse::Text(text)) => lines.push(format!("{}: {}", id, text)),
                Ok(_) => {}
                // Retired between the snapshot and the dispatch; skip it.
                Err(ClusterJobError::JobNotFound(_)) => {}
                Err(e) => lines.push(format!("{}: {}", id, e)),
            }
        }

        if lines.is_empty() {
            Ok(CommandResponse::Ack)
        } else {
            Ok(CommandResponse::Text(lines.join("\n")))
        }
    }

    async fn command_one(self: &Arc<Self>, id: u64, command: JobCommand) -> Result<CommandResponse> {
        let job = self.job(id)?;

        if job.core().status() == JobStatus::Finished {
            // A finished job that has not been retired yet still answers
            // introspection; everything else has nothing left to act on.
            return Ok(match command {
                JobCommand::Status => CommandResponse::Text(job.core().status().to_string()),
                JobCommand::Detail => CommandResponse::Text(job.detail()),
                _ => CommandResponse::Done,
            });
        }

        match command {
            JobCommand::Operate { line } => {
                if job.core().status() != JobStatus::Running {
                    return Ok(CommandResponse::Done);
                }
                Ok(CommandResponse::Text(job.operate(&line).await?))
            }
            JobCommand::Pause => {
                job.pause().await;
                Ok(CommandResponse::Ack)
            }
            JobCommand::Resume => {
                job.resume().await;
                self.respawn_run(id, job);
                Ok(CommandResponse::Ack)
            }
            JobCommand::Flush => {
                job.flush().await?;
                Ok(CommandResponse::Ack)
            }
            JobCommand::Bounce => {
                job.stop().await;
                self.settle(id).await;
                job.resume().await;
                self.respawn_run(id, job);
                Ok(CommandResponse::Ack)
            }
            JobCommand::Interrupt => {
                job.stop().await;
                Ok(CommandResponse::Ack)
            }
            JobCommand::Status => Ok(CommandResponse::Text(job.core().status().to_string())),
            JobCommand::Detail => Ok(CommandResponse::Text(job.detail())),
            JobCommand::Probe => unreachable!("handled above"),
        }
    }

    /// Waits (bounded) for a stopped job's run task to exit.
    async fn settle(&self, id: u64) {
        let deadline = tokio::time::Instant::now() + BOUNCE_SETTLE_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            let done = self
                .run_handles
                .get(&id)
                .map(|h| h.is_finished())
                .unwrap_or(true);
            if done {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tracing::warn!("Job {} did not settle within the bounce timeout", id);
    }

    /// Moves every `Finished` job out of the live map into the bounded
    /// history. Called periodically by the node's report loop.
    pub fn retire_finished(&self) -> usize {
        let finished: Vec<(u64, Arc<dyn Job>)> = self
            .jobs
            .iter()
            .filter(|e| e.value().core().status() == JobStatus::Finished)
            .map(|e| (*e.key(), e.value().clone()))
            .collect();

        let mut retired = 0;
        for (id, job) in finished {
            if self.jobs.remove(&id).is_some() {
                self.retire(id, &job);
                retired += 1;
            }
        }
        retired
    }

    /// Orderly node shutdown: every live job gets its shutdown hook.
    pub async fn shutdown_all(&self) {
        let jobs: Vec<Arc<dyn Job>> = self.jobs.iter().map(|e| e.value().clone()).collect();
        for job in jobs {
            job.shutdown().await;
        }
    }

    pub fn live_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn bad_count(&self) -> usize {
        self.bad_jobs.len()
    }

    pub fn old_count(&self) -> usize {
        self.old_jobs.lock().expect("old jobs poisoned").len()
    }
}
