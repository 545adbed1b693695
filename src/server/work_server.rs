//! Work-Serving Jobs
//!
//! Two job types that answer the work protocol:
//!
//! - **`BatchWorkServer`**: serves a `PathBatch` loaded from a batch file,
//!   with machine-affinity distribution, an optional even-split limit, and a
//!   durable dispatch log. With `restart` set it reconciles against the prior
//!   run's log before serving anything.
//! - **`FactoryWorkServer`**: serves any `WorkFactory`, turning local unit
//!   production into a remote-pullable source.
//!
//! Every dispatch is logged *before* the work string is handed to the
//! requester, so a crash between the two can only cause a unit to be dropped,
//! never dispatched twice across a restart.

use crate::batch::dispatch_log::DispatchLog;
use crate::batch::path_batch::{BatchNext, DistributionPolicy, PathBatch};
use crate::error::{ClusterJobError, Result};
use crate::job::status::JobStatus;
use crate::job::{Job, JobCore, JobSpec};
use crate::server::protocol::{WorkRequest, WORK_IS_DONE, WORK_IS_WAITING};
use crate::work::factory::{NextWork, WorkFactory};
use crate::work::unit::UnitOfWork;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Response to a successful `add` or to `report` acknowledgements.
pub const ADD_OK: &str = "ok";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkServerSpec {
    #[serde(flatten)]
    pub job: JobSpec,
    /// Machines take only their own queues first (plus non-cache helping).
    pub only_own: bool,
    /// With `only_own`, allow fully randomized fallback once everything
    /// else is drained.
    pub accept_help: bool,
    /// Reconcile against the prior run's dispatch log instead of starting
    /// fresh. Requires the log to exist.
    pub restart: bool,
    /// Cap each requester at roughly its even share of the batch.
    pub even_limit: bool,
    pub batch_file: PathBuf,
    pub log_path: PathBuf,
}

impl WorkServerSpec {
    fn policy(&self) -> DistributionPolicy {
        if self.only_own {
            DistributionPolicy::OwnOnly {
                accept_help: self.accept_help,
            }
        } else {
            DistributionPolicy::Randomized
        }
    }
}

struct BatchState {
    batch: Arc<PathBatch>,
    log: Arc<DispatchLog>,
    /// Paths loaded after restart reconciliation; the base of the even split.
    initial_total: usize,
}

pub struct BatchWorkServer {
    core: JobCore,
    spec: WorkServerSpec,
    state: Mutex<Option<BatchState>>,
    known_destinations: DashSet<String>,
    handed_out: DashMap<String, usize>,
}

impl BatchWorkServer {
    pub fn new(spec: WorkServerSpec) -> Self {
        Self {
            core: JobCore::new(spec.job.clone()),
            spec,
            state: Mutex::new(None),
            known_destinations: DashSet::new(),
            handed_out: DashMap::new(),
        }
    }

    fn state_batch(&self) -> Option<(Arc<PathBatch>, Arc<DispatchLog>)> {
        self.state
            .lock()
            .expect("server state poisoned")
            .as_ref()
            .map(|s| (s.batch.clone(), s.log.clone()))
    }

    fn initial_total(&self) -> usize {
        self.state
            .lock()
            .expect("server state poisoned")
            .as_ref()
            .map(|s| s.initial_total)
            .unwrap_or(0)
    }

    /// The even-split cap is approximate on purpose: it is recomputed from
    /// the destinations seen so far, so early requesters can overshoot their
    /// final share slightly.
    fn over_even_limit(&self, node: &str) -> bool {
        if !self.spec.even_limit {
            return false;
        }
        let destinations = self.known_destinations.len().max(1);
        let cap = (self.initial_total() / destinations).max(1);
        self.handed_out.get(node).map(|c| *c >= cap).unwrap_or(false)
    }

    async fn handle_get(&self, node: &str) -> Result<String> {
        let (batch, log) = match self.state_batch() {
            Some(pair) => pair,
            None => return Ok(WORK_IS_WAITING.to_string()),
        };

        if self.core.status() != JobStatus::Running {
            return Ok(if batch.is_complete() {
                WORK_IS_DONE.to_string()
            } else {
                WORK_IS_WAITING.to_string()
            });
        }

        self.known_destinations.insert(node.to_string());

        if self.over_even_limit(node) {
            if batch.is_complete() {
                return Ok(WORK_IS_DONE.to_string());
            }
            tracing::debug!("Even-limit cap reached for {}", node);
            return Ok(WORK_IS_WAITING.to_string());
        }

        match batch.get_next(node) {
            BatchNext::Path(work) => {
                // Log before hand-out. A record failure keeps the work.
                if let Err(e) = log.record(&work, node) {
                    tracing::error!("Dispatch log write failed, withholding work: {}", e);
                    batch.add_path(&work);
                    return Ok(WORK_IS_WAITING.to_string());
                }
                *self.handed_out.entry(node.to_string()).or_insert(0) += 1;
                tracing::info!("Dispatched to {}: {}", node, work);
                Ok(work)
            }
            BatchNext::Waiting => Ok(WORK_IS_WAITING.to_string()),
            BatchNext::Done => Ok(WORK_IS_DONE.to_string()),
        }
    }

    fn report(&self) -> String {
        match self.state_batch() {
            Some((batch, _)) => {
                let mut line = format!(
                    "batch server '{}': status={} remaining={} machines={} destinations={}",
                    self.description(),
                    self.core.status(),
                    batch.get_remaining_estimate(),
                    batch.machine_count(),
                    self.known_destinations.len()
                );
                if self.spec.even_limit {
                    let mut dispensed: Vec<String> = self
                        .handed_out
                        .iter()
                        .map(|e| format!("{}={}", e.key(), e.value()))
                        .collect();
                    dispensed.sort();
                    line.push_str(&format!(" dispensed[{}]", dispensed.join(",")));
                }
                line
            }
            None => format!(
                "batch server '{}': status={} (not started)",
                self.description(),
                self.core.status()
            ),
        }
    }
}

#[async_trait]
impl Job for BatchWorkServer {
    fn core(&self) -> &JobCore {
        &self.core
    }

    fn job_type(&self) -> &'static str {
        "batch_work_server"
    }

    async fn on_start(&self) -> Result<()> {
        let batch = Arc::new(PathBatch::new(self.spec.policy()));
        let loaded = batch.load_file(&self.spec.batch_file)?;

        if self.spec.restart {
            if !self.spec.log_path.exists() {
                return Err(ClusterJobError::Restart(format!(
                    "restart requested but no dispatch log at {}",
                    self.spec.log_path.display()
                )));
            }
            batch.remove_finished_work(&self.spec.log_path)?;
        }

        let initial_total = batch.get_remaining_estimate();
        let log = Arc::new(DispatchLog::open(&self.spec.log_path)?);
        tracing::info!(
            "Batch server '{}' loaded {} path(s), {} to serve",
            self.description(),
            loaded,
            initial_total
        );

        *self.state.lock().expect("server state poisoned") = Some(BatchState {
            batch,
            log,
            initial_total,
        });
        Ok(())
    }

    async fn operate(&self, line: &str) -> Result<String> {
        match WorkRequest::parse(line)? {
            WorkRequest::Get {
                requesting_node, ..
            } => self.handle_get(&requesting_node).await,
            WorkRequest::Add { work } => {
                if let Some((batch, _)) = self.state_batch() {
                    batch.add_path(&work);
                    Ok(ADD_OK.to_string())
                } else {
                    Ok(WORK_IS_WAITING.to_string())
                }
            }
            WorkRequest::Report => Ok(self.report()),
        }
    }

    async fn flush(&self) -> Result<()> {
        if let Some((_, log)) = self.state_batch() {
            log.flush()?;
        }
        Ok(())
    }

    fn remaining_estimate(&self) -> Option<usize> {
        self.state_batch()
            .map(|(batch, _)| batch.get_remaining_estimate())
    }

    /// Orderly end-of-life: close the log, then record whether the batch
    /// actually drained.
    async fn shutdown(&self) {
        let remaining = match self.state_batch() {
            Some((batch, log)) => {
                if let Err(e) = log.close() {
                    tracing::warn!("Dispatch log close failed: {}", e);
                }
                batch.get_remaining_estimate()
            }
            None => 0,
        };

        if remaining > 0 {
            tracing::warn!(
                "Batch server '{}' shut down with {} path(s) unserved",
                self.description(),
                remaining
            );
            self.stop().await;
        } else {
            self.set_status(JobStatus::Finished).await;
        }
    }
}

/// Serves units produced by any local `WorkFactory` over the work protocol.
pub struct FactoryWorkServer {
    core: JobCore,
    factory: Arc<dyn WorkFactory>,
    dispatched: AtomicUsize,
}

impl FactoryWorkServer {
    pub fn new(spec: JobSpec, factory: Arc<dyn WorkFactory>) -> Self {
        Self {
            core: JobCore::new(spec),
            factory,
            dispatched: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Job for FactoryWorkServer {
    fn core(&self) -> &JobCore {
        &self.core
    }

    fn job_type(&self) -> &'static str {
        "factory_work_server"
    }

    async fn operate(&self, line: &str) -> Result<String> {
        match WorkRequest::parse(line)? {
            WorkRequest::Get { .. } => {
                if self.core.status() != JobStatus::Running {
                    return Ok(WORK_IS_WAITING.to_string());
                }
                match self.factory.get_next().await {
                    NextWork::Unit(unit) => {
                        // Once handed to a remote requester the unit is out
                        // of this factory's hands; release it so local
                        // completion accounting does not wait on it.
                        let work = unit.contents().to_string();
                        self.factory.release(&unit);
                        self.dispatched.fetch_add(1, Ordering::SeqCst);
                        Ok(work)
                    }
                    NextWork::Waiting => Ok(WORK_IS_WAITING.to_string()),
                    NextWork::Done => Ok(WORK_IS_DONE.to_string()),
                }
            }
            WorkRequest::Add { work } => {
                self.factory.add_to_back(Arc::new(UnitOfWork::new(&work)));
                Ok(ADD_OK.to_string())
            }
            WorkRequest::Report => Ok(format!(
                "factory server '{}': status={} dispatched={} complete={}",
                self.description(),
                self.core.status(),
                self.dispatched.load(Ordering::SeqCst),
                self.factory.is_complete()
            )),
        }
    }
}
