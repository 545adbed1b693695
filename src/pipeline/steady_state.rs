//! Steady-State Pipeline Stage
//!
//! A long-lived job that pulls file-shaped units from its work factory, runs
//! a stage processor over each one, and forwards the output files to the next
//! stage: each output is partitioned to a destination node, delivered into
//! that node's stage input directory, then announced to the next-stage job
//! with an `add` protocol line so it enters that stage's factory.
//!
//! The stage keeps running while upstream is merely quiet (`Waiting`) and
//! finishes only when its factory is genuinely complete. Suspension is real
//! here: a suspended stage stops pulling new units but lets in-flight units
//! finish, so a cluster operator can drain a stage without losing work.

use crate::cluster::ClusterContext;
use crate::error::{ClusterJobError, Result};
use crate::job::ids::GlobalJobId;
use crate::job::status::{CancelFlag, JobStatus};
use crate::job::{Job, JobCore, JobSpec};
use crate::pipeline::partition::PartitionFunction;
use crate::server::protocol::{WorkRequest, WORK_IS_WAITING};
use crate::work::factory::{NextWork, WorkFactory};
use crate::work::pool::{SimpleWorkPool, DEFAULT_DRAIN_TIMEOUT};
use crate::work::unit::UnitOfWork;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Poll interval while the factory reports `Waiting` or the stage is
/// suspended or paused.
const IDLE_POLL: Duration = Duration::from_millis(200);

/// Where a stage's outputs go next.
#[derive(Debug, Clone)]
pub struct StageTarget {
    /// The next stage as a logical job, resolvable per destination node.
    pub job: GlobalJobId,
    /// The input directory of the next stage on each destination node.
    pub input_dir: PathBuf,
    pub partition: PartitionFunction,
}

/// The per-unit transformation a stage performs.
///
/// `process` reads one input file and writes zero or more output files into
/// `output_dir`. Returning `None` fails the unit without a trace; an error
/// records the trace on it.
#[async_trait]
pub trait StageProcessor: Send + Sync {
    fn next_stage(&self) -> Option<StageTarget>;

    async fn process(
        &self,
        input: &Path,
        output_dir: &Path,
        cancel: CancelFlag,
    ) -> anyhow::Result<Option<Vec<PathBuf>>>;
}

/// Stable partition key for an output file name.
fn key_for(name: &str) -> i64 {
    name.bytes()
        .fold(0i64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as i64))
}

/// Delivers one output file to its partitioned destination and announces it
/// to the next-stage job there.
async fn forward_output(ctx: &ClusterContext, target: &StageTarget, output: &Path) -> Result<()> {
    let name = output
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            ClusterJobError::Config(format!("output has no usable file name: {}", output.display()))
        })?;

    let dest_node = target.partition.destination(key_for(name))?;

    let remote_job_id = match target.job.resolve(dest_node) {
        Some(id) => id,
        None => {
            tracing::warn!(
                "Next stage '{}' has no local id on {}, not forwarding {}",
                target.job.name,
                dest_node,
                name
            );
            return Ok(());
        }
    };

    let bytes = tokio::fs::read(output).await?;
    ctx.transport
        .deliver_file(dest_node, &target.input_dir, name, bytes)
        .await?;

    let announce = format!("add|{}", target.input_dir.join(name).display());
    ctx.transport
        .send_request(dest_node, remote_job_id, &announce)
        .await?;

    tracing::debug!("Forwarded {} to {}/{}", name, dest_node, target.job.name);
    Ok(())
}

pub struct SteadyStateJob {
    core: JobCore,
    factory: Arc<dyn WorkFactory>,
    processor: Arc<dyn StageProcessor>,
    output_dir: PathBuf,
    suspended: AtomicBool,
    processed: Arc<AtomicUsize>,
}

impl SteadyStateJob {
    pub fn new(
        spec: JobSpec,
        factory: Arc<dyn WorkFactory>,
        processor: Arc<dyn StageProcessor>,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            core: JobCore::new(spec),
            factory,
            processor,
            output_dir,
            suspended: AtomicBool::new(false),
            processed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    fn make_pool(&self) -> Arc<SimpleWorkPool> {
        let processor = self.processor.clone();
        let output_dir = self.output_dir.clone();
        let context = self.core.context();
        let processed = self.processed.clone();

        SimpleWorkPool::new(
            self.factory.clone(),
            self.core.spec().thread_count.max(1),
            move |unit, cancel| {
                let processor = processor.clone();
                let output_dir = output_dir.clone();
                let context = context.clone();
                let processed = processed.clone();
                async move {
                    let input = PathBuf::from(unit.contents());
                    let outputs = processor.process(&input, &output_dir, cancel).await?;

                    let outputs = match outputs {
                        Some(outputs) => outputs,
                        None => return Ok(false),
                    };

                    if let (Some(ctx), Some(target)) = (context, processor.next_stage()) {
                        for output in &outputs {
                            forward_output(&ctx, &target, output).await?;
                        }
                    }

                    processed.fetch_add(1, Ordering::SeqCst);
                    Ok(true)
                }
            },
        )
    }

    pub fn processed_count(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    async fn push_back_unit(&self, unit: Arc<UnitOfWork>) {
        self.factory.add_to_front(unit.clone());
        self.factory.release(&unit);
    }
}

#[async_trait]
impl Job for SteadyStateJob {
    fn core(&self) -> &JobCore {
        &self.core
    }

    fn job_type(&self) -> &'static str {
        "steady_state"
    }

    async fn on_start(&self) -> Result<()> {
        std::fs::create_dir_all(&self.output_dir)?;
        Ok(())
    }

    /// The stage's own thread: pull, process, forward, until the factory is
    /// genuinely complete.
    async fn run(&self) -> Result<()> {
        let pool = self.make_pool();
        let cancel = self.core.cancel_flag();

        loop {
            if cancel.is_set() {
                break;
            }
            match self.core.status() {
                JobStatus::Running => {}
                JobStatus::Finished | JobStatus::Interrupted => break,
                // Paused (or not yet resumed): idle without pulling.
                _ => {
                    tokio::time::sleep(IDLE_POLL).await;
                    continue;
                }
            }
            if self.is_suspended() {
                tokio::time::sleep(IDLE_POLL).await;
                continue;
            }

            match self.factory.get_next().await {
                NextWork::Unit(unit) => {
                    if let Err(e) = pool.add_work(unit.clone()).await {
                        tracing::warn!("Pool rejected unit, requeueing: {}", e);
                        self.push_back_unit(unit).await;
                        tokio::time::sleep(IDLE_POLL).await;
                    }
                }
                NextWork::Waiting => {
                    tokio::time::sleep(IDLE_POLL).await;
                }
                NextWork::Done => {
                    if pool.is_idle() && self.factory.is_complete() {
                        self.set_status(JobStatus::Finished).await;
                        break;
                    }
                    tokio::time::sleep(IDLE_POLL).await;
                }
            }
        }

        let reclaimed = pool.shutdown(DEFAULT_DRAIN_TIMEOUT).await;
        if reclaimed > 0 {
            tracing::warn!(
                "Stage '{}' reclaimed {} in-flight unit(s) on exit",
                self.description(),
                reclaimed
            );
        }
        Ok(())
    }

    async fn operate(&self, line: &str) -> Result<String> {
        match WorkRequest::parse(line)? {
            WorkRequest::Add { work } => {
                self.factory.add_to_back(Arc::new(UnitOfWork::new(&work)));
                Ok("ok".to_string())
            }
            WorkRequest::Report => Ok(format!(
                "stage '{}': status={} suspended={} complete={}",
                self.description(),
                self.core.status(),
                self.is_suspended(),
                self.factory.is_complete()
            )),
            // A stage is not a work server; requesters get nothing from it.
            WorkRequest::Get { .. } => Ok(WORK_IS_WAITING.to_string()),
        }
    }

    /// Real suspension: stop pulling, let in-flight units finish.
    async fn suspend(&self) {
        tracing::info!("Suspending stage '{}'", self.description());
        self.suspended.store(true, Ordering::SeqCst);
    }

    async fn resume(&self) {
        self.suspended.store(false, Ordering::SeqCst);
        self.core.cancel_flag().clear();
        self.set_status(JobStatus::Running).await;
    }
}
