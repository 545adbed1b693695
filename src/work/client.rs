//! Remote Work Factory Client
//!
//! Pulls units from a work-serving job on another node by issuing
//! `get|requestingJobId|requestingNodeId` requests over the transport and
//! turning the text response into a unit or a sentinel.
//!
//! Communication failures are retried across calls up to a consecutive
//! failure budget; once the budget is spent the factory declares itself done
//! rather than blocking its job forever on a dead server.

use crate::cluster::transport::MessageSender;
use crate::server::protocol::{WORK_IS_DONE, WORK_IS_WAITING};
use crate::work::factory::{InjectedQueues, NextWork, WorkFactory};
use crate::work::unit::UnitOfWork;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Consecutive failed round-trips tolerated before giving up on the server.
pub const DEFAULT_FAILURE_BUDGET: usize = 5;

pub struct ClientWorkFactory {
    transport: Arc<dyn MessageSender>,
    /// Node the work-serving job runs on.
    server_node: String,
    /// Local id of the serving job on that node.
    serving_job_id: u64,
    /// This side's identity, sent along with every request.
    requesting_job_id: u64,
    requesting_node: String,
    consecutive_failures: AtomicUsize,
    failure_budget: usize,
    injected: InjectedQueues,
}

impl ClientWorkFactory {
    pub fn new(
        transport: Arc<dyn MessageSender>,
        server_node: impl Into<String>,
        serving_job_id: u64,
        requesting_job_id: u64,
        requesting_node: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            server_node: server_node.into(),
            serving_job_id,
            requesting_job_id,
            requesting_node: requesting_node.into(),
            consecutive_failures: AtomicUsize::new(0),
            failure_budget: DEFAULT_FAILURE_BUDGET,
            injected: InjectedQueues::new(),
        }
    }

    pub fn with_failure_budget(mut self, budget: usize) -> Self {
        self.failure_budget = budget;
        self
    }
}

#[async_trait]
impl WorkFactory for ClientWorkFactory {
    async fn get_next(&self) -> NextWork {
        if let Some(unit) = self.injected.pop_front_injected() {
            return NextWork::Unit(unit);
        }

        if !self.injected.done_observed() {
            let line = format!("get|{}|{}", self.requesting_job_id, self.requesting_node);
            match self
                .transport
                .send_request(&self.server_node, self.serving_job_id, &line)
                .await
            {
                Ok(response) => {
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                    match response.as_str() {
                        WORK_IS_DONE => {
                            tracing::info!(
                                "Work server {}/{} reported done",
                                self.server_node,
                                self.serving_job_id
                            );
                            self.injected.mark_done_observed();
                        }
                        WORK_IS_WAITING => return NextWork::Waiting,
                        work => {
                            let unit = Arc::new(UnitOfWork::new(work));
                            self.injected.note_checked_out();
                            return NextWork::Unit(unit);
                        }
                    }
                }
                Err(e) => {
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::warn!(
                        "Work request to {}/{} failed ({}/{}): {}",
                        self.server_node,
                        self.serving_job_id,
                        failures,
                        self.failure_budget,
                        e
                    );
                    if failures >= self.failure_budget {
                        tracing::error!(
                            "Giving up on work server {} after {} consecutive failures",
                            self.server_node,
                            failures
                        );
                        self.injected.mark_done_observed();
                    } else {
                        return NextWork::Waiting;
                    }
                }
            }
        }

        if let Some(unit) = self.injected.pop_back_injected() {
            return NextWork::Unit(unit);
        }

        NextWork::Done
    }

    fn release(&self, _unit: &UnitOfWork) {
        self.injected.note_released();
    }

    fn is_complete(&self) -> bool {
        // The remote source counts as exhausted exactly when the done
        // sentinel (or the failure budget) has been observed.
        self.injected.complete(self.injected.done_observed())
    }

    fn add_to_front(&self, unit: Arc<UnitOfWork>) {
        self.injected.push_front(unit);
    }

    fn add_to_back(&self, unit: Arc<UnitOfWork>) {
        self.injected.push_back(unit);
    }

    fn add_all_to_front(&self, units: Vec<Arc<UnitOfWork>>) {
        self.injected.push_all_front(units);
    }
}
