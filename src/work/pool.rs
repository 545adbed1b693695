//! Bounded Work Pool
//!
//! Runs units of work on a bounded number of concurrent workers with a fixed
//! per-unit lifecycle: pre-run (`Submitted -> Processing`), the handler
//! itself, then release back to the source exactly once — whether the handler
//! succeeded, returned false, or blew up.
//!
//! Submission blocks (up to a timeout) when the pool is saturated.
//! Cancellation is cooperative: the pool's flag is handed to every handler
//! and long-running work is expected to poll it. On shutdown the pool stops
//! accepting work, waits a bounded time for the queue to drain, then reclaims
//! anything still in flight by resetting it to `Initialized` and splicing it
//! back into the source, so the work can be redispatched (at-least-once
//! semantics).

use crate::error::{ClusterJobError, Result};
use crate::job::status::CancelFlag;
use crate::work::factory::WorkFactory;
use crate::work::unit::{UnitOfWork, WorkStatus};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Handler invoked for each unit. `Ok(true)` completes the unit, `Ok(false)`
/// fails it plainly, `Err` records the captured trace on it.
pub type WorkHandler = Arc<
    dyn Fn(Arc<UnitOfWork>, CancelFlag) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send>>
        + Send
        + Sync,
>;

pub const DEFAULT_ADD_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SimpleWorkPool {
    source: Arc<dyn WorkFactory>,
    handler: WorkHandler,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<DashMap<String, Arc<UnitOfWork>>>,
    closed: AtomicBool,
    cancel: CancelFlag,
    add_timeout: Duration,
}

impl SimpleWorkPool {
    pub fn new<F, Fut>(source: Arc<dyn WorkFactory>, capacity: usize, handler: F) -> Arc<Self>
    where
        F: Fn(Arc<UnitOfWork>, CancelFlag) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        Self::with_add_timeout(source, capacity, DEFAULT_ADD_TIMEOUT, handler)
    }

    pub fn with_add_timeout<F, Fut>(
        source: Arc<dyn WorkFactory>,
        capacity: usize,
        add_timeout: Duration,
        handler: F,
    ) -> Arc<Self>
    where
        F: Fn(Arc<UnitOfWork>, CancelFlag) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        let handler: WorkHandler = Arc::new(move |unit, cancel| {
            Box::pin(handler(unit, cancel))
                as Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send>>
        });

        Arc::new(Self {
            source,
            handler,
            semaphore: Arc::new(Semaphore::new(capacity.max(1))),
            in_flight: Arc::new(DashMap::new()),
            closed: AtomicBool::new(false),
            cancel: CancelFlag::new(),
            add_timeout,
        })
    }

    /// Submits a unit for execution, blocking up to the configured timeout
    /// while the pool is saturated.
    pub async fn add_work(self: &Arc<Self>, unit: Arc<UnitOfWork>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClusterJobError::PoolClosed);
        }

        let permit = match tokio::time::timeout(
            self.add_timeout,
            self.semaphore.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(ClusterJobError::PoolClosed),
            Err(_) => {
                return Err(ClusterJobError::PoolSaturated {
                    waited_ms: self.add_timeout.as_millis() as u64,
                })
            }
        };

        // Identity is payload-only, so an equal payload already in flight
        // makes this submission redundant; running both would drop one of
        // the two releases.
        match self.in_flight.entry(unit.contents().to_string()) {
            Entry::Occupied(_) => {
                tracing::debug!("Payload already in flight, dropping: {}", unit.contents());
                self.source.release(&unit);
                return Ok(());
            }
            Entry::Vacant(slot) => {
                unit.set_work_status(WorkStatus::Submitted);
                slot.insert(unit.clone());
            }
        }

        let pool = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            pool.run_unit(unit).await;
        });

        Ok(())
    }

    async fn run_unit(&self, unit: Arc<UnitOfWork>) {
        // Pre-run: claim the unit. Losing the race means someone else is
        // already processing this payload.
        if !unit.compare_and_set_work_status(WorkStatus::Submitted, WorkStatus::Processing) {
            tracing::debug!("Unit already claimed, skipping: {}", unit.contents());
            self.finish(&unit);
            return;
        }
        tracing::debug!("Processing unit: {}", unit.contents());

        match (self.handler)(unit.clone(), self.cancel.clone()).await {
            Ok(true) => {
                unit.set_work_status(WorkStatus::Completed);
                tracing::debug!("Unit completed: {}", unit.contents());
            }
            Ok(false) => {
                unit.record_failure(None);
                tracing::warn!("Unit failed: {}", unit.contents());
            }
            Err(e) => {
                unit.record_failure(Some(format!("{:#}", e)));
                tracing::error!("Unit errored: {}: {:#}", unit.contents(), e);
            }
        }

        self.finish(&unit);
    }

    /// Releases the unit back to its source exactly once.
    fn finish(&self, unit: &Arc<UnitOfWork>) {
        if self.in_flight.remove(unit.contents()).is_some() {
            self.source.release(unit);
        }
    }

    /// Sets the cooperative "die" flag for every in-flight handler.
    pub fn cancel_all(&self) {
        self.cancel.set();
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Orderly shutdown: stop intake, wait (bounded) for the queue to drain,
    /// then reclaim whatever is still in flight so it can be redispatched.
    pub async fn shutdown(&self, drain_timeout: Duration) -> usize {
        self.closed.store(true, Ordering::SeqCst);

        let deadline = tokio::time::Instant::now() + drain_timeout;
        while !self.in_flight.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if self.in_flight.is_empty() {
            return 0;
        }

        self.cancel.set();

        let stragglers: Vec<Arc<UnitOfWork>> = self
            .in_flight
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut reclaimed = 0;
        for unit in stragglers {
            if self.in_flight.remove(unit.contents()).is_some() {
                unit.set_work_status(WorkStatus::Initialized);
                self.source.add_to_front(unit.clone());
                self.source.release(&unit);
                reclaimed += 1;
                tracing::warn!("Reclaimed in-flight unit: {}", unit.contents());
            }
        }

        reclaimed
    }
}
