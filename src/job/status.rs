//! Job Status State Machine
//!
//! Job status is a shared mutable cell read and written from several tasks
//! (the job's own run loop, the command dispatch path, shutdown). All writes
//! go through an explicit transition table rather than ad hoc conditionals;
//! the one rule that matters most — an interruption request is honored only
//! while the job is actually `Running` — lives in that table.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Initializing,
    Initialized,
    Running,
    Paused,
    Interrupted,
    Finished,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobStatus::Initializing => "initializing",
            JobStatus::Initialized => "initialized",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Interrupted => "interrupted",
            JobStatus::Finished => "finished",
        };
        write!(f, "{}", name)
    }
}

/// Whether moving `from -> to` is legal.
///
/// `Finished` is the only terminal state. `Interrupted` is reachable only
/// from `Running`: an interrupt request never resurrects a paused or
/// finished job as interrupted.
pub fn transition_allowed(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;

    if from == to {
        return false;
    }

    match (from, to) {
        (Finished, _) => false,
        (_, Finished) => true,
        (Running, Interrupted) => true,
        (_, Interrupted) => false,
        // A failed start hook parks the job instead of running it.
        (Initializing, Initialized) | (Initializing, Paused) => true,
        (Initialized, Running) | (Initialized, Paused) => true,
        (Running, Paused) => true,
        (Paused, Running) => true,
        (Interrupted, Paused) | (Interrupted, Running) => true,
        _ => false,
    }
}

/// Status cell with table-checked writes and a fire-once finished latch.
#[derive(Debug)]
pub struct JobStatusCell {
    inner: Mutex<JobStatus>,
    finished_latch: AtomicBool,
}

impl JobStatusCell {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(JobStatus::Initializing),
            finished_latch: AtomicBool::new(false),
        }
    }

    pub fn get(&self) -> JobStatus {
        *self.inner.lock().expect("job status poisoned")
    }

    /// Applies the transition if the table allows it. Returns whether the
    /// status actually changed; disallowed requests are silently dropped.
    pub fn apply(&self, to: JobStatus) -> bool {
        let mut guard = self.inner.lock().expect("job status poisoned");
        if transition_allowed(*guard, to) {
            *guard = to;
            true
        } else {
            false
        }
    }

    /// True exactly once, the first time it is called after the cell entered
    /// `Finished`. Drives the completion hook.
    pub fn take_finished_latch(&self) -> bool {
        self.get() == JobStatus::Finished
            && self
                .finished_latch
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }
}

impl Default for JobStatusCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative cancellation flag.
///
/// Cancellation in this system is never preemptive: long-running work is
/// expected to poll the flag between units (and inside long operations) and
/// wind down on its own.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
