//! Work Factory Contract
//!
//! A work factory is a pluggable strategy producing and recycling units of
//! work. Every variant shares the same splice-in semantics: callers may push
//! priority work to the *front* (served before anything the factory produces)
//! or overflow work to the *back* (served only after the factory's own source
//! is exhausted).
//!
//! `is_complete` is deliberately conservative: it holds only once both
//! injected queues are empty, the underlying source is exhausted, the done
//! sentinel has actually been observed, and every checked-out unit has been
//! released. This guards against the race where work is injected right after
//! the source reports empty.

use crate::work::unit::UnitOfWork;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Outcome of asking a factory for the next unit.
#[derive(Debug, Clone)]
pub enum NextWork {
    Unit(Arc<UnitOfWork>),
    /// Nothing available right now; ask again later.
    Waiting,
    /// The factory will never produce another unit.
    Done,
}

impl NextWork {
    pub fn is_done(&self) -> bool {
        matches!(self, NextWork::Done)
    }

    pub fn unit(self) -> Option<Arc<UnitOfWork>> {
        match self {
            NextWork::Unit(u) => Some(u),
            _ => None,
        }
    }
}

#[async_trait]
pub trait WorkFactory: Send + Sync {
    /// Returns the next unit, `Waiting` if the source is not ready, or `Done`
    /// once everything (injected and native) is exhausted.
    async fn get_next(&self) -> NextWork;

    /// Marks a checked-out unit as returned. Releasing the same unit twice
    /// is undefined.
    fn release(&self, unit: &UnitOfWork);

    fn is_complete(&self) -> bool;

    fn add_to_front(&self, unit: Arc<UnitOfWork>);

    fn add_to_back(&self, unit: Arc<UnitOfWork>);

    fn add_all_to_front(&self, units: Vec<Arc<UnitOfWork>>);
}

/// The state block shared by every factory variant: the two injected queues,
/// the checked-out counter and the done-sentinel flag.
#[derive(Debug, Default)]
pub struct InjectedQueues {
    front: Mutex<VecDeque<Arc<UnitOfWork>>>,
    back: Mutex<VecDeque<Arc<UnitOfWork>>>,
    done_observed: AtomicBool,
    checked_out: AtomicUsize,
}

impl InjectedQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_front(&self, unit: Arc<UnitOfWork>) {
        self.front
            .lock()
            .expect("front queue poisoned")
            .push_back(unit);
    }

    pub fn push_all_front(&self, units: Vec<Arc<UnitOfWork>>) {
        let mut guard = self.front.lock().expect("front queue poisoned");
        for unit in units {
            guard.push_back(unit);
        }
    }

    pub fn push_back(&self, unit: Arc<UnitOfWork>) {
        self.back
            .lock()
            .expect("back queue poisoned")
            .push_back(unit);
    }

    /// Next front-injected unit, already counted as checked out.
    pub fn pop_front_injected(&self) -> Option<Arc<UnitOfWork>> {
        let unit = self.front.lock().expect("front queue poisoned").pop_front();
        if unit.is_some() {
            self.checked_out.fetch_add(1, Ordering::SeqCst);
        }
        unit
    }

    /// Next back-injected unit, already counted as checked out. Only valid
    /// once the native source is exhausted.
    pub fn pop_back_injected(&self) -> Option<Arc<UnitOfWork>> {
        let unit = self.back.lock().expect("back queue poisoned").pop_front();
        if unit.is_some() {
            self.checked_out.fetch_add(1, Ordering::SeqCst);
        }
        unit
    }

    pub fn queues_empty(&self) -> bool {
        self.front.lock().expect("front queue poisoned").is_empty()
            && self.back.lock().expect("back queue poisoned").is_empty()
    }

    pub fn note_checked_out(&self) {
        self.checked_out.fetch_add(1, Ordering::SeqCst);
    }

    pub fn note_released(&self) {
        // Double release is undefined; saturate instead of wrapping.
        let _ = self
            .checked_out
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn outstanding(&self) -> usize {
        self.checked_out.load(Ordering::SeqCst)
    }

    pub fn mark_done_observed(&self) {
        self.done_observed.store(true, Ordering::SeqCst);
    }

    pub fn done_observed(&self) -> bool {
        self.done_observed.load(Ordering::SeqCst)
    }

    /// The common completion rule shared by all variants; `source_exhausted`
    /// is the variant-specific part.
    pub fn complete(&self, source_exhausted: bool) -> bool {
        self.queues_empty() && source_exhausted && self.done_observed() && self.outstanding() == 0
    }
}
