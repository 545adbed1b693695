//! In-Memory Work Factory
//!
//! The simplest factory: a finite, fully buffered list of units. Used for
//! small batches and as the reference implementation of the factory contract.

use crate::work::factory::{InjectedQueues, NextWork, WorkFactory};
use crate::work::unit::UnitOfWork;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub struct BasicWorkFactory {
    queue: Mutex<VecDeque<Arc<UnitOfWork>>>,
    injected: InjectedQueues,
}

impl BasicWorkFactory {
    pub fn new(units: Vec<Arc<UnitOfWork>>) -> Self {
        Self {
            queue: Mutex::new(units.into_iter().collect()),
            injected: InjectedQueues::new(),
        }
    }

    /// Convenience constructor from raw payloads.
    pub fn from_contents<S: Into<String>>(contents: Vec<S>) -> Self {
        Self::new(
            contents
                .into_iter()
                .map(|c| Arc::new(UnitOfWork::new(c)))
                .collect(),
        )
    }

    fn source_exhausted(&self) -> bool {
        self.queue.lock().expect("work queue poisoned").is_empty()
    }
}

#[async_trait]
impl WorkFactory for BasicWorkFactory {
    async fn get_next(&self) -> NextWork {
        if let Some(unit) = self.injected.pop_front_injected() {
            return NextWork::Unit(unit);
        }

        if let Some(unit) = self.queue.lock().expect("work queue poisoned").pop_front() {
            self.injected.note_checked_out();
            return NextWork::Unit(unit);
        }

        if let Some(unit) = self.injected.pop_back_injected() {
            return NextWork::Unit(unit);
        }

        // A buffered list has no out-of-band end marker: seeing every queue
        // empty is the moment the done sentinel is considered observed.
        self.injected.mark_done_observed();
        NextWork::Done
    }

    fn release(&self, _unit: &UnitOfWork) {
        self.injected.note_released();
    }

    fn is_complete(&self) -> bool {
        self.injected.complete(self.source_exhausted())
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
