//! Unit Of Work
//!
//! The smallest dispatchable item a job processes: an opaque payload plus a
//! mutable status and an optional failure reason.
//!
//! Identity (equality, hashing) depends only on the payload. Status and
//! failure reason are deliberately excluded so the same unit can be tracked
//! across its whole lifecycle — and recognized again when a persisted stream
//! is replayed after a restart.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

/// Lifecycle state of a single unit of work.
///
/// `AllDone` and `Waiting` are factory-level sentinels: they describe a
/// factory's answer ("no more work" / "not ready yet"), not a real unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkStatus {
    Initialized,
    Submitted,
    Processing,
    Completed,
    Failed,
    Error,
    AllDone,
    Waiting,
}

impl std::fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkStatus::Initialized => "initialized",
            WorkStatus::Submitted => "submitted",
            WorkStatus::Processing => "processing",
            WorkStatus::Completed => "completed",
            WorkStatus::Failed => "failed",
            WorkStatus::Error => "error",
            WorkStatus::AllDone => "all_done",
            WorkStatus::Waiting => "waiting",
        };
        write!(f, "{}", name)
    }
}

/// A shared status slot supporting plain get/set and an atomic
/// compare-and-swap, used wherever a status is checked from several tasks.
#[derive(Debug)]
pub struct StatusCell {
    inner: Mutex<WorkStatus>,
}

impl StatusCell {
    pub fn new(initial: WorkStatus) -> Self {
        Self {
            inner: Mutex::new(initial),
        }
    }

    pub fn get(&self) -> WorkStatus {
        *self.inner.lock().expect("status cell poisoned")
    }

    pub fn set(&self, status: WorkStatus) {
        *self.inner.lock().expect("status cell poisoned") = status;
    }

    /// Atomically replaces `expected` with `update`. Returns whether the swap
    /// happened; used to prevent double-processing of a checked-out unit.
    pub fn compare_and_set(&self, expected: WorkStatus, update: WorkStatus) -> bool {
        let mut guard = self.inner.lock().expect("status cell poisoned");
        if *guard == expected {
            *guard = update;
            true
        } else {
            false
        }
    }
}

/// Fixed per-unit overhead assumed on top of the payload bytes when
/// estimating batch sizes without serializing.
const UNIT_OVERHEAD_BYTES: usize = 48;

/// An opaque payload with a mutable execution status.
#[derive(Debug)]
pub struct UnitOfWork {
    contents: String,
    status: StatusCell,
    failure_reason: Mutex<Option<String>>,
}

impl UnitOfWork {
    pub fn new(contents: impl Into<String>) -> Self {
        Self::with_status(contents, WorkStatus::Initialized)
    }

    pub fn with_status(contents: impl Into<String>, status: WorkStatus) -> Self {
        Self {
            contents: contents.into(),
            status: StatusCell::new(status),
            failure_reason: Mutex::new(None),
        }
    }

    /// The main contents of the unit. This is the whole identity of the unit.
    pub fn contents(&self) -> &str {
        &self.contents
    }

    pub fn work_status(&self) -> WorkStatus {
        self.status.get()
    }

    pub fn set_work_status(&self, status: WorkStatus) {
        self.status.set(status);
    }

    pub fn compare_and_set_work_status(&self, expected: WorkStatus, update: WorkStatus) -> bool {
        self.status.compare_and_set(expected, update)
    }

    /// Records a processing failure on the unit.
    ///
    /// `None` means a processing function simply returned false: the unit
    /// becomes `Failed`. A concrete reason (typically a captured error trace)
    /// marks the unit `Error` and is retained for introspection.
    pub fn record_failure(&self, reason: Option<String>) {
        match reason {
            None => self.status.set(WorkStatus::Failed),
            Some(trace) => {
                self.status.set(WorkStatus::Error);
                *self
                    .failure_reason
                    .lock()
                    .expect("failure reason poisoned") = Some(trace);
            }
        }
    }

    pub fn failure_reason(&self) -> Option<String> {
        self.failure_reason
            .lock()
            .expect("failure reason poisoned")
            .clone()
    }

    /// Estimated serialized size in bytes, computed without serializing.
    pub fn serialized_size(&self) -> usize {
        self.contents.len() + UNIT_OVERHEAD_BYTES
    }
}

impl Clone for UnitOfWork {
    fn clone(&self) -> Self {
        let cloned = Self::with_status(self.contents.clone(), self.work_status());
        *cloned
            .failure_reason
            .lock()
            .expect("failure reason poisoned") = self.failure_reason();
        cloned
    }
}

impl PartialEq for UnitOfWork {
    fn eq(&self, other: &Self) -> bool {
        self.contents == other.contents
    }
}

impl Eq for UnitOfWork {}

impl Hash for UnitOfWork {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.contents.hash(state);
    }
}

/// Serialized form of a unit: one JSON object per line in persisted streams.
#[derive(Debug, Serialize, Deserialize)]
struct UnitRecord {
    contents: String,
    status: WorkStatus,
    failure_reason: Option<String>,
}

impl Serialize for UnitOfWork {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let record = UnitRecord {
            contents: self.contents.clone(),
            status: self.work_status(),
            failure_reason: self.failure_reason(),
        };
        record.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for UnitOfWork {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let record = UnitRecord::deserialize(deserializer)?;
        let unit = UnitOfWork::with_status(record.contents, record.status);
        *unit
            .failure_reason
            .lock()
            .expect("failure reason poisoned") = record.failure_reason;
        Ok(unit)
    }
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
