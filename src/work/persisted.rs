//! Persisted-Stream Work Factory
//!
//! Reads units from an input stream (one JSON record per line) and writes
//! every released unit, with its final status, to an output stream. On a
//! restart the prior output stream can be replayed: units recorded there are
//! skipped, except those whose recorded status is in the reprocess set
//! (typically `Failed`/`Error`), which are served again.
//!
//! Payload-only unit identity is what makes the replay correct — a unit read
//! from the input is recognized as "already seen" no matter what status it
//! ended up with last run.

use crate::error::{ClusterJobError, Result};
use crate::work::factory::{InjectedQueues, NextWork, WorkFactory};
use crate::work::unit::{UnitOfWork, WorkStatus};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub struct PersistedWorkFactory {
    input_path: PathBuf,
    input: Mutex<Lines<BufReader<File>>>,
    output: Mutex<Option<BufWriter<File>>>,
    /// Payload -> status recorded in the replayed prior output.
    replayed: HashMap<String, WorkStatus>,
    /// Replayed statuses that should be served again instead of skipped.
    reprocess: HashSet<WorkStatus>,
    input_exhausted: AtomicBool,
    injected: InjectedQueues,
}

impl PersistedWorkFactory {
    /// Opens `input_path` for reading and `output_path` for appending.
    ///
    /// With `replay` set, the prior contents of `output_path` are read first
    /// and used to skip already-processed units; a missing prior output is a
    /// fatal restart error rather than a silent full reprocess.
    pub fn new(
        input_path: &Path,
        output_path: &Path,
        replay: bool,
        reprocess: Vec<WorkStatus>,
    ) -> Result<Self> {
        let mut replayed = HashMap::new();
        if replay {
            if !output_path.exists() {
                return Err(ClusterJobError::Restart(format!(
                    "replay requested but no prior output at {}",
                    output_path.display()
                )));
            }
            replayed = Self::read_prior_output(output_path)?;
            tracing::info!(
                "Replayed {} prior unit record(s) from {}",
                replayed.len(),
                output_path.display()
            );
        }

        let input = BufReader::new(File::open(input_path)?).lines();
        let output = BufWriter::new(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(output_path)?,
        );

        Ok(Self {
            input_path: input_path.to_path_buf(),
            input: Mutex::new(input),
            output: Mutex::new(Some(output)),
            replayed,
            reprocess: reprocess.into_iter().collect(),
            input_exhausted: AtomicBool::new(false),
            injected: InjectedQueues::new(),
        })
    }

    fn read_prior_output(path: &Path) -> Result<HashMap<String, WorkStatus>> {
        let mut seen = HashMap::new();
        for line in BufReader::new(File::open(path)?).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<UnitOfWork>(&line) {
                Ok(unit) => {
                    if unit.work_status() == WorkStatus::AllDone {
                        continue;
                    }
                    // Later records win: a unit reprocessed last run keeps
                    // its final status.
                    seen.insert(unit.contents().to_string(), unit.work_status());
                }
                Err(e) => {
                    tracing::warn!("Skipping malformed record in {}: {}", path.display(), e);
                }
            }
        }
        Ok(seen)
    }

    /// Next unit from the input stream that is not skipped by the replay.
    fn next_from_input(&self) -> Option<Arc<UnitOfWork>> {
        let mut guard = self.input.lock().expect("input stream poisoned");
        loop {
            let line = match guard.next() {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    tracing::warn!("Read error in {}: {}", self.input_path.display(), e);
                    continue;
                }
                None => {
                    self.input_exhausted.store(true, Ordering::SeqCst);
                    self.injected.mark_done_observed();
                    return None;
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            let unit = match serde_json::from_str::<UnitOfWork>(&line) {
                Ok(unit) => unit,
                Err(e) => {
                    tracing::warn!("Skipping malformed unit in {}: {}", self.input_path.display(), e);
                    continue;
                }
            };

            if unit.work_status() == WorkStatus::AllDone {
                self.input_exhausted.store(true, Ordering::SeqCst);
                self.injected.mark_done_observed();
                return None;
            }

            match self.replayed.get(unit.contents()) {
                Some(prior) if !self.reprocess.contains(prior) => {
                    tracing::trace!("Skipping already-processed unit ({})", prior);
                    continue;
                }
                _ => {
                    unit.set_work_status(WorkStatus::Initialized);
                    return Some(Arc::new(unit));
                }
            }
        }
    }

    /// Writes the end-of-stream sentinel and closes the output.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.output.lock().expect("output stream poisoned");
        if let Some(mut writer) = guard.take() {
            let sentinel = UnitOfWork::with_status("", WorkStatus::AllDone);
            let line = serde_json::to_string(&sentinel)?;
            writeln!(writer, "{}", line)?;
            writer.flush()?;
        }
        Ok(())
    }
}

#[async_trait]
impl WorkFactory for PersistedWorkFactory {
    async fn get_next(&self) -> NextWork {
        if let Some(unit) = self.injected.pop_front_injected() {
            return NextWork::Unit(unit);
        }

        if let Some(unit) = self.next_from_input() {
            self.injected.note_checked_out();
            return NextWork::Unit(unit);
        }

        if let Some(unit) = self.injected.pop_back_injected() {
            return NextWork::Unit(unit);
        }

        NextWork::Done
    }

    /// Releasing a unit persists it, whatever status it ended with.
    fn release(&self, unit: &UnitOfWork) {
        let mut guard = self.output.lock().expect("output stream poisoned");
        if let Some(writer) = guard.as_mut() {
            match serde_json::to_string(unit) {
                Ok(line) => {
                    if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
                        tracing::error!("Failed to persist unit: {}", e);
                    }
                }
                Err(e) => tracing::error!("Failed to serialize unit: {}", e),
            }
        } else {
            tracing::warn!("Release after close; unit not persisted");
        }
        drop(guard);
        self.injected.note_released();
    }

    fn is_complete(&self) -> bool {
        self.injected
            .complete(self.input_exhausted.load(Ordering::SeqCst))
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
