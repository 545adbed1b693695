//! Machine-Affinity Path Batch
//!
//! The concurrent structure behind batch-oriented work servers: path-like
//! work strings are classified by the machine that holds their data and kept
//! in one ordered queue per machine, so a requester is preferentially handed
//! work it can read locally. Queues drain concurrently from many
//! request-handling threads without coarse locking.
//!
//! Machine inference on the work key supports three conventions:
//! - `machine:path` — explicit machine prefix;
//! - `/mnt/<machine>/...` — the mount convention;
//! - `newMachine^origMachine...` — the path's data is a cached copy owned by
//!   `newMachine`, which is registered as a data-cache proxy.

use crate::batch::dispatch_log::DispatchLog;
use crate::error::Result;
use dashmap::{DashMap, DashSet};
use rand::Rng;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Machine bucket for work whose key carries no machine information.
pub const LOCAL_MACHINE: &str = "localhost";

/// Line prefixes ignored when loading a batch file.
const COMMENT_PREFIXES: [&str; 2] = ["#", "echo "];

/// How work is matched to requesting machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionPolicy {
    /// Work is freely shareable: any requester may take from any queue.
    Randomized,
    /// Requesters take their own queue first. A machine may drain non-cache
    /// queues to help finish, but never another cache owner's queue —
    /// unless `accept_help` also permits fully randomized fallback.
    OwnOnly { accept_help: bool },
}

/// Outcome of asking the batch for the next path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchNext {
    Path(String),
    /// Work remains, but none this requester is allowed to take right now.
    Waiting,
    /// The machine map is empty; the batch is complete.
    Done,
}

pub struct PathBatch {
    queues: DashMap<String, VecDeque<String>>,
    /// Work key -> full work string, for restart reconciliation.
    short_keys: DashMap<String, String>,
    cache_machines: DashSet<String>,
    outstanding: AtomicUsize,
    policy: DistributionPolicy,
}

/// The key of a work string is its first pipe-delimited field.
pub fn work_key(work: &str) -> &str {
    work.split('|').next().unwrap_or(work)
}

/// Classifies a work key: which machine's queue it belongs to, and whether
/// that machine is serving a cached copy.
fn infer_machine(key: &str) -> (String, bool) {
    if let Some((proxy, _)) = key.split_once('^') {
        if !proxy.is_empty() {
            return (proxy.to_string(), true);
        }
    }
    if let Some((machine, _)) = key.split_once(':') {
        if !machine.is_empty() && !machine.contains('/') {
            return (machine.to_string(), false);
        }
    }
    if let Some(rest) = key.strip_prefix("/mnt/") {
        if let Some(machine) = rest.split('/').next() {
            if !machine.is_empty() {
                return (machine.to_string(), false);
            }
        }
    }
    (LOCAL_MACHINE.to_string(), false)
}

impl PathBatch {
    pub fn new(policy: DistributionPolicy) -> Self {
        Self {
            queues: DashMap::new(),
            short_keys: DashMap::new(),
            cache_machines: DashSet::new(),
            outstanding: AtomicUsize::new(0),
            policy,
        }
    }

    /// Loads a batch input file: newline-delimited, pipe-delimited fields,
    /// first field being the machine-inference key. Comment/echo lines are
    /// ignored. Returns the number of paths added.
    pub fn load_file(&self, path: &Path) -> Result<usize> {
        let mut added = 0;
        for line in BufReader::new(File::open(path)?).lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if COMMENT_PREFIXES.iter().any(|p| trimmed.starts_with(p)) {
                continue;
            }
            self.add_path(trimmed);
            added += 1;
        }
        tracing::info!("Loaded {} path(s) from {}", added, path.display());
        Ok(added)
    }

    pub fn add_path(&self, work: &str) {
        let key = work_key(work);
        let (machine, cached) = infer_machine(key);
        if cached {
            self.cache_machines.insert(machine.clone());
        }

        self.queues
            .entry(machine)
            .or_default()
            .push_back(work.to_string());
        self.short_keys.insert(key.to_string(), work.to_string());
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    /// Removes one specific work string. Returns whether it was present.
    pub fn remove_path(&self, work: &str) -> bool {
        let key = work_key(work);
        let (machine, _) = infer_machine(key);

        let removed = match self.queues.get_mut(&machine) {
            Some(mut queue) => {
                if let Some(pos) = queue.iter().position(|w| w == work) {
                    queue.remove(pos);
                    true
                } else {
                    false
                }
            }
            None => false,
        };

        if removed {
            self.short_keys.remove(key);
            let _ = self
                .outstanding
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            self.evict_if_empty(&machine);
        }
        removed
    }

    /// Pops the head of one machine's queue, evicting the queue if that
    /// left it empty.
    fn pop_from(&self, machine: &str) -> Option<String> {
        let work = {
            let mut queue = self.queues.get_mut(machine)?;
            queue.pop_front()
        };

        match work {
            Some(work) => {
                self.short_keys.remove(work_key(&work));
                let _ = self
                    .outstanding
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
                self.evict_if_empty(machine);
                Some(work)
            }
            None => {
                // Observed empty: drop the queue so completion can be seen.
                self.evict_if_empty(machine);
                None
            }
        }
    }

    fn evict_if_empty(&self, machine: &str) {
        self.queues.remove_if(machine, |_, queue| queue.is_empty());
    }

    fn machines(&self) -> Vec<String> {
        self.queues.iter().map(|e| e.key().clone()).collect()
    }

    /// Random pop across the given machines, skipping any found empty.
    fn pick_random(&self, mut candidates: Vec<String>) -> Option<String> {
        while !candidates.is_empty() {
            let idx = rand::thread_rng().gen_range(0..candidates.len());
            let machine = candidates.swap_remove(idx);
            if let Some(work) = self.pop_from(&machine) {
                return Some(work);
            }
        }
        None
    }

    /// Hands out the next path for `requesting_machine` under the batch's
    /// distribution policy. `Done` is returned only once the machine map is
    /// completely empty.
    pub fn get_next(&self, requesting_machine: &str) -> BatchNext {
        let picked = match self.policy {
            DistributionPolicy::Randomized => self.pick_random(self.machines()),
            DistributionPolicy::OwnOnly { accept_help } => {
                self.pop_from(requesting_machine).or_else(|| {
                    let non_cache: Vec<String> = self
                        .machines()
                        .into_iter()
                        .filter(|m| m != requesting_machine && !self.cache_machines.contains(m))
                        .collect();
                    self.pick_random(non_cache).or_else(|| {
                        if accept_help {
                            // TODO: accept-help can hand one cache owner's
                            // work to another; needs per-owner accounting
                            // before it can be considered reliable.
                            self.pick_random(self.machines())
                        } else {
                            None
                        }
                    })
                })
            }
        };

        match picked {
            Some(work) => BatchNext::Path(work),
            None if self.queues.is_empty() => BatchNext::Done,
            None => BatchNext::Waiting,
        }
    }

    /// Drops every path whose key appears in a prior run's dispatch log.
    /// Returns how many paths were removed.
    pub fn remove_finished_work(&self, log_path: &Path) -> Result<usize> {
        let keys = DispatchLog::read_dispatched_keys(log_path)?;
        let mut removed = 0;
        for key in keys {
            let work = self.short_keys.get(&key).map(|entry| entry.value().clone());
            if let Some(work) = work {
                if self.remove_path(&work) {
                    removed += 1;
                }
            }
        }
        tracing::info!(
            "Restart reconciliation removed {} already-dispatched path(s)",
            removed
        );
        Ok(removed)
    }

    /// Live number of queued paths; always equals the sum of the per-machine
    /// queue lengths.
    pub fn get_remaining_estimate(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn is_complete(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn is_cache_machine(&self, machine: &str) -> bool {
        self.cache_machines.contains(machine)
    }

    pub fn machine_count(&self) -> usize {
        self.queues.len()
    }
}
