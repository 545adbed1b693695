//! Multi-File Partitioned Work Factory
//!
//! Serves units line-by-line from a set of files in one directory whose names
//! match a pattern, staying on one file until it is exhausted and then
//! rotating to the next. The factory remembers which file produced each
//! checked-out unit so `release` can be routed back to that file's
//! accounting.

use crate::error::{ClusterJobError, Result};
use crate::work::factory::{InjectedQueues, NextWork, WorkFactory};
use crate::work::unit::UnitOfWork;
use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct FileSource {
    path: PathBuf,
    lines: Mutex<Lines<BufReader<File>>>,
    exhausted: AtomicBool,
    outstanding: AtomicUsize,
}

impl FileSource {
    fn open(path: PathBuf) -> Result<Self> {
        let file = File::open(&path)?;
        Ok(Self {
            path,
            lines: Mutex::new(BufReader::new(file).lines()),
            exhausted: AtomicBool::new(false),
            outstanding: AtomicUsize::new(0),
        })
    }

    /// Next non-empty line, marking the source exhausted at EOF.
    fn next_line(&self) -> Option<String> {
        let mut guard = self.lines.lock().expect("file source poisoned");
        loop {
            match guard.next() {
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    return Some(line);
                }
                Some(Err(e)) => {
                    tracing::warn!("Read error in {}: {}", self.path.display(), e);
                    continue;
                }
                None => {
                    self.exhausted.store(true, Ordering::SeqCst);
                    return None;
                }
            }
        }
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::SeqCst)
    }
}

pub struct PartitionWorkFactory {
    sources: Vec<FileSource>,
    current: AtomicUsize,
    /// Payload -> index of the source that produced it, for release routing.
    origin: DashMap<String, usize>,
    injected: InjectedQueues,
}

impl PartitionWorkFactory {
    /// Opens every file in `dir` whose name matches `pattern` (a regular
    /// expression), in lexicographic name order.
    pub fn new(dir: &Path, pattern: &str) -> Result<Self> {
        let matcher = Regex::new(pattern)
            .map_err(|e| ClusterJobError::Config(format!("bad file pattern '{}': {}", pattern, e)))?;

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .map(|name| matcher.is_match(name))
                        .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let sources = paths
            .into_iter()
            .map(FileSource::open)
            .collect::<Result<Vec<_>>>()?;

        tracing::info!("Partition factory over {} file(s) in {}", sources.len(), dir.display());

        Ok(Self {
            sources,
            current: AtomicUsize::new(0),
            origin: DashMap::new(),
            injected: InjectedQueues::new(),
        })
    }

    fn all_exhausted(&self) -> bool {
        self.sources.iter().all(|s| s.is_exhausted())
    }

    fn next_from_sources(&self) -> Option<(String, usize)> {
        if self.sources.is_empty() {
            return None;
        }

        // Stay on the current file until it runs dry, then rotate.
        for _ in 0..self.sources.len() {
            let idx = self.current.load(Ordering::SeqCst) % self.sources.len();
            let source = &self.sources[idx];

            if !source.is_exhausted() {
                if let Some(line) = source.next_line() {
                    return Some((line, idx));
                }
            }
            self.current.store((idx + 1) % self.sources.len(), Ordering::SeqCst);
        }

        None
    }
}

#[async_trait]
impl WorkFactory for PartitionWorkFactory {
    async fn get_next(&self) -> NextWork {
        if let Some(unit) = self.injected.pop_front_injected() {
            return NextWork::Unit(unit);
        }

        if let Some((line, idx)) = self.next_from_sources() {
            let unit = Arc::new(UnitOfWork::new(line));
            self.origin.insert(unit.contents().to_string(), idx);
            self.sources[idx].outstanding.fetch_add(1, Ordering::SeqCst);
            self.injected.note_checked_out();
            return NextWork::Unit(unit);
        }

        if let Some(unit) = self.injected.pop_back_injected() {
            return NextWork::Unit(unit);
        }

        self.injected.mark_done_observed();
        NextWork::Done
    }

    fn release(&self, unit: &UnitOfWork) {
        if let Some((_, idx)) = self.origin.remove(unit.contents()) {
            let _ = self.sources[idx]
                .outstanding
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        }
        self.injected.note_released();
    }

    fn is_complete(&self) -> bool {
        self.injected.complete(self.all_exhausted())
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
