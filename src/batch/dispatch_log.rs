//! Durable Dispatch Log
//!
//! Every successful `get` a work server answers is appended here *before* the
//! work string leaves the node. The file doubles as an audit trail and as the
//! restart-reconciliation source: on restart, every key found in the prior
//! run's log is dropped from the freshly loaded batch.
//!
//! Line format: `workString|dispatchEpochMillis|requestingNodeId|humanTime`.
//! The work string may itself contain pipes, which is why readers parse the
//! trailing fields from the right.

use crate::error::Result;
use crate::work::unit::now_ms;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct DispatchLog {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl DispatchLog {
    /// Opens the log for appending, creating it if needed.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one dispatch record and flushes it to disk. Called before the
    /// work string is handed to the requester.
    pub fn record(&self, work: &str, requesting_node: &str) -> Result<()> {
        let human = Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let line = format!("{}|{}|{}|{}", work, now_ms(), requesting_node, human);

        let mut guard = self.writer.lock().expect("dispatch log poisoned");
        if let Some(writer) = guard.as_mut() {
            writeln!(writer, "{}", line)?;
            writer.flush()?;
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        let mut guard = self.writer.lock().expect("dispatch log poisoned");
        if let Some(writer) = guard.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    /// Flushes and closes the log; later records are dropped.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.writer.lock().expect("dispatch log poisoned");
        if let Some(mut writer) = guard.take() {
            writer.flush()?;
        }
        Ok(())
    }

    /// Reads the work keys recorded in a prior run's log. The key of a work
    /// string is its first pipe-delimited field, which is also the first
    /// field of the whole line.
    pub fn read_dispatched_keys(path: &Path) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for line in BufReader::new(File::open(path)?).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            // A well-formed record has at least the three trailing fields.
            if line.rsplitn(4, '|').count() < 4 {
                tracing::warn!("Skipping malformed dispatch record: {}", line);
                continue;
            }
            if let Some(key) = line.split('|').next() {
                keys.push(key.to_string());
            }
        }
        Ok(keys)
    }
}
