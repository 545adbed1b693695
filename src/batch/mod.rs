//! Batch Distribution Layer
//!
//! Machine-affinity distribution of path-like work plus the durable dispatch
//! log that makes batch servers restartable.
//!
//! ## Submodules
//! - **`path_batch`**: `PathBatch` — per-machine queues with machine
//!   inference, cache-proxy tracking and distribution policies.
//! - **`dispatch_log`**: `DispatchLog` — append-only record of every handed
//!   out work string, replayed on restart to drop already-dispatched work.

pub mod dispatch_log;
pub mod path_batch;

#[cfg(test)]
mod tests;
