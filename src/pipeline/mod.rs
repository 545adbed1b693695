//! Multi-Stage Pipelines
//!
//! Wiring for chains of jobs where each stage consumes files produced by the
//! previous one on possibly different nodes.
//!
//! ## Submodules
//! - **`partition`**: `PartitionFunction` — total, stable key-to-destination
//!   mapping over a topology group.
//! - **`steady_state`**: `SteadyStateJob` — the long-lived stage job that
//!   pulls, processes, and forwards, with real suspension.

pub mod partition;
pub mod steady_state;
