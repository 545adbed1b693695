//! Cluster Job Orchestration Library
//!
//! This library crate defines the orchestration layer a cluster of peer nodes
//! runs on top of: every node carries the same binary, registers jobs into a
//! local registry, and serves work to the rest of the cluster over a small
//! text protocol.
//!
//! ## Architecture Modules
//! The system is composed of seven loosely coupled subsystems:
//!
//! - **`cluster`**: The cluster collaborators — a static topology loaded from
//!   a JSON file and the inter-node transport (request lines and file
//!   delivery over HTTP with bounded retries).
//! - **`job`**: The job lifecycle contract: the status state machine, local
//!   and global job identity, and the `Job` trait with its default command
//!   semantics.
//! - **`work`**: Work distribution primitives — the `UnitOfWork`, the
//!   pluggable `WorkFactory` family (in-memory, multi-file, persisted with
//!   replay, remote client), and the bounded `SimpleWorkPool`.
//! - **`batch`**: Machine-affinity distribution of path-like work
//!   (`PathBatch`) plus the durable dispatch log that makes batch servers
//!   restartable.
//! - **`server`**: The node's control surface: the pipe-delimited work
//!   protocol, the work-serving job types, and the axum handlers.
//! - **`manager`**: The per-node `JobManager` registry, the command
//!   vocabulary, and the named job-builder registry.
//! - **`pipeline`**: Multi-stage pipelines: the partition function and the
//!   steady-state stage job that pulls, processes, and forwards.

pub mod batch;
pub mod cluster;
pub mod error;
pub mod job;
pub mod manager;
pub mod pipeline;
pub mod server;
pub mod work;
