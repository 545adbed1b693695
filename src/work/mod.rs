//! Work Distribution Primitives
//!
//! Everything below the job layer: the unit of work itself, the pluggable
//! factories that produce and recycle units, and the bounded pool that runs
//! them.
//!
//! ## Submodules
//! - **`unit`**: `UnitOfWork`/`WorkStatus` — payload-only identity plus a
//!   CAS-capable status cell.
//! - **`factory`**: the `WorkFactory` contract and the front/back injected
//!   queue machinery all variants share.
//! - **`basic`** / **`partitioned`** / **`persisted`** / **`client`**: the
//!   four factory strategies (in-memory list, multi-file round-robin,
//!   persisted stream with replay/dedup, remote pull from a work server).
//! - **`pool`**: `SimpleWorkPool`, the bounded executor with per-unit
//!   lifecycle hooks and reclaim-on-shutdown.

pub mod basic;
pub mod client;
pub mod factory;
pub mod partitioned;
pub mod persisted;
pub mod pool;
pub mod unit;

#[cfg(test)]
mod tests;
