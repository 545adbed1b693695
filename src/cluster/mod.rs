//! Cluster Collaborators
//!
//! The orchestration core depends on the rest of the cluster only through two
//! narrow interfaces, both defined here:
//!
//! - **`topology`**: a static description of the cluster (node addresses and
//!   named node groups) loaded at startup from a JSON file.
//! - **`transport`**: "send a request line to a job on a node and get a
//!   response within a timeout" plus "deliver a file to a node" — the whole
//!   messaging surface the core is allowed to assume.

pub mod topology;
pub mod transport;

use crate::cluster::topology::ClusterTopology;
use crate::cluster::transport::MessageSender;
use std::sync::Arc;

/// Everything a job learns about the cluster when it is handed to a node.
pub struct ClusterContext {
    pub node_name: String,
    pub topology: Arc<ClusterTopology>,
    pub transport: Arc<dyn MessageSender>,
}

impl ClusterContext {
    pub fn new(
        node_name: impl Into<String>,
        topology: Arc<ClusterTopology>,
        transport: Arc<dyn MessageSender>,
    ) -> Arc<Self> {
        Arc::new(Self {
            node_name: node_name.into(),
            topology,
            transport,
        })
    }
}
