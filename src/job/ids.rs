//! Job Identity
//!
//! A job carries two identities. The `LocalJobId` is a small number scoped to
//! one node (or to a node-group name) and is what the per-node registry keys
//! on. The `GlobalJobId` lets one logical job be addressed uniformly across
//! the cluster while running under different local ids on different nodes:
//! it is simply a name plus a per-node-name map of local ids.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-node numeric job id, optionally scoped to a node or group name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalJobId {
    pub id: u64,
    /// Node or node-group name the id is scoped to; `None` means "this node".
    pub scope: Option<String>,
}

impl LocalJobId {
    pub fn new(id: u64) -> Self {
        Self { id, scope: None }
    }

    pub fn scoped(id: u64, scope: impl Into<String>) -> Self {
        Self {
            id,
            scope: Some(scope.into()),
        }
    }
}

impl std::fmt::Display for LocalJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}@{}", self.id, scope),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Cluster-wide logical identity: maps each node name to that node's local id
/// for the same logical job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalJobId {
    pub name: String,
    pub local_ids: HashMap<String, u64>,
}

impl GlobalJobId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            local_ids: HashMap::new(),
        }
    }

    pub fn with_local_id(mut self, node: impl Into<String>, id: u64) -> Self {
        self.local_ids.insert(node.into(), id);
        self
    }

    /// The local id this logical job runs under on the given node, if known.
    pub fn resolve(&self, node: &str) -> Option<u64> {
        self.local_ids.get(node).copied()
    }
}
