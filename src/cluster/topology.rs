//! Static Cluster Topology
//!
//! The orchestration core never discovers nodes on its own: topology is an
//! external collaborator. This module loads a fixed description of the
//! cluster from a JSON file and answers the two questions the core asks:
//! "where does this node name live" and "what is this node's position within
//! a named group".

use crate::error::{ClusterJobError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

/// A single addressable machine in the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEntry {
    pub name: String,
    pub http_addr: SocketAddr,
}

/// On-disk form of the topology file.
#[derive(Debug, Serialize, Deserialize)]
struct TopologyFile {
    nodes: Vec<NodeEntry>,
    #[serde(default)]
    groups: HashMap<String, Vec<String>>,
}

/// The cluster as this node sees it: a node-name map plus named node groups.
///
/// Group member order is significant — partition functions index into it.
#[derive(Debug)]
pub struct ClusterTopology {
    nodes: HashMap<String, NodeEntry>,
    groups: HashMap<String, Vec<String>>,
}

impl ClusterTopology {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let file: TopologyFile = serde_json::from_str(&raw)?;
        Self::from_parts(file.nodes, file.groups)
    }

    pub fn from_parts(
        nodes: Vec<NodeEntry>,
        groups: HashMap<String, Vec<String>>,
    ) -> Result<Self> {
        let node_map: HashMap<String, NodeEntry> = nodes
            .into_iter()
            .map(|entry| (entry.name.clone(), entry))
            .collect();

        // Every group member must be a known node; anything else is a broken
        // deployment file and aborts startup.
        for (group, members) in &groups {
            for member in members {
                if !node_map.contains_key(member) {
                    return Err(ClusterJobError::Config(format!(
                        "group '{}' references unknown node '{}'",
                        group, member
                    )));
                }
            }
        }

        Ok(Self {
            nodes: node_map,
            groups,
        })
    }

    pub fn node(&self, name: &str) -> Option<&NodeEntry> {
        self.nodes.get(name)
    }

    pub fn node_names(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    /// Ordered members of a named group, or `None` for an unknown group.
    pub fn group_members(&self, group: &str) -> Option<&[String]> {
        self.groups.get(group).map(|members| members.as_slice())
    }

    /// A node's index within a named group. This is the identity a job uses
    /// to work out "which slice of the group's work is mine".
    pub fn position_in_group(&self, group: &str, node: &str) -> Option<usize> {
        self.groups
            .get(group)
            .and_then(|members| members.iter().position(|member| member == node))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
