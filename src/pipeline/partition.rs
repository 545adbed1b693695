//! Partition Function
//!
//! Maps a record key to exactly one destination node of a named group. The
//! mapping is total over the key space and stable for the lifetime of the
//! function: the same key always lands on the same destination. An index
//! outside the destination list is a fatal configuration error, never a
//! wrap-around.

use crate::cluster::topology::ClusterTopology;
use crate::error::{ClusterJobError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStrategy {
    /// `|key| mod destinations`, total over all of `i64`.
    Modulo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionFunction {
    pub group: String,
    pub destinations: Vec<String>,
    pub strategy: PartitionStrategy,
}

impl PartitionFunction {
    pub fn new(group: impl Into<String>, destinations: Vec<String>) -> Self {
        Self {
            group: group.into(),
            destinations,
            strategy: PartitionStrategy::Modulo,
        }
    }

    /// Builds the function over a topology group's members, in group order.
    pub fn for_group(topology: &ClusterTopology, group: &str) -> Result<Self> {
        let members = topology
            .group_members(group)
            .map(<[String]>::to_vec)
            .unwrap_or_default();
        if members.is_empty() {
            return Err(ClusterJobError::Config(format!(
                "partition group '{}' has no members",
                group
            )));
        }
        Ok(Self::new(group, members))
    }

    pub fn destination_count(&self) -> usize {
        self.destinations.len()
    }

    pub fn destination_index(&self, key: i64) -> Result<usize> {
        if self.destinations.is_empty() {
            return Err(ClusterJobError::PartitionOutOfRange {
                group: self.group.clone(),
                index: 0,
                destinations: 0,
            });
        }
        match self.strategy {
            PartitionStrategy::Modulo => {
                Ok(key.rem_euclid(self.destinations.len() as i64) as usize)
            }
        }
    }

    /// The destination node at an explicit index. Out of range is fatal.
    pub fn destination_at(&self, index: usize) -> Result<&str> {
        self.destinations.get(index).map(String::as_str).ok_or_else(|| {
            ClusterJobError::PartitionOutOfRange {
                group: self.group.clone(),
                index,
                destinations: self.destinations.len(),
            }
        })
    }

    pub fn destination(&self, key: i64) -> Result<&str> {
        let index = self.destination_index(key)?;
        self.destination_at(index)
    }
}
