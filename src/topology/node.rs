//! Tree Nodes
//!
//! The master's view of the fleet is a four level tree
//! (topology -> data center -> rack -> data node). Every level exposes the same
//! small capability set through [`Node`]; only data nodes are leaves.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a tree node, unique among its siblings.
///
/// Data nodes use their `ip:port` address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeLevel {
    Topology,
    DataCenter,
    Rack,
    DataNode,
}

pub trait Node {
    fn id(&self) -> &NodeId;

    fn level(&self) -> NodeLevel;

    /// Volume slots hosted in this subtree.
    fn volume_count(&self) -> usize;

    /// Volume slots declared by the servers of this subtree.
    fn max_volume_count(&self) -> usize;

    /// Slots still available for new volumes. For interior nodes this is
    /// the sum over the children.
    fn free_space(&self) -> i64;

    fn children(&self) -> Vec<&dyn Node>;
}

/// Finds the candidate whose free-space range contains `draw`.
///
/// Candidates are laid end to end by their free space (prefix sum); the
/// returned remainder is the draw's offset inside the chosen candidate's range,
/// ready for the next level of the descent.
pub fn weighted_pick<'a, N: Node + ?Sized>(candidates: &[&'a N], draw: i64) -> Option<(&'a N, i64)> {
    let mut prefix = Vec::with_capacity(candidates.len());
    let mut total = 0i64;
    for candidate in candidates {
        total += candidate.free_space().max(0);
        prefix.push(total);
    }

    if draw < 0 || draw >= total {
        return None;
    }

    let idx = prefix.partition_point(|&end| end <= draw);
    let start = if idx == 0 { 0 } else { prefix[idx - 1] };
    Some((candidates[idx], draw - start))
}

/// Picks one candidate with probability proportional to its free space.
pub fn random_pick<'a, N: Node + ?Sized, R: Rng + ?Sized>(
    candidates: &[&'a N],
    rng: &mut R,
) -> Option<&'a N> {
    let total: i64 = candidates.iter().map(|c| c.free_space().max(0)).sum();
    if total <= 0 {
        return None;
    }
    weighted_pick(candidates, rng.gen_range(0..total)).map(|(node, _)| node)
}
