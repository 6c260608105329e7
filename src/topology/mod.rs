//! Cluster Topology
//!
//! The master's model of where every volume lives.
//!
//! ## Structure
//! - **Tree**: topology -> data center -> rack -> data node, each level
//!   aggregating the free volume slots of its children.
//! - **Layouts**: per (collection, replication) index of volume replicas and
//!   of the volumes currently accepting writes.
//! - **Growth**: placement of new volumes honouring the replication code.
//!
//! All of it sits behind one `RwLock` in [`Topology`]; heartbeats, assigns,
//! lookups and membership events serialize through it.

pub mod collection;
pub mod configuration;
pub mod data_center;
pub mod data_node;
pub mod growth;
pub mod node;
pub mod rack;
pub mod state;
#[allow(clippy::module_inception)]
pub mod topology;
pub mod volume_layout;

pub use configuration::{Configuration, DEFAULT_DATA_CENTER, DEFAULT_RACK};
pub use data_node::{DataNode, Location};
pub use growth::{HttpAllocator, StoreAllocator, VolumeAllocator, VolumeGrowth};
pub use node::{Node, NodeId, NodeLevel};
pub use state::{Registration, TopologyState, TopologyStatus};
pub use topology::{Assignment, MISSED_PULSES, Topology};

#[cfg(test)]
mod tests;
