use super::data_node::DataNode;
use super::node::{Node, NodeId, NodeLevel, weighted_pick};
use crate::storage::types::VolumeId;

use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct Rack {
    id: NodeId,
    pub data_center: NodeId,
    data_nodes: BTreeMap<NodeId, DataNode>,
}

impl Rack {
    pub fn new(id: NodeId, data_center: NodeId) -> Self {
        Self {
            id,
            data_center,
            data_nodes: BTreeMap::new(),
        }
    }

    pub fn find_data_node(&self, ip: &str, port: u16) -> Option<&DataNode> {
        self.data_nodes.get(&DataNode::id_for(ip, port))
    }

    pub fn data_node(&self, id: &NodeId) -> Option<&DataNode> {
        self.data_nodes.get(id)
    }

    pub fn data_node_mut(&mut self, id: &NodeId) -> Option<&mut DataNode> {
        self.data_nodes.get_mut(id)
    }

    pub fn data_nodes(&self) -> impl Iterator<Item = &DataNode> {
        self.data_nodes.values()
    }

    /// Fetches the node for `ip:port`, creating it on first contact. Address
    /// and capacity are refreshed from the latest report.
    pub fn get_or_create_data_node(
        &mut self,
        ip: &str,
        port: u16,
        public_url: &str,
        max_volume_count: usize,
    ) -> &mut DataNode {
        let id = DataNode::id_for(ip, port);
        let rack_id = self.id.clone();
        let dc_id = self.data_center.clone();

        let node = self.data_nodes.entry(id).or_insert_with(|| {
            tracing::info!("Data node {}:{} joined rack {}/{}", ip, port, dc_id, rack_id);
            DataNode::new(ip, port, public_url, max_volume_count, dc_id, rack_id)
        });
        node.public_url = public_url.to_string();
        node.max_volume_count = max_volume_count;
        node
    }

    pub fn remove_data_node(&mut self, id: &NodeId) -> Option<DataNode> {
        self.data_nodes.remove(id)
    }

    /// Continues the weighted descent: `draw` lies in `[0, free_space)`.
    pub fn reserve_one_volume(&mut self, draw: i64, vid: VolumeId) -> Option<NodeId> {
        let candidates: Vec<&DataNode> = self.data_nodes.values().collect();
        let (node, _) = weighted_pick(&candidates, draw)?;
        let id = node.id().clone();

        let node = self.data_nodes.get_mut(&id)?;
        node.reserve(vid);
        tracing::debug!("Reserved volume {} on {}", vid, id);
        Some(id)
    }
}

impl Node for Rack {
    fn id(&self) -> &NodeId {
        &self.id
    }

    fn level(&self) -> NodeLevel {
        NodeLevel::Rack
    }

    fn volume_count(&self) -> usize {
        self.data_nodes.values().map(|n| n.volume_count()).sum()
    }

    fn max_volume_count(&self) -> usize {
        self.data_nodes.values().map(|n| n.max_volume_count()).sum()
    }

    fn free_space(&self) -> i64 {
        self.data_nodes.values().map(|n| n.free_space()).sum()
    }

    fn children(&self) -> Vec<&dyn Node> {
        self.data_nodes.values().map(|n| n as &dyn Node).collect()
    }
}
