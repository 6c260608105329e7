use super::node::{Node, NodeId, NodeLevel, weighted_pick};
use super::rack::Rack;
use crate::storage::types::VolumeId;

use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct DataCenter {
    id: NodeId,
    racks: BTreeMap<NodeId, Rack>,
}

impl DataCenter {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            racks: BTreeMap::new(),
        }
    }

    pub fn get_or_create_rack(&mut self, name: &str) -> &mut Rack {
        let dc_id = self.id.clone();
        self.racks
            .entry(NodeId::from(name))
            .or_insert_with(|| Rack::new(NodeId::from(name), dc_id))
    }

    pub fn rack(&self, id: &NodeId) -> Option<&Rack> {
        self.racks.get(id)
    }

    pub fn rack_mut(&mut self, id: &NodeId) -> Option<&mut Rack> {
        self.racks.get_mut(id)
    }

    pub fn racks(&self) -> impl Iterator<Item = &Rack> {
        self.racks.values()
    }

    pub fn reserve_one_volume(&mut self, draw: i64, vid: VolumeId) -> Option<NodeId> {
        let candidates: Vec<&Rack> = self.racks.values().collect();
        let (rack, remainder) = weighted_pick(&candidates, draw)?;
        let rack_id = rack.id().clone();
        self.racks.get_mut(&rack_id)?.reserve_one_volume(remainder, vid)
    }
}

impl Node for DataCenter {
    fn id(&self) -> &NodeId {
        &self.id
    }

    fn level(&self) -> NodeLevel {
        NodeLevel::DataCenter
    }

    fn volume_count(&self) -> usize {
        self.racks.values().map(|r| r.volume_count()).sum()
    }

    fn max_volume_count(&self) -> usize {
        self.racks.values().map(|r| r.max_volume_count()).sum()
    }

    fn free_space(&self) -> i64 {
        self.racks.values().map(|r| r.free_space()).sum()
    }

    fn children(&self) -> Vec<&dyn Node> {
        self.racks.values().map(|r| r as &dyn Node).collect()
    }
}
