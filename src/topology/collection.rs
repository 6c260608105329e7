use super::node::NodeId;
use super::volume_layout::VolumeLayout;
use crate::storage::types::{ReplicationType, VolumeId};

use std::collections::HashMap;

/// A named group of volume layouts, one per replication policy.
#[derive(Debug, Clone)]
pub struct Collection {
    pub name: String,
    volume_size_limit: u64,
    layouts: HashMap<ReplicationType, VolumeLayout>,
}

impl Collection {
    pub fn new(name: &str, volume_size_limit: u64) -> Self {
        Self {
            name: name.to_string(),
            volume_size_limit,
            layouts: HashMap::new(),
        }
    }

    pub fn get_or_create_volume_layout(&mut self, replication: ReplicationType) -> &mut VolumeLayout {
        let name = &self.name;
        let limit = self.volume_size_limit;
        self.layouts
            .entry(replication)
            .or_insert_with(|| VolumeLayout::new(name, replication, limit))
    }

    pub fn volume_layout(&self, replication: ReplicationType) -> Option<&VolumeLayout> {
        self.layouts.get(&replication)
    }

    pub fn volume_layout_mut(&mut self, replication: ReplicationType) -> Option<&mut VolumeLayout> {
        self.layouts.get_mut(&replication)
    }

    pub fn layouts(&self) -> impl Iterator<Item = &VolumeLayout> {
        self.layouts.values()
    }

    pub fn lookup(&self, vid: VolumeId) -> Option<&[NodeId]> {
        self.layouts.values().find_map(|layout| layout.lookup(vid))
    }

    /// The policy under which `vid` is registered in this collection, if any.
    pub fn replication_of(&self, vid: VolumeId) -> Option<ReplicationType> {
        self.layouts
            .values()
            .find(|layout| layout.contains(vid))
            .map(|layout| layout.replication())
    }
}
