//! Topology State
//!
//! The master's whole view of the cluster: the data center / rack / data node
//! tree, the collections with their volume layouts and the highest volume id
//! ever seen. Everything here is synchronous and takes its randomness from
//! the caller; [`super::Topology`] wraps it in a lock.

use super::collection::Collection;
use super::data_center::DataCenter;
use super::data_node::{DataNode, Location};
use super::node::{Node, NodeId, NodeLevel, weighted_pick};
use super::volume_layout::VolumeLayout;
use crate::error::{Error, Result};
use crate::membership::types::Heartbeat;
use crate::storage::types::{ReplicationType, VolumeId, VolumeInfo};

use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

/// Result of ingesting one heartbeat.
#[derive(Debug, Default)]
pub struct Registration {
    pub node: Option<NodeId>,
    /// The server had been declared dead and is reporting again.
    pub recovered: bool,
    /// Reported volumes that reached the size limit and are not yet marked full.
    pub full_volumes: Vec<VolumeInfo>,
    /// Volumes refused because their id belongs to another layout.
    pub rejected: Vec<VolumeId>,
}

pub struct TopologyState {
    id: NodeId,
    volume_size_limit: u64,
    data_centers: BTreeMap<NodeId, DataCenter>,
    collections: HashMap<String, Collection>,
    /// Data node -> (data center, rack) holding it.
    placements: HashMap<NodeId, (NodeId, NodeId)>,
    dead_nodes: HashSet<NodeId>,
    max_volume_id: VolumeId,
}

impl TopologyState {
    pub fn new(id: &str, volume_size_limit: u64) -> Self {
        Self {
            id: NodeId::from(id),
            volume_size_limit,
            data_centers: BTreeMap::new(),
            collections: HashMap::new(),
            placements: HashMap::new(),
            dead_nodes: HashSet::new(),
            max_volume_id: VolumeId(0),
        }
    }

    pub fn volume_size_limit(&self) -> u64 {
        self.volume_size_limit
    }

    pub fn max_volume_id(&self) -> VolumeId {
        self.max_volume_id
    }

    pub fn get_or_create_data_center(&mut self, name: &str) -> &mut DataCenter {
        self.data_centers
            .entry(NodeId::from(name))
            .or_insert_with(|| DataCenter::new(NodeId::from(name)))
    }

    pub fn data_center(&self, id: &NodeId) -> Option<&DataCenter> {
        self.data_centers.get(id)
    }

    pub fn data_centers(&self) -> impl Iterator<Item = &DataCenter> {
        self.data_centers.values()
    }

    pub fn data_node(&self, id: &NodeId) -> Option<&DataNode> {
        let (dc, rack) = self.placements.get(id)?;
        self.data_centers.get(dc)?.rack(rack)?.data_node(id)
    }

    fn data_node_mut(&mut self, id: &NodeId) -> Option<&mut DataNode> {
        let (dc, rack) = self.placements.get(id)?;
        self.data_centers.get_mut(dc)?.rack_mut(rack)?.data_node_mut(id)
    }

    pub fn data_nodes(&self) -> impl Iterator<Item = &DataNode> {
        self.data_centers
            .values()
            .flat_map(|dc| dc.racks())
            .flat_map(|rack| rack.data_nodes())
    }

    pub fn data_center_of(&self, node: &NodeId) -> Option<NodeId> {
        self.placements.get(node).map(|(dc, _)| dc.clone())
    }

    pub fn is_dead(&self, node: &NodeId) -> bool {
        self.dead_nodes.contains(node)
    }

    /// Allocates the next volume id. Ids are never handed out twice, even
    /// after the volume is gone.
    pub fn next_volume_id(&mut self) -> VolumeId {
        self.max_volume_id = self.max_volume_id.next();
        self.max_volume_id
    }

    fn scoped_free_space(&self, data_center: Option<&str>) -> i64 {
        match data_center {
            Some(dc) => self
                .data_centers
                .get(&NodeId::from(dc))
                .map(|dc| dc.free_space())
                .unwrap_or(0),
            None => self.free_space(),
        }
    }

    /// Reserves one slot for a brand new volume, choosing the data node by a
    /// random descent weighted by free capacity.
    pub fn reserve_one_volume<R: Rng + ?Sized>(
        &mut self,
        data_center: Option<&str>,
        rng: &mut R,
    ) -> Result<(NodeId, VolumeId)> {
        let data_center = data_center.filter(|dc| !dc.is_empty());
        let free = self.scoped_free_space(data_center);
        if free <= 0 {
            let scope = data_center.unwrap_or(self.id.as_str()).to_string();
            tracing::info!("{} does not have free space left", scope);
            return Err(Error::NoFreeSpace(scope));
        }

        let draw = rng.gen_range(0..free);
        let (dc_id, offset) = match data_center {
            Some(dc) => (NodeId::from(dc), draw),
            None => {
                let candidates: Vec<&DataCenter> = self.data_centers.values().collect();
                let (dc, remainder) = weighted_pick(&candidates, draw)
                    .ok_or_else(|| Error::NoFreeSpace(self.id.to_string()))?;
                (dc.id().clone(), remainder)
            }
        };

        let vid = self.next_volume_id();
        let node = self
            .data_centers
            .get_mut(&dc_id)
            .and_then(|dc| dc.reserve_one_volume(offset, vid))
            .ok_or_else(|| Error::NoFreeSpace(dc_id.to_string()))?;

        Ok((node, vid))
    }

    /// Reserves `vid` on every node of an already chosen replica set.
    pub fn reserve_volume_on(&mut self, nodes: &[NodeId], vid: VolumeId) {
        for id in nodes {
            if let Some(node) = self.data_node_mut(id) {
                node.reserve(vid);
            }
        }
    }

    pub fn release_reservation(&mut self, nodes: &[NodeId], vid: VolumeId) {
        for id in nodes {
            if let Some(node) = self.data_node_mut(id) {
                node.release(vid);
            }
        }
    }

    /// Records a freshly allocated volume on its server, consuming the
    /// reservation made for it.
    pub fn add_volume_to_node(&mut self, id: &NodeId, info: VolumeInfo) -> bool {
        match self.data_node_mut(id) {
            Some(node) => {
                node.add_or_update_volume(info);
                true
            }
            None => false,
        }
    }

    pub fn get_volume_layout(
        &mut self,
        collection: &str,
        replication: ReplicationType,
    ) -> &mut VolumeLayout {
        let limit = self.volume_size_limit;
        self.collections
            .entry(collection.to_string())
            .or_insert_with(|| Collection::new(collection, limit))
            .get_or_create_volume_layout(replication)
    }

    fn volume_layout_mut(
        &mut self,
        collection: &str,
        replication: ReplicationType,
    ) -> Option<&mut VolumeLayout> {
        self.collections
            .get_mut(collection)?
            .volume_layout_mut(replication)
    }

    pub fn volume_layout(&self, collection: &str, replication: ReplicationType) -> Option<&VolumeLayout> {
        self.collections.get(collection)?.volume_layout(replication)
    }

    /// Volume ids are global: the same id may not live in two layouts.
    fn check_unique(&self, info: &VolumeInfo) -> Result<()> {
        for collection in self.collections.values() {
            if let Some(replication) = collection.replication_of(info.id)
                && (collection.name != info.collection || replication != info.replication)
            {
                return Err(Error::DuplicateVolume {
                    vid: info.id,
                    existing: format!("{}/{}", collection.name, replication),
                });
            }
        }
        Ok(())
    }

    pub fn register_volume_layout(&mut self, info: &VolumeInfo, node: &NodeId) -> Result<()> {
        self.check_unique(info)?;
        self.max_volume_id = self.max_volume_id.max(info.id);
        self.get_volume_layout(&info.collection, info.replication)
            .register_volume(info, node);
        Ok(())
    }

    /// Ingests a full volume inventory from one server.
    ///
    /// An initial report first evicts whatever the master remembered for that
    /// address, so volumes from before a restart cannot linger. Volumes the
    /// server stopped reporting are dropped from their layouts.
    pub fn register_volumes(
        &mut self,
        heartbeat: &Heartbeat,
        data_center: &str,
        rack: &str,
    ) -> Registration {
        let node_id = DataNode::id_for(&heartbeat.ip, heartbeat.port);
        let placement = (NodeId::from(data_center), NodeId::from(rack));

        let moved = self
            .placements
            .get(&node_id)
            .is_some_and(|current| current != &placement);
        if moved || (heartbeat.is_initial && self.placements.contains_key(&node_id)) {
            tracing::info!("Evicting previous registration of {}", node_id);
            self.unregister_data_node(&node_id);
        }

        let recovered = self.dead_nodes.remove(&node_id);

        let mut accepted = Vec::with_capacity(heartbeat.volumes.len());
        let mut rejected = Vec::new();
        for info in &heartbeat.volumes {
            match self.check_unique(info) {
                Ok(()) => accepted.push(info.clone()),
                Err(e) => {
                    tracing::error!("Rejecting volume {} from {}: {}", info.id, node_id, e);
                    rejected.push(info.id);
                }
            }
        }

        let missing: Vec<VolumeInfo> = {
            let node = self
                .get_or_create_data_center(data_center)
                .get_or_create_rack(rack)
                .get_or_create_data_node(
                    &heartbeat.ip,
                    heartbeat.port,
                    &heartbeat.public_url,
                    heartbeat.max_volume_count,
                );
            node.touch();

            let reported: HashSet<VolumeId> = accepted.iter().map(|v| v.id).collect();
            let missing: Vec<VolumeInfo> = node
                .volumes()
                .filter(|v| !reported.contains(&v.id))
                .cloned()
                .collect();
            for info in &missing {
                node.remove_volume(info.id);
            }
            for info in &accepted {
                node.add_or_update_volume(info.clone());
            }
            missing
        };
        self.placements.insert(node_id.clone(), placement);

        for info in missing {
            tracing::info!("Volume {} no longer reported by {}", info.id, node_id);
            if let Some(layout) = self.volume_layout_mut(&info.collection, info.replication) {
                layout.set_volume_unavailable(info.id, &node_id);
            }
        }

        let mut full_volumes = Vec::new();
        for info in &accepted {
            self.max_volume_id = self.max_volume_id.max(info.id);
            let limit = self.volume_size_limit;
            let layout = self.get_volume_layout(&info.collection, info.replication);
            layout.register_volume(info, &node_id);
            if info.size >= limit && !layout.is_full(info.id) {
                full_volumes.push(info.clone());
            }
        }

        Registration {
            node: Some(node_id),
            recovered,
            full_volumes,
            rejected,
        }
    }

    /// Removes a data node from its rack and from every layout listing it.
    pub fn unregister_data_node(&mut self, id: &NodeId) -> Option<DataNode> {
        let (dc, rack) = self.placements.remove(id)?;
        let node = self
            .data_centers
            .get_mut(&dc)?
            .rack_mut(&rack)?
            .remove_data_node(id)?;

        for info in node.volumes() {
            if let Some(layout) = self.volume_layout_mut(&info.collection, info.replication) {
                layout.set_volume_unavailable(info.id, id);
            }
        }

        tracing::info!(
            "Data node {} removed from {}/{} ({} volumes)",
            id,
            dc,
            rack,
            node.volumes().count()
        );
        Some(node)
    }

    pub fn mark_dead(&mut self, id: &NodeId) -> bool {
        if self.unregister_data_node(id).is_some() {
            self.dead_nodes.insert(id.clone());
            true
        } else {
            false
        }
    }

    /// Evicts the node only if it is still silent for longer than `timeout`.
    /// A heartbeat that raced the failure detector keeps the node alive.
    pub fn mark_dead_if_silent(&mut self, id: &NodeId, timeout: Duration) -> bool {
        let silent = self
            .data_node(id)
            .is_some_and(|node| node.last_seen.elapsed() > timeout);
        if !silent {
            tracing::debug!("Data node {} reported again, keeping it", id);
            return false;
        }
        self.mark_dead(id)
    }

    /// Puts every volume of a known node back into its layout.
    pub fn reregister_data_node(&mut self, id: &NodeId) -> bool {
        let Some(node) = self.data_node(id) else {
            return false;
        };
        let volumes: Vec<VolumeInfo> = node.volumes().cloned().collect();
        for info in &volumes {
            if let Err(e) = self.register_volume_layout(info, id) {
                tracing::error!("Failed to re-register volume {} on {}: {}", info.id, id, e);
            }
        }
        true
    }

    pub fn set_volume_full(&mut self, info: &VolumeInfo) -> bool {
        let changed = self
            .volume_layout_mut(&info.collection, info.replication)
            .map(|layout| layout.set_volume_full(info.id))
            .unwrap_or(false);
        if changed {
            tracing::info!("Volume {} is full ({} bytes)", info.id, info.size);
        }
        changed
    }

    /// All replicas of `vid`. An empty collection searches every collection.
    pub fn lookup(&self, collection: &str, vid: VolumeId) -> Option<Vec<Location>> {
        let replicas = if collection.is_empty() {
            self.collections.values().find_map(|c| c.lookup(vid))
        } else {
            self.collections.get(collection)?.lookup(vid)
        }?;

        let locations: Vec<Location> = replicas
            .iter()
            .filter_map(|id| self.data_node(id))
            .map(|node| node.location())
            .collect();

        if locations.is_empty() { None } else { Some(locations) }
    }

    /// Chooses a writable volume for `count` new needles. The first entry
    /// of the returned replicas is the primary.
    pub fn pick_for_write<R: Rng + ?Sized>(
        &mut self,
        collection: &str,
        replication: ReplicationType,
        count: u64,
        data_center: Option<&str>,
        rng: &mut R,
    ) -> Result<(VolumeId, u64, Vec<Location>)> {
        let data_center = data_center.filter(|dc| !dc.is_empty()).map(NodeId::from);
        let limit = self.volume_size_limit;
        let placements = &self.placements;

        let layout = self
            .collections
            .entry(collection.to_string())
            .or_insert_with(|| Collection::new(collection, limit))
            .get_or_create_volume_layout(replication);

        let (vid, count, replicas) = layout.pick_for_write(
            count,
            data_center.as_ref(),
            |node| placements.get(node).map(|(dc, _)| dc.clone()),
            rng,
        )?;

        let locations: Vec<Location> = replicas
            .iter()
            .filter_map(|id| self.data_node(id))
            .map(|node| node.location())
            .collect();

        if locations.is_empty() {
            return Err(Error::NoWritableVolumes {
                collection: collection.to_string(),
                replication: replication.to_string(),
            });
        }
        Ok((vid, count, locations))
    }

    /// Data nodes not heard from within `timeout`.
    pub fn stale_data_nodes(&self, timeout: Duration) -> Vec<NodeId> {
        self.data_nodes()
            .filter(|node| node.last_seen.elapsed() > timeout)
            .map(|node| node.id().clone())
            .collect()
    }

    pub fn status(&self) -> TopologyStatus {
        let mut layouts: Vec<LayoutStatus> = self
            .collections
            .values()
            .flat_map(|c| {
                c.layouts().map(move |layout| {
                    let mut writables = layout.writables().to_vec();
                    writables.sort();
                    let mut volumes: Vec<VolumeId> = layout.volume_ids().copied().collect();
                    volumes.sort();
                    LayoutStatus {
                        collection: c.name.clone(),
                        replication: layout.replication().to_string(),
                        volumes,
                        writables,
                        full: layout.full_volumes().copied().collect(),
                    }
                })
            })
            .collect();
        layouts.sort_by(|a, b| {
            (a.collection.as_str(), a.replication.as_str())
                .cmp(&(b.collection.as_str(), b.replication.as_str()))
        });

        TopologyStatus {
            max_volume_id: self.max_volume_id,
            tree: NodeStatus::from_node(self),
            layouts,
        }
    }
}

impl Node for TopologyState {
    fn id(&self) -> &NodeId {
        &self.id
    }

    fn level(&self) -> NodeLevel {
        NodeLevel::Topology
    }

    fn volume_count(&self) -> usize {
        self.data_centers.values().map(|dc| dc.volume_count()).sum()
    }

    fn max_volume_count(&self) -> usize {
        self.data_centers.values().map(|dc| dc.max_volume_count()).sum()
    }

    fn free_space(&self) -> i64 {
        self.data_centers.values().map(|dc| dc.free_space()).sum()
    }

    fn children(&self) -> Vec<&dyn Node> {
        self.data_centers.values().map(|dc| dc as &dyn Node).collect()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub id: NodeId,
    pub level: NodeLevel,
    pub volumes: usize,
    pub max: usize,
    pub free: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeStatus>,
}

impl NodeStatus {
    pub fn from_node(node: &dyn Node) -> Self {
        Self {
            id: node.id().clone(),
            level: node.level(),
            volumes: node.volume_count(),
            max: node.max_volume_count(),
            free: node.free_space(),
            children: node.children().into_iter().map(NodeStatus::from_node).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutStatus {
    pub collection: String,
    pub replication: String,
    pub volumes: Vec<VolumeId>,
    pub writables: Vec<VolumeId>,
    pub full: Vec<VolumeId>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyStatus {
    pub max_volume_id: VolumeId,
    pub tree: NodeStatus,
    pub layouts: Vec<LayoutStatus>,
}
