use super::node::{Node, NodeId, NodeLevel};
use crate::storage::types::{VolumeId, VolumeInfo};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

/// Where clients and peers reach one replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub url: String,
    pub public_url: String,
}

/// One volume server as known by the master.
#[derive(Debug, Clone)]
pub struct DataNode {
    id: NodeId,
    pub ip: String,
    pub port: u16,
    pub public_url: String,
    pub max_volume_count: usize,
    pub data_center: NodeId,
    pub rack: NodeId,
    pub last_seen: Instant,
    volumes: BTreeMap<VolumeId, VolumeInfo>,
    /// Slots claimed by an in-flight volume growth.
    reserved: BTreeSet<VolumeId>,
}

impl DataNode {
    pub fn new(
        ip: &str,
        port: u16,
        public_url: &str,
        max_volume_count: usize,
        data_center: NodeId,
        rack: NodeId,
    ) -> Self {
        Self {
            id: Self::id_for(ip, port),
            ip: ip.to_string(),
            port,
            public_url: public_url.to_string(),
            max_volume_count,
            data_center,
            rack,
            last_seen: Instant::now(),
            volumes: BTreeMap::new(),
            reserved: BTreeSet::new(),
        }
    }

    pub fn id_for(ip: &str, port: u16) -> NodeId {
        NodeId(format!("{}:{}", ip, port))
    }

    pub fn url(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn location(&self) -> Location {
        Location {
            url: self.url(),
            public_url: self.public_url.clone(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn add_or_update_volume(&mut self, info: VolumeInfo) {
        self.reserved.remove(&info.id);
        self.volumes.insert(info.id, info);
    }

    pub fn remove_volume(&mut self, vid: VolumeId) -> Option<VolumeInfo> {
        self.volumes.remove(&vid)
    }

    pub fn has_volume(&self, vid: VolumeId) -> bool {
        self.volumes.contains_key(&vid)
    }

    pub fn volumes(&self) -> impl Iterator<Item = &VolumeInfo> {
        self.volumes.values()
    }

    pub fn reserve(&mut self, vid: VolumeId) {
        self.reserved.insert(vid);
    }

    pub fn release(&mut self, vid: VolumeId) {
        self.reserved.remove(&vid);
    }

    pub fn reserved(&self) -> impl Iterator<Item = &VolumeId> {
        self.reserved.iter()
    }
}

impl Node for DataNode {
    fn id(&self) -> &NodeId {
        &self.id
    }

    fn level(&self) -> NodeLevel {
        NodeLevel::DataNode
    }

    fn volume_count(&self) -> usize {
        self.volumes.len() + self.reserved.len()
    }

    fn max_volume_count(&self) -> usize {
        self.max_volume_count
    }

    fn free_space(&self) -> i64 {
        self.max_volume_count as i64 - self.volume_count() as i64
    }

    fn children(&self) -> Vec<&dyn Node> {
        Vec::new()
    }
}
