//! Volume Layout
//!
//! Placement index for one (collection, replication policy) pair: which data
//! nodes hold each volume, which volumes still accept writes and which are
//! full. Replica lists hold data node ids only; the tree owns the nodes.

use super::node::NodeId;
use crate::error::{Error, Result};
use crate::storage::types::{ReplicationType, VolumeId, VolumeInfo};

use rand::Rng;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone)]
pub struct VolumeLayout {
    collection: String,
    replication: ReplicationType,
    volume_size_limit: u64,
    locations: HashMap<VolumeId, Vec<NodeId>>,
    writables: Vec<VolumeId>,
    full: BTreeSet<VolumeId>,
}

impl VolumeLayout {
    pub fn new(collection: &str, replication: ReplicationType, volume_size_limit: u64) -> Self {
        Self {
            collection: collection.to_string(),
            replication,
            volume_size_limit,
            locations: HashMap::new(),
            writables: Vec::new(),
            full: BTreeSet::new(),
        }
    }

    pub fn replication(&self) -> ReplicationType {
        self.replication
    }

    /// Adds `node` to the volume's replicas (once) and recomputes whether the
    /// volume may take writes.
    pub fn register_volume(&mut self, info: &VolumeInfo, node: &NodeId) {
        let replicas = self.locations.entry(info.id).or_default();
        if !replicas.contains(node) {
            replicas.push(node.clone());
        }

        if self.is_writable_candidate(info) {
            self.add_to_writable(info.id);
        } else {
            self.remove_from_writable(info.id);
        }
    }

    fn is_writable_candidate(&self, info: &VolumeInfo) -> bool {
        let replicas = self.locations.get(&info.id).map(|l| l.len()).unwrap_or(0);
        !self.full.contains(&info.id)
            && !info.read_only
            && info.size < self.volume_size_limit
            && replicas >= self.replication.copy_count()
    }

    fn add_to_writable(&mut self, vid: VolumeId) {
        if !self.writables.contains(&vid) {
            self.writables.push(vid);
        }
    }

    fn remove_from_writable(&mut self, vid: VolumeId) -> bool {
        let before = self.writables.len();
        self.writables.retain(|&v| v != vid);
        before != self.writables.len()
    }

    /// Drops one replica of `vid`. The volume stops taking writes once it has
    /// fewer live replicas than the policy needs, and is forgotten entirely
    /// when the last replica goes.
    pub fn set_volume_unavailable(&mut self, vid: VolumeId, node: &NodeId) -> bool {
        let Some(replicas) = self.locations.get_mut(&vid) else {
            return false;
        };
        let before = replicas.len();
        replicas.retain(|n| n != node);
        if replicas.len() == before {
            return false;
        }

        let remaining = replicas.len();
        if remaining < self.replication.copy_count() && self.remove_from_writable(vid) {
            tracing::info!(
                "Volume {} is no longer writable ({} of {} replicas left)",
                vid,
                remaining,
                self.replication.copy_count()
            );
        }
        if remaining == 0 {
            self.locations.remove(&vid);
            self.full.remove(&vid);
        }
        true
    }

    pub fn set_volume_full(&mut self, vid: VolumeId) -> bool {
        if !self.locations.contains_key(&vid) {
            return false;
        }
        self.remove_from_writable(vid);
        self.full.insert(vid)
    }

    /// Chooses a writable volume and returns it with its full replica list.
    ///
    /// With a data center, only volumes that have a replica there qualify;
    /// every (volume, replica in that data center) pair is equally likely.
    pub fn pick_for_write<R, F>(
        &self,
        count: u64,
        data_center: Option<&NodeId>,
        data_center_of: F,
        rng: &mut R,
    ) -> Result<(VolumeId, u64, Vec<NodeId>)>
    where
        R: Rng + ?Sized,
        F: Fn(&NodeId) -> Option<NodeId>,
    {
        if self.writables.is_empty() {
            return Err(self.no_writable());
        }

        let vid = match data_center {
            None => self.writables[rng.gen_range(0..self.writables.len())],
            Some(dc) => {
                let mut chosen = None;
                let mut counter = 0u32;
                for vid in &self.writables {
                    for node in self.locations.get(vid).into_iter().flatten() {
                        if data_center_of(node).as_ref() == Some(dc) {
                            counter += 1;
                            if rng.gen_range(0..counter) == 0 {
                                chosen = Some(*vid);
                            }
                        }
                    }
                }
                chosen.ok_or_else(|| self.no_writable())?
            }
        };

        match self.locations.get(&vid) {
            Some(replicas) if !replicas.is_empty() => Ok((vid, count, replicas.clone())),
            _ => {
                tracing::error!("Writable volume {} has no replica", vid);
                Err(self.no_writable())
            }
        }
    }

    fn no_writable(&self) -> Error {
        Error::NoWritableVolumes {
            collection: self.collection.clone(),
            replication: self.replication.to_string(),
        }
    }

    pub fn lookup(&self, vid: VolumeId) -> Option<&[NodeId]> {
        self.locations
            .get(&vid)
            .filter(|l| !l.is_empty())
            .map(|l| l.as_slice())
    }

    pub fn contains(&self, vid: VolumeId) -> bool {
        self.locations.contains_key(&vid)
    }

    pub fn is_writable(&self, vid: VolumeId) -> bool {
        self.writables.contains(&vid)
    }

    pub fn is_full(&self, vid: VolumeId) -> bool {
        self.full.contains(&vid)
    }

    pub fn writables(&self) -> &[VolumeId] {
        &self.writables
    }

    pub fn full_volumes(&self) -> impl Iterator<Item = &VolumeId> {
        self.full.iter()
    }

    pub fn volume_ids(&self) -> impl Iterator<Item = &VolumeId> {
        self.locations.keys()
    }
}
