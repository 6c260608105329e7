//! Volume Growth
//!
//! Creates new volumes when a layout runs out of writable ones. Placement
//! follows the replication code `xyz`: one main server, `z` more servers in
//! its rack, `y` servers in other racks of its data center and `x` servers in
//! other data centers. Every choice is weighted by free slots.
//!
//! Slots are reserved under the topology lock, the volume servers are asked
//! to allocate without it, and the result is registered (or the reservation
//! released) afterwards.

use super::data_center::DataCenter;
use super::data_node::{DataNode, Location};
use super::node::{Node, NodeId, random_pick};
use super::rack::Rack;
use super::state::TopologyState;
use super::topology::Topology;
use crate::error::{Error, Result};
use crate::net::{http_url, send_with_retry};
use crate::storage::Store;
use crate::storage::protocol::{AdminResponse, AssignVolumeRequest, ENDPOINT_ASSIGN_VOLUME};
use crate::storage::types::{ReplicationType, VolumeId, VolumeInfo};

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Asks one volume server to create an empty volume.
#[async_trait]
pub trait VolumeAllocator: Send + Sync {
    async fn allocate(
        &self,
        node: &Location,
        vid: VolumeId,
        collection: &str,
        replication: ReplicationType,
    ) -> anyhow::Result<()>;
}

pub struct HttpAllocator {
    http_client: reqwest::Client,
}

impl HttpAllocator {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl VolumeAllocator for HttpAllocator {
    async fn allocate(
        &self,
        node: &Location,
        vid: VolumeId,
        collection: &str,
        replication: ReplicationType,
    ) -> anyhow::Result<()> {
        let request = AssignVolumeRequest {
            volume: vid.to_string(),
            collection: collection.to_string(),
            replication: replication.to_string(),
        };
        let url = http_url(&node.url, ENDPOINT_ASSIGN_VOLUME);
        let response = send_with_retry(
            &url,
            || {
                self.http_client
                    .post(&url)
                    .query(&request)
                    .timeout(Duration::from_secs(5))
            },
            3,
        )
        .await?;

        let status = response.status();
        let body: AdminResponse = response.json().await.unwrap_or_default();
        if !status.is_success() || body.error.is_some() {
            return Err(anyhow::anyhow!(
                "assign volume {} on {} failed ({}): {}",
                vid,
                node.url,
                status,
                body.error.unwrap_or_default()
            ));
        }
        Ok(())
    }
}

/// Allocates straight into stores living in this process, keyed by url.
#[derive(Default)]
pub struct StoreAllocator {
    stores: DashMap<String, Arc<Store>>,
}

impl StoreAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_store(&self, store: Arc<Store>) {
        self.stores.insert(store.url(), store);
    }
}

#[async_trait]
impl VolumeAllocator for StoreAllocator {
    async fn allocate(
        &self,
        node: &Location,
        vid: VolumeId,
        collection: &str,
        replication: ReplicationType,
    ) -> anyhow::Result<()> {
        let store = self
            .stores
            .get(&node.url)
            .map(|s| s.value().clone())
            .ok_or_else(|| anyhow::anyhow!("unknown volume server {}", node.url))?;
        store.add_volume(vid, collection, replication)?;
        Ok(())
    }
}

pub struct VolumeGrowth {
    allocator: Arc<dyn VolumeAllocator>,
    /// One growth at a time; concurrent assigns would otherwise all grow.
    lock: Mutex<()>,
}

impl VolumeGrowth {
    pub fn new(allocator: Arc<dyn VolumeAllocator>) -> Self {
        Self {
            allocator,
            lock: Mutex::new(()),
        }
    }

    /// How many volumes one automatic growth creates.
    pub fn target_count(replication: ReplicationType) -> usize {
        match replication.copy_count() {
            1 => 7,
            2 => 6,
            _ => 3,
        }
    }

    /// Grows the layout unless a writable volume showed up while waiting
    /// for the growth lock.
    pub async fn grow_if_needed(
        &self,
        topology: &Topology,
        collection: &str,
        replication: ReplicationType,
        data_center: Option<&str>,
    ) -> Result<usize> {
        let _guard = self.lock.lock().await;

        let writable = topology
            .read(|state| {
                state
                    .volume_layout(collection, replication)
                    .is_some_and(|layout| !layout.writables().is_empty())
            })
            .await;
        if writable {
            return Ok(0);
        }

        self.grow_locked(
            topology,
            Self::target_count(replication),
            collection,
            replication,
            data_center,
        )
        .await
    }

    /// Creates up to `count` volumes. Fails only if not even one could be
    /// created.
    pub async fn grow_by_count(
        &self,
        topology: &Topology,
        count: usize,
        collection: &str,
        replication: ReplicationType,
        data_center: Option<&str>,
    ) -> Result<usize> {
        let _guard = self.lock.lock().await;
        self.grow_locked(topology, count, collection, replication, data_center)
            .await
    }

    async fn grow_locked(
        &self,
        topology: &Topology,
        count: usize,
        collection: &str,
        replication: ReplicationType,
        data_center: Option<&str>,
    ) -> Result<usize> {
        let mut grown = 0;
        for _ in 0..count {
            match self
                .grow_one(topology, collection, replication, data_center)
                .await
            {
                Ok(vid) => {
                    tracing::info!(
                        "Grew volume {} (collection {:?}, replication {})",
                        vid,
                        collection,
                        replication
                    );
                    grown += 1;
                }
                Err(e) if grown == 0 => return Err(e),
                Err(e) => {
                    tracing::warn!("Stopped growing after {} volumes: {}", grown, e);
                    break;
                }
            }
        }
        Ok(grown)
    }

    async fn grow_one(
        &self,
        topology: &Topology,
        collection: &str,
        replication: ReplicationType,
        data_center: Option<&str>,
    ) -> Result<VolumeId> {
        let (vid, servers) = topology
            .write(|state| -> Result<(VolumeId, Vec<(NodeId, Location)>)> {
                let nodes =
                    find_empty_slots(state, replication, data_center, &mut rand::thread_rng())?;
                let vid = state.next_volume_id();
                state.reserve_volume_on(&nodes, vid);
                let servers = nodes
                    .into_iter()
                    .filter_map(|id| {
                        let location = state.data_node(&id)?.location();
                        Some((id, location))
                    })
                    .collect();
                Ok((vid, servers))
            })
            .await?;

        let ids: Vec<NodeId> = servers.iter().map(|(id, _)| id.clone()).collect();

        for (id, location) in &servers {
            if let Err(e) = self
                .allocator
                .allocate(location, vid, collection, replication)
                .await
            {
                tracing::error!("Failed to allocate volume {} on {}: {}", vid, id, e);
                topology
                    .write(|state| state.release_reservation(&ids, vid))
                    .await;
                return Err(Error::Transport(e.to_string()));
            }
        }

        let info = VolumeInfo::new(vid, collection, replication);
        topology
            .write(|state| {
                for id in &ids {
                    if !state.add_volume_to_node(id, info.clone()) {
                        tracing::warn!(
                            "Data node {} left while volume {} was allocated, not registering it",
                            id,
                            vid
                        );
                        continue;
                    }
                    if let Err(e) = state.register_volume_layout(&info, id) {
                        tracing::error!("Failed to register grown volume {}: {}", vid, e);
                    }
                }
            })
            .await;

        Ok(vid)
    }
}

fn free_nodes(rack: &Rack) -> Vec<&DataNode> {
    rack.data_nodes().filter(|n| n.free_space() > 0).collect()
}

fn free_racks(dc: &DataCenter) -> Vec<&Rack> {
    dc.racks().filter(|r| r.free_space() > 0).collect()
}

/// Draws `n` distinct candidates, each weighted by free space.
fn pick_distinct<'a, N: Node + ?Sized, R: Rng + ?Sized>(
    mut candidates: Vec<&'a N>,
    n: usize,
    rng: &mut R,
) -> Option<Vec<&'a N>> {
    let mut picked = Vec::with_capacity(n);
    for _ in 0..n {
        let choice = random_pick(&candidates, rng)?;
        candidates.retain(|c| c.id() != choice.id());
        picked.push(choice);
    }
    Some(picked)
}

/// Any free data node under `dc`, descending by weight.
fn pick_node_in<'a, R: Rng + ?Sized>(dc: &'a DataCenter, rng: &mut R) -> Option<&'a DataNode> {
    let rack = random_pick(&free_racks(dc), rng)?;
    random_pick(&free_nodes(rack), rng)
}

/// Chooses the servers for one new volume of `replication`. The first
/// returned node is the main server.
pub fn find_empty_slots<R: Rng + ?Sized>(
    state: &TopologyState,
    replication: ReplicationType,
    data_center: Option<&str>,
    rng: &mut R,
) -> Result<Vec<NodeId>> {
    let other_dcs = replication.diff_data_center as usize;
    let other_racks = replication.diff_rack as usize;
    let same_rack = replication.same_rack as usize;
    let data_center = data_center.filter(|dc| !dc.is_empty());
    let no_space = |what: &str| Error::NoFreeSpace(format!("{} for replication {}", what, replication));

    let rack_fits = |rack: &Rack| free_nodes(rack).len() > same_rack;
    let dc_fits = |dc: &DataCenter| {
        free_racks(dc).len() > other_racks && dc.racks().any(|rack| rack_fits(rack))
    };

    let main_dc_candidates: Vec<&DataCenter> = state
        .data_centers()
        .filter(|dc| data_center.is_none_or(|name| dc.id().as_str() == name))
        .filter(|dc| dc_fits(*dc))
        .collect();
    let main_dc = random_pick(&main_dc_candidates, rng).ok_or_else(|| no_space("no data center"))?;

    let remote_dcs: Vec<&DataCenter> = state
        .data_centers()
        .filter(|dc| dc.id() != main_dc.id() && dc.free_space() > 0)
        .collect();
    if remote_dcs.len() < other_dcs {
        return Err(no_space("not enough data centers"));
    }

    let main_rack_candidates: Vec<&Rack> = main_dc.racks().filter(|r| rack_fits(*r)).collect();
    let main_rack = random_pick(&main_rack_candidates, rng).ok_or_else(|| no_space("no rack"))?;

    let rack_nodes = free_nodes(main_rack);
    let main_node = random_pick(&rack_nodes, rng).ok_or_else(|| no_space("no server"))?;
    let mut chosen = vec![main_node.id().clone()];

    let peers: Vec<&DataNode> = rack_nodes
        .into_iter()
        .filter(|n| n.id() != main_node.id())
        .collect();
    let peers = pick_distinct(peers, same_rack, rng).ok_or_else(|| no_space("rack too small"))?;
    chosen.extend(peers.into_iter().map(|n| n.id().clone()));

    let racks: Vec<&Rack> = free_racks(main_dc)
        .into_iter()
        .filter(|r| r.id() != main_rack.id())
        .collect();
    let racks = pick_distinct(racks, other_racks, rng).ok_or_else(|| no_space("not enough racks"))?;
    for rack in racks {
        let node = random_pick(&free_nodes(rack), rng).ok_or_else(|| no_space("rack"))?;
        chosen.push(node.id().clone());
    }

    let dcs = pick_distinct(remote_dcs, other_dcs, rng)
        .ok_or_else(|| no_space("not enough data centers"))?;
    for dc in dcs {
        let node = pick_node_in(dc, rng).ok_or_else(|| no_space("data center"))?;
        chosen.push(node.id().clone());
    }

    Ok(chosen)
}
