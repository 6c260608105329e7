use super::configuration::{Configuration, locate};
use super::data_node::Location;
use super::node::NodeId;
use super::state::{Registration, TopologyState, TopologyStatus};
use crate::error::{Error, Result};
use crate::membership::types::{
    EVENT_CHANNEL_CAPACITY, EventReceivers, EventSender, Heartbeat, MembershipEvent,
    event_channels,
};
use crate::sequence::Sequencer;
use crate::storage::types::{FileId, ReplicationType, VolumeId, VolumeInfo};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Heartbeats missed before a server is declared dead.
pub const MISSED_PULSES: u32 = 3;

/// A file id handed to a client together with where to upload it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub fid: FileId,
    pub count: u64,
    pub location: Location,
    pub replicas: Vec<Location>,
}

/// The master's cluster view shared by request handlers, the heartbeat
/// ingestion and the membership consumer.
pub struct Topology {
    state: RwLock<TopologyState>,
    sequence: Arc<dyn Sequencer>,
    configuration: Option<Configuration>,
    events: EventSender,
    volume_size_limit: u64,
    pulse: Duration,
}

impl Topology {
    pub fn new(
        id: &str,
        volume_size_limit: u64,
        pulse: Duration,
        sequence: Arc<dyn Sequencer>,
        configuration: Option<Configuration>,
    ) -> (Arc<Self>, EventReceivers) {
        let (events, receivers) = event_channels(EVENT_CHANNEL_CAPACITY);
        let topology = Arc::new(Self {
            state: RwLock::new(TopologyState::new(id, volume_size_limit)),
            sequence,
            configuration,
            events,
            volume_size_limit,
            pulse,
        });
        (topology, receivers)
    }

    pub fn volume_size_limit(&self) -> u64 {
        self.volume_size_limit
    }

    pub fn pulse(&self) -> Duration {
        self.pulse
    }

    pub fn events(&self) -> &EventSender {
        &self.events
    }

    pub fn sequence(&self) -> &Arc<dyn Sequencer> {
        &self.sequence
    }

    /// Runs `f` under the read lock.
    pub async fn read<T>(&self, f: impl FnOnce(&TopologyState) -> T) -> T {
        let state = self.state.read().await;
        f(&state)
    }

    /// Runs `f` under the write lock.
    pub async fn write<T>(&self, f: impl FnOnce(&mut TopologyState) -> T) -> T {
        let mut state = self.state.write().await;
        f(&mut state)
    }

    pub async fn lookup(&self, collection: &str, vid: VolumeId) -> Option<Vec<Location>> {
        self.read(|state| state.lookup(collection, vid)).await
    }

    pub async fn reserve_one_volume(&self, data_center: Option<&str>) -> Result<(NodeId, VolumeId)> {
        self.write(|state| state.reserve_one_volume(data_center, &mut rand::thread_rng()))
            .await
    }

    /// Picks a writable volume and mints the file id for the first of
    /// `count` consecutive keys.
    pub async fn pick_for_write(
        &self,
        collection: &str,
        replication: ReplicationType,
        count: u64,
        data_center: Option<&str>,
    ) -> Result<Assignment> {
        let (vid, count, replicas) = self
            .write(|state| {
                state.pick_for_write(
                    collection,
                    replication,
                    count,
                    data_center,
                    &mut rand::thread_rng(),
                )
            })
            .await?;

        let location = replicas.first().cloned().ok_or_else(|| Error::NoWritableVolumes {
            collection: collection.to_string(),
            replication: replication.to_string(),
        })?;

        let (key, count) = self.sequence.next_file_id(count);
        let cookie: u32 = rand::random();

        Ok(Assignment {
            fid: FileId::new(vid, key, cookie),
            count,
            location,
            replicas,
        })
    }

    /// Ingests one heartbeat. Membership events raised by the report are
    /// queued after the lock is released.
    pub async fn register_volumes(&self, heartbeat: &Heartbeat) -> Registration {
        let (data_center, rack) = locate(
            self.configuration.as_ref(),
            &heartbeat.ip,
            &heartbeat.data_center,
            &heartbeat.rack,
        );

        let registration = self
            .write(|state| state.register_volumes(heartbeat, &data_center, &rack))
            .await;

        if let Some(max_key) = heartbeat.volumes.iter().map(|v| v.max_file_key).max() {
            self.sequence.set_max(max_key);
        }

        if let Some(node) = &registration.node
            && registration.recovered
        {
            self.events.try_send(MembershipEvent::Recovered(node.clone()));
        }
        for info in &registration.full_volumes {
            self.events.try_send(MembershipEvent::VolumeFull(info.clone()));
        }

        registration
    }

    pub async fn unregister_data_node(&self, id: &NodeId) -> bool {
        self.write(|state| state.unregister_data_node(id).is_some()).await
    }

    /// Applies one membership event to the tree and layouts.
    pub async fn apply_event(&self, event: MembershipEvent) {
        match event {
            MembershipEvent::Dead(id) => {
                let timeout = self.pulse * MISSED_PULSES;
                if self.write(|state| state.mark_dead_if_silent(&id, timeout)).await {
                    tracing::warn!("Data node {} is dead, its volumes are unavailable", id);
                }
            }
            MembershipEvent::Recovered(id) => {
                if self.write(|state| state.reregister_data_node(&id)).await {
                    tracing::info!("Data node {} recovered", id);
                }
            }
            MembershipEvent::VolumeFull(info) => {
                self.set_volume_full(&info).await;
            }
        }
    }

    pub async fn set_volume_full(&self, info: &VolumeInfo) -> bool {
        self.write(|state| state.set_volume_full(info)).await
    }

    /// Data nodes that missed [`MISSED_PULSES`] heartbeats.
    pub async fn stale_data_nodes(&self) -> Vec<NodeId> {
        let timeout = self.pulse * MISSED_PULSES;
        self.read(|state| state.stale_data_nodes(timeout)).await
    }

    pub async fn status(&self) -> TopologyStatus {
        self.read(|state| state.status()).await
    }
}
