use crate::storage::types::VolumeInfo;
use crate::topology::NodeId;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Periodic report from a volume server: who it is, where it claims to live
/// and the full list of volumes it currently holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub ip: String,
    pub port: u16,
    pub public_url: String,
    pub max_volume_count: usize,
    #[serde(default)]
    pub data_center: String,
    #[serde(default)]
    pub rack: String,
    #[serde(default)]
    pub volumes: Vec<VolumeInfo>,
    /// First report after the server (re)started or lost contact.
    #[serde(default)]
    pub is_initial: bool,
}

/// Cluster state changes applied to the topology by a single consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum MembershipEvent {
    /// The server missed its heartbeats and is removed from the tree.
    Dead(NodeId),
    /// A server that was declared dead reported again.
    Recovered(NodeId),
    /// The volume reached the size limit.
    VolumeFull(VolumeInfo),
}

#[derive(Debug, Clone)]
pub struct EventSender {
    pub dead: mpsc::Sender<NodeId>,
    pub recovered: mpsc::Sender<NodeId>,
    pub full: mpsc::Sender<VolumeInfo>,
}

impl EventSender {
    /// Queues an event without waiting. Returns false when the consumer is
    /// gone or lagging by a full channel.
    pub fn try_send(&self, event: MembershipEvent) -> bool {
        let result = match event {
            MembershipEvent::Dead(id) => self.dead.try_send(id).map_err(|e| e.to_string()),
            MembershipEvent::Recovered(id) => {
                self.recovered.try_send(id).map_err(|e| e.to_string())
            }
            MembershipEvent::VolumeFull(info) => {
                self.full.try_send(info).map_err(|e| e.to_string())
            }
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Dropping membership event: {}", e);
                false
            }
        }
    }
}

#[derive(Debug)]
pub struct EventReceivers {
    dead: mpsc::Receiver<NodeId>,
    recovered: mpsc::Receiver<NodeId>,
    full: mpsc::Receiver<VolumeInfo>,
}

impl EventReceivers {
    /// Next event from any of the three channels, or `None` once every
    /// sender is gone.
    pub async fn recv(&mut self) -> Option<MembershipEvent> {
        tokio::select! {
            Some(id) = self.dead.recv() => Some(MembershipEvent::Dead(id)),
            Some(id) = self.recovered.recv() => Some(MembershipEvent::Recovered(id)),
            Some(info) = self.full.recv() => Some(MembershipEvent::VolumeFull(info)),
            else => None,
        }
    }

    /// Drains whatever is queued right now.
    pub fn try_recv(&mut self) -> Option<MembershipEvent> {
        if let Ok(id) = self.dead.try_recv() {
            return Some(MembershipEvent::Dead(id));
        }
        if let Ok(id) = self.recovered.try_recv() {
            return Some(MembershipEvent::Recovered(id));
        }
        self.full.try_recv().ok().map(MembershipEvent::VolumeFull)
    }
}

pub fn event_channels(capacity: usize) -> (EventSender, EventReceivers) {
    let (dead_tx, dead_rx) = mpsc::channel(capacity);
    let (recovered_tx, recovered_rx) = mpsc::channel(capacity);
    let (full_tx, full_rx) = mpsc::channel(capacity);

    (
        EventSender {
            dead: dead_tx,
            recovered: recovered_tx,
            full: full_tx,
        },
        EventReceivers {
            dead: dead_rx,
            recovered: recovered_rx,
            full: full_rx,
        },
    )
}
