use std::sync::Arc;

use super::types::{EventReceivers, MembershipEvent};
use crate::topology::Topology;

/// Watches heartbeats on the master and applies membership events.
///
/// Two background tasks:
/// - the health check, which declares data nodes dead once they missed
///   enough pulses;
/// - the single consumer of the dead / recovered / full channels.
pub struct MembershipMonitor {
    topology: Arc<Topology>,
}

impl MembershipMonitor {
    pub fn new(topology: Arc<Topology>) -> Arc<Self> {
        Arc::new(Self { topology })
    }

    pub async fn start(self: Arc<Self>, receivers: EventReceivers) {
        tracing::info!(
            "Starting membership monitor (pulse {:?})",
            self.topology.pulse()
        );

        let _detection_handle = {
            let monitor = self.clone();
            tokio::spawn(async move {
                monitor.failure_detection_loop().await;
            })
        };

        let _event_handle = {
            let monitor = self.clone();
            tokio::spawn(async move {
                monitor.event_loop(receivers).await;
            })
        };
    }

    async fn failure_detection_loop(self: Arc<Self>) {
        let pulse = self.topology.pulse();
        if pulse.is_zero() {
            tracing::error!("Zero pulse, failure detection disabled");
            return;
        }
        let mut interval = tokio::time::interval(pulse);

        loop {
            interval.tick().await;
            self.detect_failures().await;
        }
    }

    /// One health check round. Returns the nodes reported dead.
    pub async fn detect_failures(&self) -> usize {
        let stale = self.topology.stale_data_nodes().await;
        let mut reported = 0;
        for id in stale {
            tracing::warn!("Data node {} missed its heartbeats", id);
            match self.topology.events().dead.send(id).await {
                Ok(()) => reported += 1,
                Err(e) => tracing::error!("Membership consumer is gone: {}", e),
            }
        }
        reported
    }

    async fn event_loop(self: Arc<Self>, mut receivers: EventReceivers) {
        while let Some(event) = receivers.recv().await {
            self.handle_event(event).await;
        }
        tracing::info!("Membership event channels closed");
    }

    pub async fn handle_event(&self, event: MembershipEvent) {
        tracing::debug!("Membership event {:?}", event);
        self.topology.apply_event(event).await;
    }
}
