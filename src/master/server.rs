use super::handlers::{
    handle_assign, handle_grow, handle_join, handle_lookup, handle_status,
};
use super::protocol::{
    AssignQuery, AssignResponse, ENDPOINT_ASSIGN, ENDPOINT_GROW, ENDPOINT_JOIN, ENDPOINT_LOOKUP,
    ENDPOINT_STATUS, GrowQuery, LookupQuery, LookupResponse,
};
use crate::config::MasterConfig;
use crate::error::{Error, Result};
use crate::membership::service::MembershipMonitor;
use crate::sequence::{FileSequencer, MemorySequencer, Sequencer};
use crate::storage::types::{ReplicationType, VolumeId};
use crate::topology::{Configuration, HttpAllocator, Topology, VolumeAllocator, VolumeGrowth};

use axum::{
    Router,
    extract::Extension,
    routing::{get, post},
};
use std::sync::Arc;

/// Request-facing half of the master: assign, lookup and growth on top of
/// the shared topology.
pub struct MasterServer {
    pub topology: Arc<Topology>,
    pub growth: Arc<VolumeGrowth>,
    pub default_replication: ReplicationType,
}

impl MasterServer {
    pub fn new(
        topology: Arc<Topology>,
        allocator: Arc<dyn VolumeAllocator>,
        default_replication: ReplicationType,
    ) -> Arc<Self> {
        Arc::new(Self {
            topology,
            growth: Arc::new(VolumeGrowth::new(allocator)),
            default_replication,
        })
    }

    fn replication(&self, requested: Option<&str>) -> Result<ReplicationType> {
        match requested.filter(|r| !r.is_empty()) {
            Some(r) => r.parse(),
            None => Ok(self.default_replication),
        }
    }

    /// Picks a writable volume, growing the layout once if it has none.
    pub async fn assign(&self, query: &AssignQuery) -> Result<AssignResponse> {
        let replication = self.replication(query.replication.as_deref())?;
        let collection = query.collection.clone().unwrap_or_default();
        let count = query.count.unwrap_or(1).max(1);
        let data_center = query.data_center.as_deref();

        let assignment = match self
            .topology
            .pick_for_write(&collection, replication, count, data_center)
            .await
        {
            Ok(assignment) => assignment,
            Err(Error::NoWritableVolumes { .. }) => {
                tracing::info!(
                    "No writable volumes for collection {:?} replication {}, growing",
                    collection,
                    replication
                );
                self.growth
                    .grow_if_needed(&self.topology, &collection, replication, data_center)
                    .await?;
                self.topology
                    .pick_for_write(&collection, replication, count, data_center)
                    .await?
            }
            Err(e) => return Err(e),
        };

        Ok(AssignResponse {
            fid: assignment.fid.to_string(),
            url: assignment.location.url,
            public_url: assignment.location.public_url,
            count: assignment.count,
        })
    }

    pub async fn lookup(&self, query: &LookupQuery) -> Result<LookupResponse> {
        let raw = query
            .volume_id
            .split_once(',')
            .map(|(vid, _)| vid)
            .unwrap_or(&query.volume_id);
        let volume_id: VolumeId = raw.parse()?;
        let collection = query.collection.as_deref().unwrap_or_default();

        let locations = self
            .topology
            .lookup(collection, volume_id)
            .await
            .ok_or_else(|| Error::Lookup(format!("volume {} not found", volume_id)))?;

        Ok(LookupResponse {
            volume_id,
            locations,
        })
    }

    pub async fn grow(&self, query: &GrowQuery) -> Result<usize> {
        let replication = self.replication(query.replication.as_deref())?;
        let collection = query.collection.clone().unwrap_or_default();
        let count = query
            .count
            .unwrap_or_else(|| VolumeGrowth::target_count(replication));

        self.growth
            .grow_by_count(
                &self.topology,
                count,
                &collection,
                replication,
                query.data_center.as_deref(),
            )
            .await
    }
}

pub fn router(master: Arc<MasterServer>) -> Router {
    Router::new()
        .route(ENDPOINT_ASSIGN, get(handle_assign).post(handle_assign))
        .route(ENDPOINT_LOOKUP, get(handle_lookup).post(handle_lookup))
        .route(ENDPOINT_JOIN, post(handle_join))
        .route(ENDPOINT_STATUS, get(handle_status))
        .route(ENDPOINT_GROW, get(handle_grow).post(handle_grow))
        .layer(Extension(master))
}

/// Builds and runs a master until the listener fails.
pub async fn run(config: MasterConfig) -> anyhow::Result<()> {
    let sequence: Arc<dyn Sequencer> = match &config.sequence_file {
        Some(path) => Arc::new(FileSequencer::open(path)?),
        None => Arc::new(MemorySequencer::new()),
    };
    let configuration = match &config.topology_file {
        Some(path) => Configuration::load(path)?,
        None => None,
    };

    let (topology, receivers) = Topology::new(
        "topo",
        config.volume_size_limit,
        config.pulse,
        sequence,
        configuration,
    );

    let monitor = MembershipMonitor::new(topology.clone());
    monitor.start(receivers).await;

    let allocator = Arc::new(HttpAllocator::new(reqwest::Client::new()));
    let master = MasterServer::new(topology, allocator, config.default_replication);

    let app = router(master);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("Master listening on {}", config.bind_addr);
    tracing::info!(
        "Volume size limit {} bytes, pulse {:?}, default replication {}",
        config.volume_size_limit,
        config.pulse,
        config.default_replication
    );

    axum::serve(listener, app).await?;
    Ok(())
}
