//! Volume Server Storage
//!
//! Holds needles in local volumes and runs the replication protocol
//! between the servers holding replicas of the same volume.
//!
//! ## Key Components
//! - **`Store`**: the local volumes, one FIFO lock per volume.
//! - **`VolumeServer`**: replicated write / delete, reads with cookie check
//!   and redirect, heartbeats to the master.
//! - **Transport**: replica forwarding over HTTP (`bincode` bodies).
//!
//! Needle paths are served by a router fallback so that every shape of
//! `/<vid>,<fid>` URL reaches the same handler.

pub mod handlers;
pub mod protocol;
pub mod server;
pub mod store;
pub mod transport;
pub mod types;

pub use server::{Outcome, ReadOutcome, VolumeServer};
pub use store::Store;
pub use transport::{HttpForwarder, LocalForwarder, ReplicaForwarder, ReplicaOp};

use crate::config::VolumeServerConfig;
use crate::master::{CachedLookup, HttpMasterClient};
use crate::master::client::LOOKUP_CACHE_TTL;
use handlers::{
    Whitelist, handle_assign_volume, handle_freeze_volume, handle_needle, handle_status,
    require_whitelisted,
};
use protocol::{ENDPOINT_ASSIGN_VOLUME, ENDPOINT_FREEZE_VOLUME, ENDPOINT_STATUS};
use server::REPLICA_TIMEOUT;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Extension},
    middleware,
    routing::get,
};
use std::net::SocketAddr;
use std::sync::Arc;


pub fn router(server: Arc<VolumeServer>) -> Router {
    router_with_whitelist(server, Whitelist::default())
}

/// Needle bodies are bounded by the volume size limit in the handler, not by
/// axum's default body limit. Serve with
/// `into_make_service_with_connect_info::<SocketAddr>()` so the whitelist
/// sees client addresses.
pub fn router_with_whitelist(server: Arc<VolumeServer>, whitelist: Whitelist) -> Router {
    Router::new()
        .route(ENDPOINT_STATUS, get(handle_status))
        .route(
            ENDPOINT_ASSIGN_VOLUME,
            get(handle_assign_volume).post(handle_assign_volume),
        )
        .route(
            ENDPOINT_FREEZE_VOLUME,
            get(handle_freeze_volume).post(handle_freeze_volume),
        )
        .route_layer(middleware::from_fn(require_whitelisted))
        .fallback(handle_needle)
        .layer(DefaultBodyLimit::disable())
        .layer(Extension(Arc::new(whitelist)))
        .layer(Extension(server))
}

/// Builds and runs a volume server until the listener fails.
pub async fn run(config: VolumeServerConfig) -> anyhow::Result<()> {
    let public_url = config
        .public_url
        .clone()
        .unwrap_or_else(|| format!("{}:{}", config.ip, config.port));
    let store = Store::new(&config.ip, config.port, &public_url, config.max_volume_count);

    let http_client = reqwest::Client::new();
    let master = Arc::new(CachedLookup::new(
        Arc::new(HttpMasterClient::new(&config.master, http_client.clone())),
        LOOKUP_CACHE_TTL,
    ));
    let forwarder = Arc::new(HttpForwarder::new(http_client, REPLICA_TIMEOUT));

    let server = VolumeServer::new(
        store,
        master,
        forwarder,
        &config.data_center,
        &config.rack,
        config.pulse,
    );

    let heartbeat = server.clone();
    tokio::spawn(async move {
        heartbeat.heartbeat_loop().await;
    });

    let app = router_with_whitelist(server, Whitelist::new(config.whitelist.clone()));
    let listener = tokio::net::TcpListener::bind((config.bind_ip.as_str(), config.port)).await?;
    tracing::info!(
        "Volume server {}:{} listening, master {}, max {} volumes",
        config.ip,
        config.port,
        config.master,
        config.max_volume_count
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
