//! How a volume server talks to the master: heartbeats out, volume lookups
//! back. The HTTP client is the production path; [`Topology`] implements the
//! same trait so a volume server can run against an in-process master.

use super::protocol::{
    ENDPOINT_JOIN, ENDPOINT_LOOKUP, ErrorResponse, JoinResponse, LookupResponse,
};
use crate::error::{Error, Result};
use crate::membership::types::Heartbeat;
use crate::net::{get_with_retry, http_url, post_json_with_retry};
use crate::storage::types::VolumeId;
use crate::topology::{Location, Topology};

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const LOOKUP_CACHE_TTL: Duration = Duration::from_secs(10);

#[async_trait]
pub trait MasterClient: Send + Sync {
    /// Sends one heartbeat and returns the cluster's volume size limit.
    async fn join(&self, heartbeat: &Heartbeat) -> Result<u64>;

    /// All replicas of `vid`.
    async fn lookup(&self, vid: VolumeId) -> Result<Vec<Location>>;
}

pub struct HttpMasterClient {
    master: String,
    http_client: reqwest::Client,
    timeout: Duration,
}

impl HttpMasterClient {
    pub fn new(master: &str, http_client: reqwest::Client) -> Self {
        Self {
            master: master.to_string(),
            http_client,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn master(&self) -> &str {
        &self.master
    }
}

#[async_trait]
impl MasterClient for HttpMasterClient {
    async fn join(&self, heartbeat: &Heartbeat) -> Result<u64> {
        let url = http_url(&self.master, ENDPOINT_JOIN);
        let response = post_json_with_retry(&self.http_client, &url, heartbeat, self.timeout, 1)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "join rejected by {}: {}",
                self.master,
                response.status()
            )));
        }

        let body: JoinResponse = response
            .json()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(body.volume_size_limit)
    }

    async fn lookup(&self, vid: VolumeId) -> Result<Vec<Location>> {
        let url = format!("{}?volumeId={}", http_url(&self.master, ENDPOINT_LOOKUP), vid);
        let response = get_with_retry(&self.http_client, &url, self.timeout, 3)
            .await
            .map_err(|e| Error::Lookup(e.to_string()))?;

        if !response.status().is_success() {
            let reason = response
                .json::<ErrorResponse>()
                .await
                .map(|e| e.error)
                .unwrap_or_else(|_| format!("volume {} not found", vid));
            return Err(Error::Lookup(reason));
        }

        let body: LookupResponse = response
            .json()
            .await
            .map_err(|e| Error::Lookup(e.to_string()))?;
        Ok(body.locations)
    }
}

#[async_trait]
impl MasterClient for Topology {
    async fn join(&self, heartbeat: &Heartbeat) -> Result<u64> {
        self.register_volumes(heartbeat).await;
        Ok(self.volume_size_limit())
    }

    async fn lookup(&self, vid: VolumeId) -> Result<Vec<Location>> {
        Topology::lookup(self, "", vid)
            .await
            .ok_or_else(|| Error::Lookup(format!("volume {} not found", vid)))
    }
}

/// Remembers successful lookups for [`LOOKUP_CACHE_TTL`]. Joins pass
/// straight through.
pub struct CachedLookup {
    inner: Arc<dyn MasterClient>,
    entries: DashMap<VolumeId, (Instant, Vec<Location>)>,
    ttl: Duration,
}

impl CachedLookup {
    pub fn new(inner: Arc<dyn MasterClient>, ttl: Duration) -> Self {
        Self {
            inner,
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn invalidate(&self, vid: VolumeId) {
        self.entries.remove(&vid);
    }
}

#[async_trait]
impl MasterClient for CachedLookup {
    async fn join(&self, heartbeat: &Heartbeat) -> Result<u64> {
        self.inner.join(heartbeat).await
    }

    async fn lookup(&self, vid: VolumeId) -> Result<Vec<Location>> {
        if let Some(entry) = self.entries.get(&vid)
            && entry.0.elapsed() < self.ttl
        {
            return Ok(entry.1.clone());
        }

        let locations = self.inner.lookup(vid).await?;
        self.entries.insert(vid, (Instant::now(), locations.clone()));
        Ok(locations)
    }
}
