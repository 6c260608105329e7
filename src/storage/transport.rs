//! Replica Forwarding
//!
//! Carries a write or delete that already succeeded locally to one other
//! replica of the volume. Forwards are marked `?type=replicate` so the
//! receiving server applies them locally without fanning out again.

use super::protocol::{DeleteResponse, REPLICATE, WriteResponse};
use super::server::VolumeServer;
use super::types::{FileId, Needle};
use crate::net::{http_url, send_with_retry};
use crate::topology::Location;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaOp {
    Write(Needle),
    Delete,
}

#[async_trait]
pub trait ReplicaForwarder: Send + Sync {
    /// Applies `op` for `fid` on `replica` and returns the byte count it
    /// reported.
    async fn forward(&self, replica: &Location, fid: &FileId, op: &ReplicaOp) -> anyhow::Result<u32>;
}

pub struct HttpForwarder {
    http_client: reqwest::Client,
    timeout: Duration,
}

impl HttpForwarder {
    pub fn new(http_client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            http_client,
            timeout,
        }
    }
}

#[async_trait]
impl ReplicaForwarder for HttpForwarder {
    async fn forward(&self, replica: &Location, fid: &FileId, op: &ReplicaOp) -> anyhow::Result<u32> {
        let url = format!(
            "{}?type={}",
            http_url(&replica.url, &format!("/{}", fid)),
            REPLICATE
        );

        match op {
            ReplicaOp::Write(needle) => {
                let body = bincode::serialize(needle)?;
                let response = send_with_retry(
                    &url,
                    || {
                        self.http_client
                            .post(&url)
                            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                            .body(body.clone())
                            .timeout(self.timeout)
                    },
                    2,
                )
                .await?;

                let status = response.status();
                let reply: WriteResponse = response.json().await.unwrap_or_default();
                match reply.error {
                    Some(error) => Err(anyhow::anyhow!("{} ({})", error, status)),
                    None if !status.is_success() => Err(anyhow::anyhow!("replica answered {}", status)),
                    None => Ok(reply.size),
                }
            }
            ReplicaOp::Delete => {
                let response = send_with_retry(
                    &url,
                    || self.http_client.delete(&url).timeout(self.timeout),
                    2,
                )
                .await?;

                let status = response.status();
                let reply: DeleteResponse = response.json().await.unwrap_or_default();
                match reply.error {
                    Some(error) => Err(anyhow::anyhow!("{} ({})", error, status)),
                    None if !status.is_success() => Err(anyhow::anyhow!("replica answered {}", status)),
                    None => Ok(reply.size),
                }
            }
        }
    }
}

/// Delivers forwards to volume servers running in the same process,
/// keyed by their `ip:port` url.
#[derive(Default)]
pub struct LocalForwarder {
    servers: DashMap<String, Weak<VolumeServer>>,
}

impl LocalForwarder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, server: &Arc<VolumeServer>) {
        self.servers
            .insert(server.store().url(), Arc::downgrade(server));
    }

    pub fn unregister(&self, url: &str) {
        self.servers.remove(url);
    }
}

#[async_trait]
impl ReplicaForwarder for LocalForwarder {
    async fn forward(&self, replica: &Location, fid: &FileId, op: &ReplicaOp) -> anyhow::Result<u32> {
        let server = self
            .servers
            .get(&replica.url)
            .and_then(|s| s.value().upgrade())
            .ok_or_else(|| anyhow::anyhow!("{} is unreachable", replica.url))?;

        let outcome = match op {
            ReplicaOp::Write(needle) => server.replicated_write(*fid, needle.clone(), true).await,
            ReplicaOp::Delete => server.replicated_delete(*fid, true).await,
        };

        match outcome.error {
            Some(e) => Err(anyhow::anyhow!(e)),
            None => Ok(outcome.size),
        }
    }
}
