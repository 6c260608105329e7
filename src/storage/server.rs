//! Volume Server
//!
//! Runs the replicated write / delete protocol on top of the local store,
//! serves reads (redirecting to a replica when the volume lives elsewhere)
//! and keeps the master informed through heartbeats.

use super::store::Store;
use super::transport::{ReplicaForwarder, ReplicaOp};
use super::types::{FileId, Needle, NeedlePath};
use crate::error::Error;
use crate::master::MasterClient;
use crate::membership::types::Heartbeat;
use crate::topology::Location;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Replica forwards in flight per request.
pub const MAX_CONCURRENT_FORWARDS: usize = 8;
pub const REPLICA_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of a replicated write or delete. `size` is what was applied
/// locally and is reported even when a replica failed.
#[derive(Debug, Default)]
pub struct Outcome {
    pub size: u32,
    pub error: Option<Error>,
}

impl Outcome {
    fn ok(size: u32) -> Self {
        Self { size, error: None }
    }

    fn failed(size: u32, error: Error) -> Self {
        Self {
            size,
            error: Some(error),
        }
    }
}

#[derive(Debug)]
pub enum ReadOutcome {
    Found(Needle),
    /// The volume is not local; the client should fetch from this url.
    Redirect(String),
    NotFound,
}

pub struct VolumeServer {
    store: Arc<Store>,
    master: Arc<dyn MasterClient>,
    forwarder: Arc<dyn ReplicaForwarder>,
    fanout: Arc<Semaphore>,
    replica_timeout: Duration,
    pub data_center: String,
    pub rack: String,
    pub pulse: Duration,
}

impl VolumeServer {
    pub fn new(
        store: Arc<Store>,
        master: Arc<dyn MasterClient>,
        forwarder: Arc<dyn ReplicaForwarder>,
        data_center: &str,
        rack: &str,
        pulse: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            master,
            forwarder,
            fanout: Arc::new(Semaphore::new(MAX_CONCURRENT_FORWARDS)),
            replica_timeout: REPLICA_TIMEOUT,
            data_center: data_center.to_string(),
            rack: rack.to_string(),
            pulse,
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Writes locally, then forwards the identical needle to every other
    /// replica. A replica failure never rolls back the local write.
    pub async fn replicated_write(&self, fid: FileId, mut needle: Needle, replicate: bool) -> Outcome {
        needle.key = fid.key;
        needle.cookie = fid.cookie;

        let size = match self.store.write(fid.volume_id, &needle).await {
            Ok(size) => size,
            Err(e) => {
                tracing::warn!("Write of {} failed locally: {}", fid, e);
                return Outcome::failed(0, e);
            }
        };
        tracing::debug!("Wrote {} ({} bytes)", fid, size);

        if replicate {
            return Outcome::ok(size);
        }

        match self.fan_out(&fid, ReplicaOp::Write(needle)).await {
            Ok(()) => Outcome::ok(size),
            Err(e) => Outcome::failed(size, e),
        }
    }

    /// Tombstones the needle locally and on every other replica. Nothing is
    /// touched unless the cookie matches the stored needle.
    pub async fn replicated_delete(&self, fid: FileId, replicate: bool) -> Outcome {
        let size = match self.store.mark_deleted(&fid).await {
            Ok(size) => size,
            Err(Error::NeedleNotFound(_)) => {
                tracing::debug!("Delete of missing {}", fid);
                return Outcome::ok(0);
            }
            Err(e) => return Outcome::failed(0, e),
        };
        tracing::debug!("Deleted {} ({} bytes)", fid, size);

        if replicate {
            return Outcome::ok(size);
        }

        match self.fan_out(&fid, ReplicaOp::Delete).await {
            Ok(()) => Outcome::ok(size),
            Err(e) => Outcome::failed(size, e),
        }
    }

    /// Local read with cookie check, otherwise a redirect to a replica.
    pub async fn read(&self, path: &NeedlePath, raw_path: &str) -> ReadOutcome {
        let fid = path.file_id;

        if self.store.has_volume(fid.volume_id) {
            return match self.store.read(&fid).await {
                Ok(needle) if needle.cookie == fid.cookie => ReadOutcome::Found(needle),
                Ok(needle) => {
                    tracing::warn!(
                        "Cookie mismatch reading {}: stored cookie {:08x}",
                        fid,
                        needle.cookie
                    );
                    ReadOutcome::NotFound
                }
                Err(_) => ReadOutcome::NotFound,
            };
        }

        match self.master.lookup(fid.volume_id).await {
            Ok(locations) => match locations.first() {
                Some(location) => ReadOutcome::Redirect(redirect_url(location, raw_path)),
                None => ReadOutcome::NotFound,
            },
            Err(e) => {
                tracing::debug!("Lookup of volume {} failed: {}", fid.volume_id, e);
                ReadOutcome::NotFound
            }
        }
    }

    /// Sends `op` to every replica of the volume except this server and
    /// waits for all of them.
    async fn fan_out(&self, fid: &FileId, op: ReplicaOp) -> Result<(), Error> {
        let replication = self
            .store
            .replication_of(fid.volume_id)
            .ok_or(Error::VolumeNotFound(fid.volume_id))?;
        if replication.copy_count() <= 1 {
            return Ok(());
        }

        let locations = self.master.lookup(fid.volume_id).await.map_err(|e| {
            tracing::warn!("Cannot find replicas of {}: {}", fid, e);
            e
        })?;

        let own_url = self.store.url();
        let replicas: Vec<Location> = locations
            .into_iter()
            .filter(|location| location.url != own_url)
            .collect();

        let op = Arc::new(op);
        let mut tasks = JoinSet::new();
        for replica in replicas {
            let forwarder = self.forwarder.clone();
            let fanout = self.fanout.clone();
            let op = op.clone();
            let fid = *fid;
            let timeout = self.replica_timeout;

            tasks.spawn(async move {
                let _permit = fanout.acquire_owned().await;
                let result =
                    tokio::time::timeout(timeout, forwarder.forward(&replica, &fid, &op)).await;
                (replica, result)
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(Ok(_)))) => {}
                Ok((replica, Ok(Err(e)))) => {
                    tracing::warn!("Replica {} failed for {}: {}", replica.url, fid, e);
                    failures.push(format!("{}: {}", replica.url, e));
                }
                Ok((replica, Err(_))) => {
                    tracing::warn!("Replica {} timed out for {}", replica.url, fid);
                    failures.push(format!("{}: timed out", replica.url));
                }
                Err(e) => {
                    tracing::error!("Replica forward task failed: {}", e);
                    failures.push(e.to_string());
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Transport(format!(
                "failed to replicate {}: {}",
                fid,
                failures.join("; ")
            )))
        }
    }

    pub async fn heartbeat(&self, is_initial: bool) -> Heartbeat {
        Heartbeat {
            ip: self.store.ip.clone(),
            port: self.store.port,
            public_url: self.store.public_url.clone(),
            max_volume_count: self.store.max_volume_count(),
            data_center: self.data_center.clone(),
            rack: self.rack.clone(),
            volumes: self.store.status().await,
            is_initial,
        }
    }

    /// Sends one heartbeat and adopts the size limit the master answers with.
    pub async fn join(&self, is_initial: bool) -> crate::error::Result<()> {
        let heartbeat = self.heartbeat(is_initial).await;
        let volume_size_limit = self.master.join(&heartbeat).await?;
        self.store.set_volume_size_limit(volume_size_limit);
        Ok(())
    }

    /// Heartbeats forever at a jittered `pulse * (1 + rand)` interval. The
    /// first report after every lost contact is marked initial.
    pub async fn heartbeat_loop(self: Arc<Self>) {
        let mut connected = false;

        loop {
            match self.join(!connected).await {
                Ok(()) => {
                    if !connected {
                        tracing::info!("Joined master with {} volumes", self.store.volume_count());
                    }
                    connected = true;
                }
                Err(e) => {
                    if connected {
                        tracing::warn!("Lost contact with master: {}", e);
                    } else {
                        tracing::debug!("Master unreachable: {}", e);
                    }
                    connected = false;
                }
            }

            let jitter = 1.0 + rand::random::<f64>();
            tokio::time::sleep(self.pulse.mul_f64(jitter)).await;
        }
    }
}

fn redirect_url(location: &Location, raw_path: &str) -> String {
    let base = if location.public_url.is_empty() {
        &location.url
    } else {
        &location.public_url
    };
    crate::net::http_url(base, raw_path)
}
