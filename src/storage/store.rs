//! Local Volume Store
//!
//! The volume server's collection of volumes. Each volume is an append-only
//! needle log guarded by its own FIFO mutex, so needles within one volume are
//! appended and tombstoned strictly in request order while different volumes
//! proceed in parallel.
//!
//! This is an in-memory engine: it stands in for the on-disk volume format,
//! which is not part of this crate.

use super::types::*;
use crate::error::{Error, Result};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Mutex;

#[derive(Default)]
struct NeedleLog {
    /// Every record ever appended, tombstones included.
    records: Vec<Needle>,
    /// Needle key -> position of its live record.
    index: HashMap<u64, usize>,
    content_size: u64,
    deleted_byte_count: u64,
    delete_count: u64,
    max_file_key: u64,
}

impl NeedleLog {
    fn append(&mut self, needle: Needle) -> usize {
        self.content_size += needle.data.len() as u64;
        self.max_file_key = self.max_file_key.max(needle.key);
        self.records.push(needle);
        self.records.len() - 1
    }
}

pub struct Volume {
    pub id: VolumeId,
    pub collection: String,
    pub replication: ReplicationType,
    read_only: AtomicBool,
    log: Mutex<NeedleLog>,
}

impl Volume {
    pub fn new(id: VolumeId, collection: &str, replication: ReplicationType) -> Self {
        Self {
            id,
            collection: collection.to_string(),
            replication,
            read_only: AtomicBool::new(false),
            log: Mutex::new(NeedleLog::default()),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    async fn write(&self, needle: &Needle) -> Result<u32> {
        if self.is_read_only() {
            return Err(Error::ReadOnly(self.id));
        }
        let mut log = self.log.lock().await;
        let position = log.append(needle.clone());
        if let Some(previous) = log.index.insert(needle.key, position) {
            let stale = log.records[previous].data.len() as u64;
            log.deleted_byte_count += stale;
        }
        Ok(needle.size())
    }

    async fn read(&self, key: u64) -> Option<Needle> {
        let log = self.log.lock().await;
        log.index.get(&key).map(|&pos| log.records[pos].clone())
    }

    /// Appends a zero-size tombstone for the needle and drops it from the
    /// index. The cookie is compared under the same lock.
    async fn mark_deleted(&self, file_id: &FileId) -> Result<u32> {
        let mut log = self.log.lock().await;
        let position = *log
            .index
            .get(&file_id.key)
            .ok_or(Error::NeedleNotFound(*file_id))?;
        let (cookie, size) = {
            let live = &log.records[position];
            (live.cookie, live.size())
        };
        if cookie != file_id.cookie {
            tracing::warn!(
                "Cookie mismatch deleting {}: stored cookie {:08x}",
                file_id,
                cookie
            );
            return Err(Error::CookieMismatch(*file_id));
        }

        log.index.remove(&file_id.key);
        log.append(Needle::new(file_id.key, cookie, Vec::new()));
        log.deleted_byte_count += size as u64;
        log.delete_count += 1;
        Ok(size)
    }

    pub async fn info(&self) -> VolumeInfo {
        let log = self.log.lock().await;
        VolumeInfo {
            id: self.id,
            collection: self.collection.clone(),
            replication: self.replication,
            size: log.content_size,
            file_count: log.index.len() as u64,
            delete_count: log.delete_count,
            deleted_byte_count: log.deleted_byte_count,
            read_only: self.is_read_only(),
            max_file_key: log.max_file_key,
        }
    }
}

pub struct Store {
    pub ip: String,
    pub port: u16,
    pub public_url: String,
    max_volume_count: usize,
    volumes: DashMap<VolumeId, Arc<Volume>>,
    /// Slots taken, claimed before a volume is inserted.
    allocated: AtomicUsize,
    volume_size_limit: AtomicU64,
}

impl Store {
    pub fn new(ip: &str, port: u16, public_url: &str, max_volume_count: usize) -> Arc<Self> {
        Arc::new(Self {
            ip: ip.to_string(),
            port,
            public_url: public_url.to_string(),
            max_volume_count,
            volumes: DashMap::new(),
            allocated: AtomicUsize::new(0),
            volume_size_limit: AtomicU64::new(u64::MAX),
        })
    }

    /// The `ip:port` address other servers use to reach this store.
    pub fn url(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn max_volume_count(&self) -> usize {
        self.max_volume_count
    }

    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    pub fn set_volume_size_limit(&self, limit: u64) {
        self.volume_size_limit.store(limit, Ordering::SeqCst);
    }

    pub fn volume_size_limit(&self) -> u64 {
        self.volume_size_limit.load(Ordering::SeqCst)
    }

    pub fn has_volume(&self, vid: VolumeId) -> bool {
        self.volumes.contains_key(&vid)
    }

    pub fn replication_of(&self, vid: VolumeId) -> Option<ReplicationType> {
        self.volumes.get(&vid).map(|v| v.value().replication)
    }

    fn volume(&self, vid: VolumeId) -> Result<Arc<Volume>> {
        self.volumes
            .get(&vid)
            .map(|v| v.value().clone())
            .ok_or(Error::VolumeNotFound(vid))
    }

    pub fn add_volume(
        &self,
        vid: VolumeId,
        collection: &str,
        replication: ReplicationType,
    ) -> Result<()> {
        let slot = match self.volumes.entry(vid) {
            Entry::Occupied(_) => return Err(Error::VolumeExists(vid)),
            Entry::Vacant(slot) => slot,
        };
        let max = self.max_volume_count;
        self.allocated
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .map_err(|_| Error::StoreFull(max))?;
        slot.insert(Arc::new(Volume::new(vid, collection, replication)));
        tracing::info!(
            "Added volume {} (collection {:?}, replication {})",
            vid,
            collection,
            replication
        );
        Ok(())
    }

    /// Allocates every volume named by `volume_list`: `"3"`, `"3,5"` or `"3-7"`.
    pub fn add_volumes(&self, volume_list: &str, collection: &str, replication: &str) -> Result<()> {
        let replication: ReplicationType = replication.parse()?;
        for range in volume_list.split(',').filter(|r| !r.trim().is_empty()) {
            match range.split_once('-') {
                Some((start, end)) => {
                    let start: VolumeId = start.parse()?;
                    let end: VolumeId = end.parse()?;
                    for id in start.0..=end.0 {
                        self.add_volume(VolumeId(id), collection, replication)?;
                    }
                }
                None => {
                    self.add_volume(range.parse()?, collection, replication)?;
                }
            }
        }
        Ok(())
    }

    pub fn freeze_volume(&self, vid: VolumeId) -> Result<()> {
        let volume = self.volume(vid)?;
        volume.read_only.store(true, Ordering::SeqCst);
        tracing::info!("Volume {} is now read only", vid);
        Ok(())
    }

    pub async fn write(&self, vid: VolumeId, needle: &Needle) -> Result<u32> {
        let volume = self.volume(vid)?;
        volume.write(needle).await
    }

    /// Returns the stored needle for `file_id.key`. The cookie is not checked here.
    pub async fn read(&self, file_id: &FileId) -> Result<Needle> {
        let volume = self.volume(file_id.volume_id)?;
        volume
            .read(file_id.key)
            .await
            .ok_or(Error::NeedleNotFound(*file_id))
    }

    /// Tombstones the needle if `file_id` carries its cookie.
    pub async fn mark_deleted(&self, file_id: &FileId) -> Result<u32> {
        let volume = self.volume(file_id.volume_id)?;
        volume.mark_deleted(file_id).await
    }

    /// Volume inventory reported to the master on every heartbeat.
    pub async fn status(&self) -> Vec<VolumeInfo> {
        let volumes: Vec<Arc<Volume>> = self.volumes.iter().map(|e| e.value().clone()).collect();
        let mut infos = Vec::with_capacity(volumes.len());
        for volume in volumes {
            infos.push(volume.info().await);
        }
        infos.sort_by_key(|info| info.id);
        infos
    }
}
