//! Volume Server Protocol
//!
//! Endpoints and DTOs of the volume server. Needles themselves are addressed
//! by path (`/<vid>,<fid>`); replica forwards reuse those paths with
//! `?type=replicate` and a `bincode` encoded needle as body.

use super::types::{VolumeId, VolumeInfo};

use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Version and inventory of the local volumes.
pub const ENDPOINT_STATUS: &str = "/status";
/// Allocates empty volumes (called by the master during growth).
pub const ENDPOINT_ASSIGN_VOLUME: &str = "/admin/assign_volume";
/// Marks a volume read-only.
pub const ENDPOINT_FREEZE_VOLUME: &str = "/admin/freeze_volume";

/// Query value of `type` that marks a request as a replica forward.
pub const REPLICATE: &str = "replicate";

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// --- Data Transfer Objects ---

/// Query string accepted on needle paths.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct NeedleQuery {
    /// `replicate` on forwarded writes and deletes.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Original file name of an upload.
    #[serde(default)]
    pub name: Option<String>,
    /// Last-modified time of an upload, seconds since the epoch.
    #[serde(default)]
    pub ts: Option<u64>,
}

impl NeedleQuery {
    pub fn is_replicate(&self) -> bool {
        self.kind.as_deref() == Some(REPLICATE)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WriteResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssignVolumeRequest {
    /// `3`, `3,5` or `3-7`.
    pub volume: String,
    #[serde(default)]
    pub collection: String,
    #[serde(default)]
    pub replication: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FreezeVolumeRequest {
    pub volume: VolumeId,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AdminResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub version: String,
    pub volumes: Vec<VolumeInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
