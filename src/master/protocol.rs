//! Master Protocol
//!
//! Endpoints and DTOs served by the master. Everything is JSON; heartbeats
//! are POSTed to [`ENDPOINT_JOIN`] as a [`Heartbeat`](crate::membership::types::Heartbeat).

use crate::storage::types::VolumeId;
use crate::topology::Location;

use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Hands out a file id and the server to upload it to.
pub const ENDPOINT_ASSIGN: &str = "/dir/assign";
/// Replica locations of one volume.
pub const ENDPOINT_LOOKUP: &str = "/dir/lookup";
/// Heartbeat ingestion.
pub const ENDPOINT_JOIN: &str = "/dir/join";
/// Dump of the tree and layouts.
pub const ENDPOINT_STATUS: &str = "/dir/status";
/// Manual volume growth.
pub const ENDPOINT_GROW: &str = "/vol/grow";

// --- Data Transfer Objects ---

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignQuery {
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub replication: Option<String>,
    #[serde(default)]
    pub data_center: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignResponse {
    pub fid: String,
    pub url: String,
    pub public_url: String,
    pub count: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupQuery {
    /// A bare volume id or a whole file id; only the part before the comma
    /// is used.
    pub volume_id: String,
    #[serde(default)]
    pub collection: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupResponse {
    pub volume_id: VolumeId,
    pub locations: Vec<Location>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub volume_size_limit: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrowQuery {
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub replication: Option<String>,
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub data_center: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrowResponse {
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
