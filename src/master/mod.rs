//! Master Server
//!
//! The cluster's coordinator. Owns the topology and the file key sequencer
//! and serves:
//! - `/dir/assign`: a fresh file id plus the volume server to upload to;
//! - `/dir/lookup`: where a volume's replicas live;
//! - `/dir/join`: heartbeat ingestion;
//! - `/dir/status` and `/vol/grow` for operators.
//!
//! It never touches needle bytes.

pub mod client;
pub mod handlers;
pub mod protocol;
pub mod server;

pub use client::{CachedLookup, HttpMasterClient, MasterClient};
pub use server::{MasterServer, router};
