//! Replicated Blob Store Cluster Library
//!
//! A master keeps the map of where every volume lives and hands out file ids;
//! volume servers store needles and replicate writes and deletes among the
//! servers holding the same volume. The binary (`main.rs`) runs either role.
//!
//! ## Architecture Modules
//!
//! - **`topology`**: the master's data center / rack / data node tree, the
//!   volume layouts per (collection, replication) and volume growth.
//! - **`membership`**: heartbeat ingestion types, failure detection and the
//!   dead / recovered / full event channels.
//! - **`sequence`**: the file key sequencer.
//! - **`master`**: the master's HTTP API and the client volume servers use
//!   to reach it.
//! - **`storage`**: the volume server: local store, replicated write /
//!   delete, reads and redirects, replica transport.

pub mod config;
pub mod error;
pub mod master;
pub mod membership;
pub mod net;
pub mod sequence;
pub mod storage;
pub mod topology;

pub use error::{Error, Result};
