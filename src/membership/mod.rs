//! Membership Module
//!
//! Tracks which volume servers are alive, from the master's point of view.
//!
//! ## Core Mechanisms
//! - **Heartbeats**: every volume server periodically reports its full volume
//!   inventory; the report refreshes its liveness and re-syncs its volumes.
//! - **Failure Detection**: a server silent for three pulses is declared dead
//!   and cascaded out of the tree and every volume layout.
//! - **Event Channels**: dead / recovered / volume-full notifications flow
//!   through bounded channels to a single consumer, so the topology is only
//!   ever mutated under its own lock.

pub mod service;
pub mod types;
