//! File Key Sequencer
//!
//! The single source of truth for needle key uniqueness across the cluster.
//! Lives in the master only; callers claim contiguous ranges so one assign
//! request can mint keys for a whole batch of uploads.

mod file;
mod memory;

pub use file::FileSequencer;
pub use memory::MemorySequencer;

#[cfg(test)]
mod tests;

pub trait Sequencer: Send + Sync {
    /// Claims `count` consecutive keys and returns `(first_key, count)`.
    fn next_file_id(&self, count: u64) -> (u64, u64);

    /// Makes sure keys up to and including `seen` are never issued again.
    fn set_max(&self, seen: u64);

    /// The next key that would be issued.
    fn peek(&self) -> u64;
}
