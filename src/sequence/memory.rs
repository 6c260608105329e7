use super::Sequencer;

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-local sequencer. Keys restart at 1 with the master unless
/// heartbeats raise the cursor through `set_max`.
pub struct MemorySequencer {
    counter: AtomicU64,
}

impl MemorySequencer {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(1),
        }
    }
}

impl Default for MemorySequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sequencer for MemorySequencer {
    fn next_file_id(&self, count: u64) -> (u64, u64) {
        let count = count.max(1);
        let start = self.counter.fetch_add(count, Ordering::SeqCst);
        (start, count)
    }

    fn set_max(&self, seen: u64) {
        self.counter.fetch_max(seen.saturating_add(1), Ordering::SeqCst);
    }

    fn peek(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}
