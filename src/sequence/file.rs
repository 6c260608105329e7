use super::Sequencer;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Keys are reserved on disk in blocks of this size.
const PERSIST_STEP: u64 = 10_000;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Checkpoint {
    limit: u64,
}

struct Cursor {
    next: u64,
    limit: u64,
}

/// Sequencer that survives master restarts.
///
/// Only a high-water mark is persisted: after a restart the cursor resumes at
/// the last persisted limit, so keys issued before the crash are skipped,
/// never reissued.
pub struct FileSequencer {
    path: PathBuf,
    cursor: Mutex<Cursor>,
}

impl FileSequencer {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let checkpoint = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<Checkpoint>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Checkpoint::default(),
            Err(e) => return Err(e.into()),
        };
        let next = checkpoint.limit.max(1);

        tracing::info!("Sequencer resuming at key {} ({})", next, path.display());

        Ok(Self {
            path,
            cursor: Mutex::new(Cursor {
                next,
                limit: checkpoint.limit,
            }),
        })
    }

    fn persist(&self, limit: u64) {
        let checkpoint = Checkpoint { limit };
        let result = serde_json::to_vec(&checkpoint)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| std::fs::write(&self.path, bytes).map_err(anyhow::Error::from));
        if let Err(e) = result {
            tracing::error!(
                "Failed to persist sequencer limit {} to {}: {}",
                limit,
                self.path.display(),
                e
            );
        }
    }

    fn ensure_limit(&self, cursor: &mut Cursor) {
        if cursor.next > cursor.limit {
            cursor.limit = cursor.next + PERSIST_STEP;
            self.persist(cursor.limit);
        }
    }
}

impl Sequencer for FileSequencer {
    fn next_file_id(&self, count: u64) -> (u64, u64) {
        let count = count.max(1);
        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        let start = cursor.next;
        cursor.next += count;
        self.ensure_limit(&mut cursor);
        (start, count)
    }

    fn set_max(&self, seen: u64) {
        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        if seen >= cursor.next {
            cursor.next = seen + 1;
            self.ensure_limit(&mut cursor);
        }
    }

    fn peek(&self) -> u64 {
        self.cursor.lock().unwrap_or_else(|e| e.into_inner()).next
    }
}
