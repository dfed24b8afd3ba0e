// berthwatch/src/engine/publisher.rs
//
// Chunked append to the store.
//
// Rows are written in consecutive chunks of at most `chunk_size`, in order,
// optionally pausing between chunks to stay under the store's write quota.
// Not atomic across chunks: if chunk k fails, chunks 0..k stay committed and
// the error reports exactly how many rows made it. Retrying is the caller's
// job; the identity ledger keeps a retry from duplicating committed rows.

use std::time::Duration;

use tracing::{debug, warn};

use crate::clients::{with_timeout, RecordStore};
use crate::engine::dedup::SeenIdentities;
use crate::error::PublishError;
use crate::records::PublishRow;

pub const DEFAULT_CHUNK_SIZE: usize = 100;

pub struct BatchPublisher<'a> {
    store:      &'a dyn RecordStore,
    chunk_size: usize,
    pause:      Duration,
    timeout:    Duration,
}

impl<'a> BatchPublisher<'a> {
    pub fn new(store: &'a dyn RecordStore, chunk_size: usize, timeout: Duration) -> Self {
        Self { store, chunk_size: chunk_size.max(1), pause: Duration::ZERO, timeout }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Append every row; returns the count written. Identities of committed
    /// rows are added to `seen` as each chunk lands.
    pub async fn publish(&self, rows: &[PublishRow], seen: &mut SeenIdentities) -> Result<usize, PublishError> {
        let mut published = 0usize;

        for (i, chunk) in rows.chunks(self.chunk_size).enumerate() {
            if i > 0 && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }

            let cells: Vec<Vec<String>> = chunk.iter().map(|r| r.cells.clone()).collect();
            if let Err(source) = with_timeout("store", self.timeout, self.store.append_records(&cells)).await {
                warn!(chunk = i, published, attempted = rows.len(), error = %source, "chunk append failed");
                return Err(PublishError::Partial { published, attempted: rows.len(), source });
            }

            seen.extend(chunk.iter().map(|r| r.prediction_id.clone()));
            published += chunk.len();
            debug!(chunk = i, rows = chunk.len(), published, "chunk appended");
        }

        Ok(published)
    }
}
