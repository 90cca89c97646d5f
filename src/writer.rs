//! Sequential write loop run by the generator process
//!
//! Inserts `{number: n}` for n = start, start+1, ... Each number is retried
//! until it is acknowledged before moving to the next, so the persisted
//! sequence has no gaps unless the cluster loses an acknowledged write.

use std::time::Duration;

use tracing::{debug, warn};

use crate::store::{DataStore, WriteRecord};

/// Pacing of the write loop
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Collection to insert into
    pub collection: String,
    /// First number to write
    pub starting_number: i64,
    /// Pause after each acknowledged insert (default: 0)
    pub pace: Duration,
    /// Pause before retrying a failed insert (default: 1s)
    pub retry_delay: Duration,
    /// Stop after this many acknowledged writes; `None` runs until killed
    pub limit: Option<u64>,
}

impl WriterConfig {
    pub fn new(collection: impl Into<String>, starting_number: i64) -> Self {
        WriterConfig {
            collection: collection.into(),
            starting_number,
            pace: Duration::ZERO,
            retry_delay: Duration::from_secs(1),
            limit: None,
        }
    }

    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Run the write loop. Returns the last acknowledged number once `limit` is
/// reached, or `None` if the limit was zero.
pub async fn write_sequence(store: &dyn DataStore, config: &WriterConfig) -> Option<i64> {
    let mut next = config.starting_number;
    let mut written = 0u64;
    let mut last = None;

    loop {
        if config.limit.is_some_and(|limit| written >= limit) {
            return last;
        }

        let record = WriteRecord::new(next);
        match store.insert(&config.collection, &record).await {
            Ok(()) => {
                debug!(number = next, "write acknowledged");
                last = Some(next);
                written += 1;
                next += 1;
                if !config.pace.is_zero() {
                    tokio::time::sleep(config.pace).await;
                }
            }
            Err(e) => {
                warn!(number = next, error = %e, "write failed, retrying");
                tokio::time::sleep(config.retry_delay).await;
            }
        }
    }
}
