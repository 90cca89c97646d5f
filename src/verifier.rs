//! Consistency verification
//!
//! Compares the highest acknowledged sequence number with an independent
//! count of persisted records. The count walks every document instead of
//! asking the server for a count: server-side counts can come from cached
//! collection metadata and differ across read concerns.

use tracing::{info, warn};

use crate::context::ClusterContext;
use crate::error::{HarnessError, Result};
use crate::store::WriteRecord;

/// Outcome of comparing the last written number against the record count
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationResult {
    /// Highest `number` persisted, `None` if the collection is empty
    pub last_acknowledged_number: Option<i64>,
    /// Records counted by enumeration
    pub observed_count: u64,
    /// First number the generator was started with
    pub starting_number: i64,
}

impl VerificationResult {
    pub fn new(last: Option<i64>, observed_count: u64, starting_number: i64) -> Self {
        VerificationResult {
            last_acknowledged_number: last,
            observed_count,
            starting_number,
        }
    }

    /// Records a gap-free, duplicate-free run would have produced
    pub fn expected_count(&self) -> u64 {
        match self.last_acknowledged_number {
            Some(last) if last >= self.starting_number => (last - self.starting_number + 1) as u64,
            _ => 0,
        }
    }

    pub fn is_consistent(&self) -> bool {
        match self.last_acknowledged_number {
            Some(last) => last >= self.starting_number && self.observed_count == self.expected_count(),
            None => self.observed_count == 0,
        }
    }

    /// Records missing below the highest number (lost writes)
    pub fn missing(&self) -> u64 {
        self.expected_count().saturating_sub(self.observed_count)
    }

    /// Records beyond what the sequence accounts for (duplicates or strays)
    pub fn extraneous(&self) -> u64 {
        self.observed_count.saturating_sub(self.expected_count())
    }

    /// Turn an inconsistent result into [`HarnessError::ConsistencyMismatch`]
    pub fn ensure_consistent(self) -> Result<Self> {
        if self.is_consistent() {
            Ok(self)
        } else {
            Err(HarnessError::ConsistencyMismatch {
                last: self.last_acknowledged_number,
                count: self.observed_count,
                starting: self.starting_number,
            })
        }
    }
}

/// Number of records in the writes collection, counted by enumeration
pub async fn count_writes(ctx: &ClusterContext) -> Result<u64> {
    let store = ctx.connect().await?;
    store.count_by_scan(&ctx.config().writes_collection).await
}

/// Record with the highest `number`, if any
pub async fn last_written(ctx: &ClusterContext) -> Result<Option<WriteRecord>> {
    let store = ctx.connect().await?;
    store.find_max_number(&ctx.config().writes_collection).await
}

/// Read the last written number and the record count and compare them.
///
/// Run after the generator is stopped; a mismatch is reported once, never retried.
pub async fn verify(ctx: &ClusterContext, starting_number: i64) -> Result<VerificationResult> {
    let last = last_written(ctx).await?.map(|record| record.number);
    let count = count_writes(ctx).await?;
    let result = VerificationResult::new(last, count, starting_number);

    if result.is_consistent() {
        info!(last = ?last, count, "writes consistent");
    } else {
        warn!(
            last = ?last,
            count,
            missing = result.missing(),
            extraneous = result.extraneous(),
            "writes inconsistent"
        );
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consistent_from_one() {
        let result = VerificationResult::new(Some(250), 250, 1);
        assert!(result.is_consistent());
        assert_eq!(result.expected_count(), 250);
        assert!(result.ensure_consistent().is_ok());
    }

    #[test]
    fn test_consistent_with_offset() {
        let result = VerificationResult::new(Some(1099), 100, 1000);
        assert!(result.is_consistent());
    }

    #[test]
    fn test_gap_is_missing() {
        let result = VerificationResult::new(Some(100), 97, 1);
        assert!(!result.is_consistent());
        assert_eq!(result.missing(), 3);
        assert_eq!(result.extraneous(), 0);
        let err = result.ensure_consistent().unwrap_err();
        assert!(err.is_consistency_mismatch());
    }

    #[test]
    fn test_duplicates_are_extraneous() {
        let result = VerificationResult::new(Some(10), 12, 1);
        assert!(!result.is_consistent());
        assert_eq!(result.extraneous(), 2);
    }

    #[test]
    fn test_empty_is_consistent() {
        assert!(VerificationResult::new(None, 0, 1).is_consistent());
        assert!(!VerificationResult::new(None, 4, 1).is_consistent());
    }

    #[test]
    fn test_last_below_start_is_inconsistent() {
        let result = VerificationResult::new(Some(3), 0, 10);
        assert_eq!(result.expected_count(), 0);
        assert!(!result.is_consistent());
    }
}
