//! Run-wide upload counters.

use serde::{Deserialize, Serialize};

use crate::contract::TransportError;

/// Why an item was left out before transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    TooLarge,
    Unreadable,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::TooLarge => write!(f, "too large"),
            SkipReason::Unreadable => write!(f, "not readable"),
        }
    }
}

/// Result of one item or one batch.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Success,
    Failed(TransportError),
    Skipped(SkipReason),
}

/// How a batch-level transport outcome is counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsAttribution {
    /// One batch counts as one unit, regardless of how many files it carried.
    #[default]
    PerBatch,
    /// A batch outcome is counted once for every file in the batch.
    PerItem,
}

/// Counters for one run. `success + failed + skipped == total` at all times.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStatistics {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl RunStatistics {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn record(&mut self, outcome: &UploadOutcome) {
        match outcome {
            UploadOutcome::Success => self.success += 1,
            UploadOutcome::Failed(_) => self.failed += 1,
            UploadOutcome::Skipped(_) => self.skipped += 1,
        }
        self.total += 1;
    }

    /// Record the transport outcome of a batch carrying `items` files.
    pub fn record_batch(
        &mut self,
        outcome: &UploadOutcome,
        items: usize,
        attribution: StatsAttribution,
    ) {
        let units = match attribution {
            StatsAttribution::PerBatch => 1,
            StatsAttribution::PerItem => items.max(1),
        };
        for _ in 0..units {
            self.record(outcome);
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.success + self.failed + self.skipped == self.total
    }
}
