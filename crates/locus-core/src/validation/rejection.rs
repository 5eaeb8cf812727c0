use crate::{metrics::RejectionMetricsSnapshot, scoring::RejectionReason};
use std::collections::BTreeMap;

/// Counts scored and rejected locations for one batch.
#[derive(Debug, Clone, Default)]
pub struct RejectionTracker {
    total: u64,
    rejected: u64,
    by_reason: BTreeMap<RejectionReason, u64>,
}

impl RejectionTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one scored location; `reason` is set when it was rejected.
    pub fn record(&mut self, reason: Option<RejectionReason>) {
        self.total += 1;
        if let Some(reason) = reason {
            self.rejected += 1;
            *self.by_reason.entry(reason).or_insert(0) += 1;
        }
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    #[must_use]
    pub fn snapshot(&self) -> RejectionMetricsSnapshot {
        RejectionMetricsSnapshot {
            total: self.total,
            rejected: self.rejected,
            rejected_by_reason: self
                .by_reason
                .iter()
                .map(|(reason, count)| (reason.as_str().to_string(), *count))
                .collect(),
            rejection_rate: RejectionMetricsSnapshot::rate_of(self.rejected, self.total),
        }
    }
}
