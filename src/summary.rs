use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::apply::ApplyReport;
use crate::error::FeedUnavailableError;
use crate::normalize::Normalized;
use crate::plan::PlanCounts;

/// Result of one ETL cycle, returned to the caller and appended to the run log.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub timestamp: DateTime<Utc>,

    // normalization
    pub trips_seen: usize,
    pub trips_filtered: usize,
    pub trips_rejected: usize,

    // per-key classification
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub malformed: usize,
    pub lookup_failures: usize,
    pub key_collisions: usize,

    // writes
    pub writes_applied: usize,
    pub fallback_failures: usize,

    pub duration_ms: u64,

    // error tracking
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

impl RunSummary {
    pub fn from_cycle(
        trips_seen: usize,
        normalized: &Normalized,
        counts: &PlanCounts,
        report: &ApplyReport,
        duration_ms: u64,
    ) -> Self {
        RunSummary {
            timestamp: Utc::now(),
            trips_seen,
            trips_filtered: normalized.filtered,
            trips_rejected: normalized.rejected.len(),
            created: counts.created,
            updated: counts.updated,
            unchanged: counts.unchanged,
            malformed: counts.malformed,
            lookup_failures: counts.lookup_failures,
            key_collisions: counts.key_collisions,
            writes_applied: report.applied(),
            fallback_failures: report.fallback_failures,
            duration_ms,
            error_type: None,
            error_message: None,
        }
    }

    /// A cycle that stopped before touching the store.
    pub fn from_feed_error(err: &FeedUnavailableError, duration_ms: u64) -> Self {
        RunSummary {
            timestamp: Utc::now(),
            duration_ms,
            error_type: Some("feed_unavailable".to_string()),
            error_message: Some(err.to_string()),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_type.is_none()
    }
}
