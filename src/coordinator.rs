//! One ETL cycle: fetch, normalize, plan, apply, report.
//!
//! A cycle keeps no state between runs; the store is the only thing that
//! persists. It always ends in a [`RunSummary`]. A feed failure skips straight
//! to reporting without touching the store, any other failure is absorbed and
//! counted.

use std::fmt;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::apply::BatchApplier;
use crate::config::RunConfig;
use crate::feed::TripFeed;
use crate::normalize::{TripFilter, normalize_all};
use crate::plan::plan_writes;
use crate::store::TripStore;
use crate::summary::RunSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Fetching,
    Normalizing,
    Planning,
    Applying,
    Reporting,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Fetching => "fetching",
            CyclePhase::Normalizing => "normalizing",
            CyclePhase::Planning => "planning",
            CyclePhase::Applying => "applying",
            CyclePhase::Reporting => "reporting",
        };
        f.write_str(name)
    }
}

struct Cycle {
    phase: CyclePhase,
    started: Instant,
}

impl Cycle {
    fn start() -> Self {
        Self {
            phase: CyclePhase::Idle,
            started: Instant::now(),
        }
    }

    fn enter(&mut self, next: CyclePhase) {
        debug!(from = %self.phase, to = %next, "Cycle phase");
        self.phase = next;
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Runs cycles against a feed and a store it does not own.
pub struct RunCoordinator<'a, F: ?Sized, S: ?Sized> {
    feed: &'a F,
    store: &'a S,
    config: &'a RunConfig,
    filter: TripFilter,
}

impl<'a, F, S> RunCoordinator<'a, F, S>
where
    F: TripFeed + ?Sized,
    S: TripStore + ?Sized,
{
    pub fn new(feed: &'a F, store: &'a S, config: &'a RunConfig, filter: TripFilter) -> Self {
        Self {
            feed,
            store,
            config,
            filter,
        }
    }

    #[tracing::instrument(skip_all, fields(feed = %self.feed.origin(), store = self.store.backend_name()))]
    pub async fn run_cycle(&self) -> RunSummary {
        let mut cycle = Cycle::start();

        cycle.enter(CyclePhase::Fetching);
        let trips = match self.feed.fetch_trips().await {
            Ok(trips) => trips,
            Err(e) => {
                cycle.enter(CyclePhase::Reporting);
                warn!(error = %e, "Feed unavailable, store left untouched");
                let summary = RunSummary::from_feed_error(&e, cycle.elapsed_ms());
                cycle.enter(CyclePhase::Idle);
                return summary;
            }
        };

        cycle.enter(CyclePhase::Normalizing);
        let normalized = normalize_all(&trips, &self.filter);
        for rejection in &normalized.rejected {
            debug!(reason = %rejection, "Trip skipped");
        }
        info!(
            trips = trips.len(),
            records = normalized.records.len(),
            rejected = normalized.rejected.len(),
            filtered = normalized.filtered,
            "Trips normalized"
        );

        cycle.enter(CyclePhase::Planning);
        let plan = plan_writes(self.store, &normalized.records, self.config.retention).await;

        cycle.enter(CyclePhase::Applying);
        let report = BatchApplier::new(self.store, self.config.max_batch_size)
            .apply(&plan.writes)
            .await;

        cycle.enter(CyclePhase::Reporting);
        let summary = RunSummary::from_cycle(
            trips.len(),
            &normalized,
            &plan.counts,
            &report,
            cycle.elapsed_ms(),
        );
        info!(
            created = summary.created,
            updated = summary.updated,
            unchanged = summary.unchanged,
            rejected = summary.trips_rejected,
            fallback_failures = summary.fallback_failures,
            duration_ms = summary.duration_ms,
            "Cycle complete"
        );
        cycle.enter(CyclePhase::Idle);

        summary
    }
}
