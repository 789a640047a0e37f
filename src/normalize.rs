//! Reduces raw feed trips to their two nearest stops.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::IncompleteTripError;
use crate::model::{RawStopTimeEvent, RawStopTimeUpdate, RawTrip, StopObservation, TripRecord};

/// Keeps only trips whose `trip_id` contains one of the patterns.
///
/// An empty filter accepts every trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TripFilter {
    patterns: Vec<String>,
}

impl TripFilter {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(Into::into)
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Parses a comma-separated list such as `SBL,SUN`.
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(',').map(str::trim))
    }

    pub fn accepts(&self, trip_id: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| trip_id.contains(p.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Turns a raw trip into a [`TripRecord`].
///
/// The record holds the stop update with the lowest `stop_sequence` and the next
/// higher sequence present. Updates without a stop id, a sequence, or any
/// absolute time are ignored; when two updates share a sequence the later one
/// wins. Stops are not filtered by departure time: whatever the feed still
/// lists counts as upcoming.
pub fn normalize_trip(raw: &RawTrip) -> Result<TripRecord, IncompleteTripError> {
    if raw.trip_id.is_empty() {
        return Err(IncompleteTripError::MissingTripId);
    }
    if raw.route_id.is_empty() {
        return Err(IncompleteTripError::MissingRouteId {
            trip_id: raw.trip_id.clone(),
        });
    }

    let by_sequence: BTreeMap<u32, StopObservation> = raw
        .stop_time_updates
        .iter()
        .filter_map(observe)
        .map(|obs| (obs.stop_sequence, obs))
        .collect();

    let mut nearest = by_sequence.into_values();
    match (nearest.next(), nearest.next()) {
        (Some(first), Some(second)) => Ok(TripRecord::new(
            raw.trip_id.clone(),
            raw.route_id.clone(),
            first,
            second,
        )),
        (first, _) => Err(IncompleteTripError::TooFewStops {
            trip_id: raw.trip_id.clone(),
            usable: usize::from(first.is_some()),
        }),
    }
}

fn observe(update: &RawStopTimeUpdate) -> Option<StopObservation> {
    let stop_id = update.stop_id.as_deref().filter(|id| !id.is_empty())?;
    let stop_sequence = update.stop_sequence?;
    let (delay, time) = timed(update.departure.as_ref()).or_else(|| timed(update.arrival.as_ref()))?;

    Some(StopObservation::new(stop_id, stop_sequence, delay, time))
}

fn timed(event: Option<&RawStopTimeEvent>) -> Option<(i32, DateTime<Utc>)> {
    let event = event?;
    let time = DateTime::from_timestamp(event.time?, 0)?;
    Some((event.delay.unwrap_or(0), time))
}

/// Outcome of normalizing one feed snapshot.
#[derive(Debug, Default)]
pub struct Normalized {
    pub records: Vec<TripRecord>,
    pub rejected: Vec<IncompleteTripError>,
    pub filtered: usize,
}

/// Normalizes every trip, keeping rejections apart from valid records.
pub fn normalize_all(trips: &[RawTrip], filter: &TripFilter) -> Normalized {
    let mut out = Normalized::default();

    for trip in trips {
        if !filter.accepts(&trip.trip_id) {
            out.filtered += 1;
            continue;
        }
        match normalize_trip(trip) {
            Ok(record) => out.records.push(record),
            Err(e) => out.rejected.push(e),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::canonical_time;

    fn update(stop_id: &str, seq: u32, delay: i32, time: i64) -> RawStopTimeUpdate {
        RawStopTimeUpdate {
            stop_id: Some(stop_id.to_string()),
            stop_sequence: Some(seq),
            arrival: None,
            departure: Some(RawStopTimeEvent {
                delay: Some(delay),
                time: Some(time),
            }),
        }
    }

    fn trip(updates: Vec<RawStopTimeUpdate>) -> RawTrip {
        RawTrip {
            trip_id: "T1".to_string(),
            route_id: "R1".to_string(),
            stop_time_updates: updates,
        }
    }

    const JAN_1: i64 = 1_735_689_600; // 2025-01-01T00:00:00Z

    #[test]
    fn test_picks_min_sequence_and_successor() {
        let raw = trip(vec![
            update("S7", 7, 0, JAN_1 + 300),
            update("S5", 5, 30, JAN_1 + 60),
            update("S6", 6, 45, JAN_1 + 120),
        ]);
        let record = normalize_trip(&raw).unwrap();

        assert_eq!(record.stops[0].stop_id, "S5");
        assert_eq!(record.stops[0].departure_delay, 30);
        assert_eq!(record.stops[1].stop_id, "S6");
        assert_eq!(
            canonical_time::format(&record.stops[0].departure_time),
            "2025-01-01T00:01:00Z"
        );
    }

    #[test]
    fn test_successor_is_next_present_sequence() {
        let raw = trip(vec![update("S2", 2, 0, JAN_1), update("S9", 9, 0, JAN_1 + 600)]);
        let record = normalize_trip(&raw).unwrap();
        assert_eq!(record.stops[1].stop_sequence, 9);
    }

    #[test]
    fn test_single_stop_is_rejected() {
        let raw = trip(vec![update("S1", 1, 0, JAN_1)]);
        assert_eq!(
            normalize_trip(&raw),
            Err(IncompleteTripError::TooFewStops {
                trip_id: "T1".to_string(),
                usable: 1
            })
        );
    }

    #[test]
    fn test_arrival_used_when_departure_missing() {
        let mut last = update("S2", 2, 0, 0);
        last.departure = None;
        last.arrival = Some(RawStopTimeEvent {
            delay: None,
            time: Some(JAN_1 + 90),
        });
        let record = normalize_trip(&trip(vec![update("S1", 1, 12, JAN_1), last])).unwrap();

        assert_eq!(record.stops[1].departure_delay, 0);
        assert_eq!(
            canonical_time::format(&record.stops[1].departure_time),
            "2025-01-01T00:01:30Z"
        );
    }

    #[test]
    fn test_unusable_updates_are_ignored() {
        let mut no_time = update("S1", 1, 0, 0);
        no_time.departure = Some(RawStopTimeEvent {
            delay: Some(5),
            time: None,
        });
        let mut no_seq = update("S2", 2, 0, JAN_1);
        no_seq.stop_sequence = None;
        let raw = trip(vec![no_time, no_seq, update("S3", 3, 0, JAN_1)]);

        assert!(matches!(
            normalize_trip(&raw),
            Err(IncompleteTripError::TooFewStops { usable: 1, .. })
        ));
    }

    #[test]
    fn test_duplicate_sequence_last_wins() {
        let raw = trip(vec![
            update("S1", 1, 10, JAN_1),
            update("S1", 1, 20, JAN_1 + 20),
            update("S2", 2, 0, JAN_1 + 60),
        ]);
        let record = normalize_trip(&raw).unwrap();
        assert_eq!(record.stops[0].departure_delay, 20);
    }

    #[test]
    fn test_missing_ids_rejected() {
        let mut raw = trip(vec![update("S1", 1, 0, JAN_1), update("S2", 2, 0, JAN_1)]);
        raw.route_id.clear();
        assert!(matches!(
            normalize_trip(&raw),
            Err(IncompleteTripError::MissingRouteId { .. })
        ));
        raw.trip_id.clear();
        assert_eq!(normalize_trip(&raw), Err(IncompleteTripError::MissingTripId));
    }

    #[test]
    fn test_filter_patterns() {
        let filter = TripFilter::parse("SBL, SUN,");
        assert!(filter.accepts("30452-SBL 24_25-39019"));
        assert!(filter.accepts("1234-SUN"));
        assert!(!filter.accepts("1234-BCC"));
        assert!(TripFilter::parse("").accepts("anything"));
        assert!(TripFilter::default().is_empty());
    }

    #[test]
    fn test_normalize_all_separates_rejections() {
        let good = trip(vec![update("S1", 1, 0, JAN_1), update("S2", 2, 0, JAN_1)]);
        let mut bad = trip(vec![update("S1", 1, 0, JAN_1)]);
        bad.trip_id = "T2".to_string();
        let mut other = good.clone();
        other.trip_id = "X-ABC".to_string();

        let filter = TripFilter::new(["T"]);
        let out = normalize_all(&[good, bad, other], &filter);

        assert_eq!(out.records.len(), 1);
        assert_eq!(out.rejected.len(), 1);
        assert_eq!(out.filtered, 1);
    }
}
