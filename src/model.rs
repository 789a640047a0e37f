//! Trip and stop types shared by the normalizer, planner and store.
//!
//! [`StoreEntry`] is also the persisted JSON shape:
//!
//! ```json
//! {
//!   "trip_id": "T1",
//!   "route_id": "R1",
//!   "stops": [
//!     {"stop_id": "S1", "departure_delay": 10, "departure_time": "2025-01-01T00:00:00Z", "stop_sequence": 1}
//!   ]
//! }
//! ```

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// A single stop's departure as last reported by the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopObservation {
    pub stop_id: String,
    pub departure_delay: i32,
    #[serde(with = "canonical_time")]
    pub departure_time: DateTime<Utc>,
    pub stop_sequence: u32,
}

impl StopObservation {
    pub fn new(
        stop_id: impl Into<String>,
        stop_sequence: u32,
        departure_delay: i32,
        departure_time: DateTime<Utc>,
    ) -> Self {
        Self {
            stop_id: stop_id.into(),
            departure_delay,
            departure_time: departure_time.trunc_subsecs(0),
            stop_sequence,
        }
    }

    /// `(stop_id, stop_sequence)`; two observations are the same stop only if both match.
    pub fn identity(&self) -> (&str, u32) {
        (&self.stop_id, self.stop_sequence)
    }

    pub fn same_stop(&self, other: &StopObservation) -> bool {
        self.identity() == other.identity()
    }

    /// True when delay and time both match, i.e. rewriting would change nothing.
    pub fn same_departure(&self, other: &StopObservation) -> bool {
        self.departure_delay == other.departure_delay
            && self.departure_time == other.departure_time
    }
}

/// A trip reduced to its first remaining stop and the one after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripRecord {
    pub trip_id: String,
    pub route_id: String,
    pub stops: [StopObservation; 2],
}

impl TripRecord {
    /// Builds a record, ordering the two stops by `stop_sequence`.
    pub fn new(
        trip_id: impl Into<String>,
        route_id: impl Into<String>,
        a: StopObservation,
        b: StopObservation,
    ) -> Self {
        let stops = if a.stop_sequence <= b.stop_sequence {
            [a, b]
        } else {
            [b, a]
        };
        Self {
            trip_id: trip_id.into(),
            route_id: route_id.into(),
            stops,
        }
    }
}

/// What the store holds for one `(trip_id, route_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreEntry {
    pub trip_id: String,
    pub route_id: String,
    pub stops: Vec<StopObservation>,
}

/// How many stops a merge touched.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    pub appended: usize,
    pub updated: usize,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        self.appended > 0 || self.updated > 0
    }
}

impl StoreEntry {
    pub fn from_record(record: &TripRecord) -> Self {
        Self {
            trip_id: record.trip_id.clone(),
            route_id: record.route_id.clone(),
            stops: record.stops.to_vec(),
        }
    }

    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn find(&self, stop_id: &str, stop_sequence: u32) -> Option<&StopObservation> {
        self.stops
            .iter()
            .find(|s| s.identity() == (stop_id, stop_sequence))
    }

    /// Folds `incoming` into this entry's stop set.
    ///
    /// Unknown stops are appended in the order given; known stops get their
    /// delay and time replaced only when either differs.
    pub fn merge<'a>(
        &mut self,
        incoming: impl IntoIterator<Item = &'a StopObservation>,
    ) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();

        for stop in incoming {
            match self.stops.iter_mut().find(|s| s.same_stop(stop)) {
                Some(existing) if existing.same_departure(stop) => {}
                Some(existing) => {
                    existing.departure_delay = stop.departure_delay;
                    existing.departure_time = stop.departure_time;
                    outcome.updated += 1;
                }
                None => {
                    self.stops.push(stop.clone());
                    outcome.appended += 1;
                }
            }
        }

        outcome
    }
}

/// GTFS-RT `StopTimeEvent`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawStopTimeEvent {
    #[serde(default)]
    pub delay: Option<i32>,
    #[serde(default)]
    pub time: Option<i64>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawStopTimeUpdate {
    #[serde(default)]
    pub stop_id: Option<String>,
    #[serde(default)]
    pub stop_sequence: Option<u32>,
    #[serde(default)]
    pub arrival: Option<RawStopTimeEvent>,
    #[serde(default)]
    pub departure: Option<RawStopTimeEvent>,
}

/// A trip as it comes off the feed, before normalization.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTrip {
    pub trip_id: String,
    pub route_id: String,
    #[serde(default)]
    pub stop_time_updates: Vec<RawStopTimeUpdate>,
}

/// Serde adapter writing `YYYY-MM-DDTHH:MM:SSZ` and reading any RFC 3339 time.
pub mod canonical_time {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

    pub fn format(time: &DateTime<Utc>) -> String {
        time.format(FORMAT).to_string()
    }

    pub fn parse(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(value).map(|t| t.with_timezone(&Utc))
    }

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&time.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(value: &str) -> DateTime<Utc> {
        canonical_time::parse(value).unwrap()
    }

    fn stop(id: &str, seq: u32, delay: i32, time: &str) -> StopObservation {
        StopObservation::new(id, seq, delay, at(time))
    }

    #[test]
    fn test_record_orders_stops_by_sequence() {
        let record = TripRecord::new(
            "T1",
            "R1",
            stop("S2", 2, 20, "2025-01-01T00:01:00Z"),
            stop("S1", 1, 10, "2025-01-01T00:00:00Z"),
        );
        assert_eq!(record.stops[0].stop_id, "S1");
        assert_eq!(record.stops[1].stop_id, "S2");
    }

    #[test]
    fn test_entry_json_field_names_and_time_format() {
        let record = TripRecord::new(
            "T1",
            "R1",
            stop("S1", 1, 10, "2025-01-01T00:00:00Z"),
            stop("S2", 2, 20, "2025-01-01T00:01:00Z"),
        );
        let bytes = StoreEntry::from_record(&record).encode().unwrap();
        let json = String::from_utf8(bytes).unwrap();

        assert_eq!(
            json,
            r#"{"trip_id":"T1","route_id":"R1","stops":[{"stop_id":"S1","departure_delay":10,"departure_time":"2025-01-01T00:00:00Z","stop_sequence":1},{"stop_id":"S2","departure_delay":20,"departure_time":"2025-01-01T00:01:00Z","stop_sequence":2}]}"#
        );
    }

    #[test]
    fn test_decode_accepts_offset_timestamps() {
        let json = br#"{"trip_id":"T1","route_id":"R1","stops":[{"stop_id":"S1","departure_delay":-30,"departure_time":"2025-01-01T10:00:00+10:00","stop_sequence":4}]}"#;
        let entry = StoreEntry::decode(json).unwrap();
        assert_eq!(entry.stops[0].departure_time, at("2025-01-01T00:00:00Z"));
        assert_eq!(entry.stops[0].departure_delay, -30);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(StoreEntry::decode(b"not json").is_err());
        assert!(StoreEntry::decode(br#"{"trip_id":"T1"}"#).is_err());
    }

    #[test]
    fn test_merge_updates_appends_and_skips() {
        let mut entry = StoreEntry {
            trip_id: "T1".into(),
            route_id: "R1".into(),
            stops: vec![
                stop("S1", 1, 10, "2025-01-01T00:00:00Z"),
                stop("S2", 2, 20, "2025-01-01T00:01:00Z"),
            ],
        };
        let incoming = [
            stop("S2", 2, 20, "2025-01-01T00:01:00Z"),
            stop("S1", 1, 15, "2025-01-01T00:00:05Z"),
            stop("S3", 3, 0, "2025-01-01T00:02:00Z"),
        ];

        let outcome = entry.merge(&incoming);

        assert_eq!(outcome, MergeOutcome { appended: 1, updated: 1 });
        assert_eq!(entry.stops.len(), 3);
        assert_eq!(entry.find("S1", 1).unwrap().departure_delay, 15);
        assert_eq!(entry.stops[2].stop_id, "S3");
    }

    #[test]
    fn test_merge_treats_sequence_change_as_new_stop() {
        let mut entry = StoreEntry {
            trip_id: "T1".into(),
            route_id: "R1".into(),
            stops: vec![stop("S1", 1, 10, "2025-01-01T00:00:00Z")],
        };
        let outcome = entry.merge(&[stop("S1", 2, 10, "2025-01-01T00:00:00Z")]);
        assert_eq!(outcome.appended, 1);
        assert_eq!(entry.stops.len(), 2);
    }

    #[test]
    fn test_merge_identical_is_unchanged() {
        let original = stop("S1", 1, 10, "2025-01-01T00:00:00Z");
        let mut entry = StoreEntry {
            trip_id: "T1".into(),
            route_id: "R1".into(),
            stops: vec![original.clone()],
        };
        assert!(!entry.merge([&original]).changed());
    }

    #[test]
    fn test_observation_truncates_subseconds() {
        let time = at("2025-01-01T00:00:00.750Z");
        let obs = StopObservation::new("S1", 1, 0, time);
        assert_eq!(canonical_time::format(&obs.departure_time), "2025-01-01T00:00:00Z");
    }
}
