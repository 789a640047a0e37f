//! Protobuf parser for GTFS Realtime feeds.

use anyhow::Result;
use prost::Message;

use crate::gtfs_rt::trip_update::{StopTimeEvent, StopTimeUpdate};
use crate::gtfs_rt::{FeedMessage, TripUpdate};
use crate::model::{RawStopTimeEvent, RawStopTimeUpdate, RawTrip};

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid protobuf for a `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage> {
    Ok(FeedMessage::decode(bytes)?)
}

/// Extracts every live trip update as a [`RawTrip`].
///
/// Deleted entities and entities without a trip update are skipped. Missing
/// trip or route ids become empty strings and are rejected later by the
/// normalizer.
pub fn trip_updates(feed: &FeedMessage) -> Vec<RawTrip> {
    feed.entity
        .iter()
        .filter(|e| !e.is_deleted.unwrap_or(false))
        .filter_map(|e| e.trip_update.as_ref())
        .map(raw_trip)
        .collect()
}

fn raw_trip(update: &TripUpdate) -> RawTrip {
    RawTrip {
        trip_id: update.trip.trip_id.clone().unwrap_or_default(),
        route_id: update.trip.route_id.clone().unwrap_or_default(),
        stop_time_updates: update.stop_time_update.iter().map(raw_stop).collect(),
    }
}

fn raw_stop(stu: &StopTimeUpdate) -> RawStopTimeUpdate {
    RawStopTimeUpdate {
        stop_id: stu.stop_id.clone(),
        stop_sequence: stu.stop_sequence,
        arrival: stu.arrival.as_ref().map(raw_event),
        departure: stu.departure.as_ref().map(raw_event),
    }
}

fn raw_event(event: &StopTimeEvent) -> RawStopTimeEvent {
    RawStopTimeEvent {
        delay: event.delay,
        time: event.time,
    }
}
