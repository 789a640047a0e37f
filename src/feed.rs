//! Source of raw trips for a cycle.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::FeedUnavailableError;
use crate::fetch::{HttpClient, load_source};
use crate::model::RawTrip;
use crate::parser::{parse_feed, trip_updates};

/// Translink SEQ trip updates.
pub const DEFAULT_FEED_URL: &str = "https://gtfsrt.api.translink.com.au/api/realtime/SEQ/TripUpdates";

/// Produces the raw trips of one feed snapshot.
#[async_trait]
pub trait TripFeed: Send + Sync {
    async fn fetch_trips(&self) -> Result<Vec<RawTrip>, FeedUnavailableError>;

    /// Where the trips come from, for logs and error messages.
    fn origin(&self) -> &str;
}

/// GTFS-RT protobuf feed read from a URL or a local file.
pub struct GtfsRtFeed {
    source: String,
    client: Box<dyn HttpClient>,
}

impl GtfsRtFeed {
    pub fn new(source: impl Into<String>, client: Box<dyn HttpClient>) -> Self {
        Self {
            source: source.into(),
            client,
        }
    }
}

#[async_trait]
impl TripFeed for GtfsRtFeed {
    #[tracing::instrument(skip(self), fields(source = %self.source))]
    async fn fetch_trips(&self) -> Result<Vec<RawTrip>, FeedUnavailableError> {
        let bytes = load_source(self.client.as_ref(), &self.source)
            .await
            .map_err(|e| FeedUnavailableError::new(&self.source, format!("{e:#}")))?;
        debug!(bytes = bytes.len(), "Feed bytes received, parsing");

        let feed = parse_feed(&bytes)
            .map_err(|e| FeedUnavailableError::new(&self.source, format!("{e:#}")))?;
        let trips = trip_updates(&feed);

        info!(
            entities = feed.entity.len(),
            trip_updates = trips.len(),
            feed_timestamp = feed.header.timestamp,
            "Feed parsed"
        );
        Ok(trips)
    }

    fn origin(&self) -> &str {
        &self.source
    }
}
