//! Store key derivation.

use std::fmt;

pub const KEY_PREFIX: &str = "gtfs";

/// Store key for one `(trip_id, route_id)` pair: `gtfs:{trip_id}:{route_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreKey(String);

impl StoreKey {
    pub fn derive(trip_id: &str, route_id: &str) -> Self {
        Self(format!("{KEY_PREFIX}:{trip_id}:{route_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StoreKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
