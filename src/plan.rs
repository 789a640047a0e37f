//! Incremental diff between a cycle's trip records and the stored entries.
//!
//! Planning needs at most two store round trips no matter how many trips come
//! in: one `EXISTS` pipeline over every distinct key, then one `GET` pipeline
//! over the keys that exist. The diff itself is pure ([`plan_against`]).

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::MalformedEntryError;
use crate::key::StoreKey;
use crate::model::{StoreEntry, TripRecord};
use crate::store::TripStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// Key was absent (or unreadable); the full entry is written.
    Create,
    /// Stored entry had at least one stop appended or changed.
    Update,
}

/// One key's merged entry, ready to be written with its expiration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedWrite {
    pub key: StoreKey,
    pub entry: StoreEntry,
    pub ttl: Duration,
    pub kind: WriteKind,
}

/// Per-key classification of one planning pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PlanCounts {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub malformed: usize,
    pub lookup_failures: usize,
    pub key_collisions: usize,
    pub appended_stops: usize,
    pub updated_stops: usize,
}

#[derive(Debug, Default)]
pub struct WritePlan {
    pub writes: Vec<PlannedWrite>,
    pub counts: PlanCounts,
}

/// What the store held for a key when the cycle looked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Existing {
    Absent,
    Present(Vec<u8>),
    /// Neither the batched nor the single-key lookup answered.
    Unavailable,
}

/// Looks up every key the records touch and diffs them against the store.
#[tracing::instrument(skip_all, fields(records = records.len(), backend = store.backend_name()))]
pub async fn plan_writes<S>(store: &S, records: &[TripRecord], ttl: Duration) -> WritePlan
where
    S: TripStore + ?Sized,
{
    let keys = distinct_keys(records);
    let snapshot = snapshot(store, &keys).await;
    let plan = plan_against(records, &snapshot, ttl);

    info!(
        keys = keys.len(),
        writes = plan.writes.len(),
        created = plan.counts.created,
        updated = plan.counts.updated,
        unchanged = plan.counts.unchanged,
        "Write plan ready"
    );
    plan
}

/// Keys of `records` in first-seen order, without duplicates.
pub fn distinct_keys(records: &[TripRecord]) -> Vec<StoreKey> {
    let mut seen = HashSet::with_capacity(records.len());
    records
        .iter()
        .map(|r| StoreKey::derive(&r.trip_id, &r.route_id))
        .filter(|k| seen.insert(k.clone()))
        .collect()
}

/// Reads the current payload of each key, batched where possible.
///
/// A failed batched lookup degrades to one `GET` per affected key; a key whose
/// single lookup also fails is reported as [`Existing::Unavailable`].
pub async fn snapshot<S>(store: &S, keys: &[StoreKey]) -> HashMap<StoreKey, Existing>
where
    S: TripStore + ?Sized,
{
    let mut out = HashMap::with_capacity(keys.len());
    if keys.is_empty() {
        return out;
    }

    let flags = match store.exists_many(keys).await {
        Ok(flags) => flags,
        Err(e) => {
            warn!(error = %e, keys = keys.len(), "Batched EXISTS failed, looking up keys one by one");
            lookup_singly(store, keys, &mut out).await;
            return out;
        }
    };

    let mut present = Vec::new();
    for (key, exists) in keys.iter().zip(flags) {
        if exists {
            present.push(key.clone());
        } else {
            out.insert(key.clone(), Existing::Absent);
        }
    }
    debug!(existing = present.len(), absent = out.len(), "Existence checked");

    if present.is_empty() {
        return out;
    }

    match store.get_many(&present).await {
        Ok(values) => {
            for (key, value) in present.into_iter().zip(values) {
                // Expired between EXISTS and GET.
                let existing = value.map_or(Existing::Absent, Existing::Present);
                out.insert(key, existing);
            }
        }
        Err(e) => {
            warn!(error = %e, keys = present.len(), "Batched GET failed, looking up keys one by one");
            lookup_singly(store, &present, &mut out).await;
        }
    }

    out
}

async fn lookup_singly<S>(store: &S, keys: &[StoreKey], out: &mut HashMap<StoreKey, Existing>)
where
    S: TripStore + ?Sized,
{
    for key in keys {
        let existing = match store.get(key).await {
            Ok(Some(bytes)) => Existing::Present(bytes),
            Ok(None) => Existing::Absent,
            Err(e) => {
                warn!(key = %key, error = %e, "Lookup failed, skipping key this cycle");
                Existing::Unavailable
            }
        };
        out.insert(key.clone(), existing);
    }
}

/// Diffs `records` against a snapshot of the store.
///
/// Records sharing a key are folded first, later records winning on conflicts.
/// Keys missing from `snapshot` count as absent.
pub fn plan_against(
    records: &[TripRecord],
    snapshot: &HashMap<StoreKey, Existing>,
    ttl: Duration,
) -> WritePlan {
    let mut counts = PlanCounts::default();
    let incoming = fold_by_key(records, &mut counts);
    let mut writes = Vec::with_capacity(incoming.len());

    for (key, mut entry) in incoming {
        let stored = match snapshot.get(&key) {
            None | Some(Existing::Absent) => None,
            Some(Existing::Unavailable) => {
                counts.lookup_failures += 1;
                continue;
            }
            Some(Existing::Present(bytes)) => match decode_stored(&key, &entry, bytes) {
                Ok(stored) => Some(stored),
                Err(e) => {
                    warn!(error = %e, "Overwriting unreadable entry");
                    counts.malformed += 1;
                    None
                }
            },
        };

        match stored {
            None => {
                entry.stops.sort_by(|a, b| {
                    a.stop_sequence
                        .cmp(&b.stop_sequence)
                        .then_with(|| a.stop_id.cmp(&b.stop_id))
                });
                counts.created += 1;
                writes.push(PlannedWrite {
                    key,
                    entry,
                    ttl,
                    kind: WriteKind::Create,
                });
            }
            Some(mut stored) => {
                let outcome = stored.merge(&entry.stops);
                if outcome.changed() {
                    counts.updated += 1;
                    counts.appended_stops += outcome.appended;
                    counts.updated_stops += outcome.updated;
                    writes.push(PlannedWrite {
                        key,
                        entry: stored,
                        ttl,
                        kind: WriteKind::Update,
                    });
                } else {
                    counts.unchanged += 1;
                }
            }
        }
    }

    WritePlan { writes, counts }
}

/// Folds records into one incoming entry per key, in first-seen key order.
fn fold_by_key(records: &[TripRecord], counts: &mut PlanCounts) -> Vec<(StoreKey, StoreEntry)> {
    let mut slots: HashMap<StoreKey, usize> = HashMap::with_capacity(records.len());
    let mut folded: Vec<(StoreKey, StoreEntry)> = Vec::with_capacity(records.len());

    for record in records {
        let key = StoreKey::derive(&record.trip_id, &record.route_id);
        match slots.get(&key) {
            Some(&slot) => {
                let entry = &mut folded[slot].1;
                if entry.trip_id != record.trip_id || entry.route_id != record.route_id {
                    warn!(
                        key = %key,
                        kept_trip = %entry.trip_id,
                        dropped_trip = %record.trip_id,
                        "Distinct trips derive the same key, dropping the later one"
                    );
                    counts.key_collisions += 1;
                    continue;
                }
                entry.merge(&record.stops);
            }
            None => {
                slots.insert(key.clone(), folded.len());
                folded.push((key, StoreEntry::from_record(record)));
            }
        }
    }

    folded
}

fn decode_stored(
    key: &StoreKey,
    incoming: &StoreEntry,
    bytes: &[u8],
) -> Result<StoreEntry, MalformedEntryError> {
    let stored = StoreEntry::decode(bytes).map_err(|e| MalformedEntryError {
        key: key.to_string(),
        reason: e.to_string(),
    })?;

    if stored.trip_id != incoming.trip_id || stored.route_id != incoming.route_id {
        return Err(MalformedEntryError {
            key: key.to_string(),
            reason: format!(
                "holds trip {} on route {}",
                stored.trip_id, stored.route_id
            ),
        });
    }

    Ok(stored)
}
