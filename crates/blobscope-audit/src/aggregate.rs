//! Folding index entries into per-key state.
//!
//! [`BlobStatusMap`] tracks, per key, which replicas hold it live and which
//! saw it deleted or expired. Each snapshot file is folded on its own into an
//! immutable map; maps are combined oldest to newest with
//! [`BlobStatusMap::merge`].
//!
//! [`ActiveBlobSet`] is the single-replica variant: `key -> record text` for
//! keys whose latest entry is live. A delete or expiry retires the key for
//! good.

use std::collections::{BTreeMap, BTreeSet};
use std::collections::btree_map::Entry;

use blobscope_types::{Anomaly, BlobStatus, IndexEntry, StoreKey};
use serde::Serialize;
use tracing::{debug, warn};

const TARGET: &str = "blobscope.audit::aggregate";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BlobStatusMap {
    statuses: BTreeMap<StoreKey, BlobStatus>,
    /// Per key and replica, live entries not preceded by a dead entry for the
    /// same replica. Each one is a put-after-delete once an older map saw
    /// that replica delete the key.
    #[serde(skip)]
    leading_puts: BTreeMap<StoreKey, BTreeMap<String, u64>>,
    entries_processed: u64,
}

impl BlobStatusMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold the entries of one snapshot file, in file order, for `replica`.
    pub fn fold_snapshot<'a>(
        entries: impl IntoIterator<Item = &'a IndexEntry>,
        replica: &str,
        now_ms: u64,
    ) -> (Self, Vec<Anomaly>) {
        let mut map = Self::new();
        let mut anomalies = Vec::new();
        for entry in entries {
            anomalies.extend(map.apply(entry, replica, now_ms));
        }
        debug!(
            target: TARGET,
            replica,
            keys = map.len(),
            entries = map.entries_processed,
            "folded snapshot"
        );
        (map, anomalies)
    }

    fn apply(&mut self, entry: &IndexEntry, replica: &str, now_ms: u64) -> Option<Anomaly> {
        self.entries_processed += 1;
        let dead = entry.value.is_deleted_or_expired(now_ms);
        let (leading, anomaly) = match self.statuses.entry(entry.key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(BlobStatus::seeded(replica, dead));
                (!dead, None)
            }
            Entry::Occupied(mut slot) => {
                let status = slot.get_mut();
                if dead {
                    status.available.remove(replica);
                    status.deleted_or_expired.insert(replica.to_owned());
                    (false, None)
                } else {
                    status.available.insert(replica.to_owned());
                    if status.is_deleted_or_expired_on(replica) {
                        (false, Some(put_after_delete(&entry.key, replica)))
                    } else {
                        (true, None)
                    }
                }
            }
        };
        if leading {
            *self
                .leading_puts
                .entry(entry.key.clone())
                .or_default()
                .entry(replica.to_owned())
                .or_default() += 1;
        }
        anomaly
    }

    /// Combine with the fold of a newer file.
    ///
    /// Every live entry the newer map saw for a replica before any delete of
    /// its own is reported once if this map saw that replica delete the key,
    /// so merging per-file folds reports what one sequential fold would.
    #[must_use]
    pub fn merge(mut self, mut newer: Self) -> (Self, Vec<Anomaly>) {
        let mut anomalies = Vec::new();
        for (key, incoming) in newer.statuses {
            let incoming_leading = newer.leading_puts.remove(&key).unwrap_or_default();
            match self.statuses.entry(key) {
                Entry::Vacant(slot) => {
                    if !incoming_leading.is_empty() {
                        self.leading_puts.insert(slot.key().clone(), incoming_leading);
                    }
                    slot.insert(incoming);
                }
                Entry::Occupied(mut slot) => {
                    let key = slot.key().clone();
                    let status = slot.get_mut();
                    for (replica, puts) in incoming_leading {
                        if status.is_deleted_or_expired_on(&replica) {
                            for _ in 0..puts {
                                anomalies.push(put_after_delete(&key, &replica));
                            }
                        } else {
                            *self
                                .leading_puts
                                .entry(key.clone())
                                .or_default()
                                .entry(replica)
                                .or_default() += puts;
                        }
                    }
                    for replica in &incoming.deleted_or_expired {
                        if !incoming.is_available_on(replica) {
                            status.available.remove(replica);
                        }
                    }
                    status.available.extend(incoming.available);
                    status.deleted_or_expired.extend(incoming.deleted_or_expired);
                }
            }
        }
        self.entries_processed += newer.entries_processed;
        (self, anomalies)
    }

    #[must_use]
    pub fn get(&self, key: &StoreKey) -> Option<&BlobStatus> {
        self.statuses.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StoreKey, &BlobStatus)> {
        self.statuses.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    #[must_use]
    pub const fn entries_processed(&self) -> u64 {
        self.entries_processed
    }
}

fn put_after_delete(key: &StoreKey, replica: &str) -> Anomaly {
    warn!(target: TARGET, key = %key, replica, "put observed after delete");
    Anomaly::PutAfterDelete {
        key: key.id(),
        replica: replica.to_owned(),
    }
}

/// Keys whose latest entry is live, with the entry's rendered text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveBlobSet {
    active: BTreeMap<StoreKey, String>,
    retired: BTreeSet<StoreKey>,
}

impl ActiveBlobSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one entry; returns the anomaly it raised, if any.
    pub fn observe(&mut self, entry: &IndexEntry, now_ms: u64) -> Option<Anomaly> {
        if entry.value.is_deleted_or_expired(now_ms) {
            if self.active.remove(&entry.key).is_some() {
                debug!(target: TARGET, key = %entry.key, "retired active blob");
            }
            self.retired.insert(entry.key.clone());
            return None;
        }
        if self.retired.contains(&entry.key) {
            warn!(target: TARGET, key = %entry.key, "put after removal");
            return Some(Anomaly::PutAfterRemoval {
                key: entry.key.id(),
            });
        }
        match self.active.entry(entry.key.clone()) {
            Entry::Occupied(_) => {
                warn!(target: TARGET, key = %entry.key, "duplicate put");
                Some(Anomaly::DuplicatePut {
                    key: entry.key.id(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(entry.to_string());
                None
            }
        }
    }

    #[must_use]
    pub fn contains(&self, key: &StoreKey) -> bool {
        self.active.contains_key(key)
    }

    #[must_use]
    pub fn is_retired(&self, key: &StoreKey) -> bool {
        self.retired.contains(key)
    }

    /// Active keys and their record text, in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&StoreKey, &str)> {
        self.active.iter().map(|(key, text)| (key, text.as_str()))
    }

    /// Record texts in key order.
    #[must_use]
    pub fn records(&self) -> Vec<&str> {
        self.active.values().map(String::as_str).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
