//! Set difference between a remote listing and the local snapshot.

use std::collections::BTreeSet;

use matchstats_core::{ListingEntity, LocalSnapshot, NaturalKey};
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// Entities needing a fetch, in remote listing order.
    pub to_fetch: Vec<ListingEntity>,
    pub stats: ReconcileStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub remote: usize,
    pub local: usize,
    pub selected: usize,
    pub unchanged: usize,
    pub dropped_missing_key: usize,
    pub duplicates: usize,
}

/// Selects entities whose (key, status) pair is absent locally, plus every in-progress entity.
///
/// Entities without a natural key are dropped. A key listed twice keeps its first occurrence.
pub fn reconcile(remote: Vec<ListingEntity>, local: &LocalSnapshot) -> Reconciliation {
    let mut stats = ReconcileStats {
        remote: remote.len(),
        local: local.len(),
        ..ReconcileStats::default()
    };
    let mut seen: BTreeSet<NaturalKey> = BTreeSet::new();
    let mut to_fetch = Vec::new();

    for entity in remote {
        let Some(key) = entity.natural_key() else {
            warn!(kind = ?entity.kind, url = ?entity.url, "remote entity has no natural key; dropped");
            stats.dropped_missing_key += 1;
            continue;
        };
        if !seen.insert(key.clone()) {
            debug!(%key, "duplicate remote entity ignored");
            stats.duplicates += 1;
            continue;
        }
        if entity.status.is_in_progress() || !local.contains(&key, entity.status) {
            to_fetch.push(entity);
        } else {
            stats.unchanged += 1;
        }
    }

    stats.selected = to_fetch.len();
    Reconciliation { to_fetch, stats }
}
