// berthwatch/src/engine/dedup.rs
//
// Deduplication filter + the seen-identity working copy.
//
// The ledger is always re-read from the store's identity column at the start
// of a publish cycle. Within the process it only grows, and only after rows
// were actually appended (see publisher.rs).

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::engine::identity::compute_identity;
use crate::records::{RiskRecord, COL_PREDICTION_ID};

// ── Seen identities ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct SeenIdentities {
    ids: HashSet<String>,
}

impl SeenIdentities {
    /// Build from the raw identity column as read from the store. The header
    /// cell and blank cells are ignored.
    pub fn from_column(values: impl IntoIterator<Item = String>) -> Self {
        let ids = values.into_iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty() && v != COL_PREDICTION_ID)
            .collect();
        Self { ids }
    }

    pub fn contains(&self, id: &str) -> bool { self.ids.contains(id) }

    pub fn extend<I: IntoIterator<Item = String>>(&mut self, ids: I) { self.ids.extend(ids); }

    pub fn len(&self) -> usize { self.ids.len() }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool { self.ids.is_empty() }
}

// ── Candidate ─────────────────────────────────────────────────────────────────

/// A record that passed the filter, with the identity and marker it was
/// keyed under.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub prediction_id: String,
    pub time_marker:   String,
    pub record:        RiskRecord,
}

impl AsRef<RiskRecord> for Candidate {
    fn as_ref(&self) -> &RiskRecord { &self.record }
}

/// Keep records whose identity is not in `seen`, in caller order.
///
/// Two records in the same batch that share an identity collapse into one:
/// the later record's data wins, at the earlier record's position.
pub fn filter_new(
    records:         impl IntoIterator<Item = RiskRecord>,
    seen:            &SeenIdentities,
    fallback_marker: &str,
) -> Vec<Candidate> {
    let mut out:   Vec<Candidate>         = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut already = 0usize;

    for record in records {
        let marker = record.time_marker(fallback_marker).to_string();
        let id     = compute_identity(&record.entity_id, &marker);

        if seen.contains(&id) { already += 1; continue; }

        let cand = Candidate { prediction_id: id.clone(), time_marker: marker, record };
        match index.get(&id) {
            Some(&pos) => {
                debug!(prediction_id = %id, "identity collision within batch, keeping last");
                out[pos] = cand;
            }
            None => {
                index.insert(id, out.len());
                out.push(cand);
            }
        }
    }

    debug!(new = out.len(), already_recorded = already, "dedup filter");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::RiskLevel;

    const MARKER: &str = "2024-01-01T00:00:00Z";

    #[test]
    fn duplicate_rows_collapse_to_one() {
        let rec = RiskRecord::new("7", 0.95, RiskLevel::Critical).with_timestamp(MARKER);
        let out = filter_new(vec![rec.clone(), rec], &SeenIdentities::default(), "unused");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].prediction_id, compute_identity(7, MARKER));
    }

    #[test]
    fn collision_keeps_last_at_first_position() {
        let a = RiskRecord::new("7", 0.91, RiskLevel::Critical).with_timestamp(MARKER);
        let b = RiskRecord::new("8", 0.50, RiskLevel::Warning).with_timestamp(MARKER);
        let c = RiskRecord::new("7", 0.99, RiskLevel::Critical).with_timestamp(MARKER);
        let out = filter_new(vec![a, b, c], &SeenIdentities::default(), "unused");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].record.entity_id, "7");
        assert_eq!(out[0].record.risk_score, 0.99);
        assert_eq!(out[1].record.entity_id, "8");
    }

    #[test]
    fn seen_identities_are_excluded_and_order_is_kept() {
        let recs: Vec<RiskRecord> = (1..=5)
            .map(|i| RiskRecord::new(i.to_string(), 1.0 - i as f64 / 10.0, RiskLevel::Warning).with_timestamp(MARKER))
            .collect();
        let seen = SeenIdentities::from_column(vec![
            COL_PREDICTION_ID.to_string(),
            compute_identity(2, MARKER),
            String::new(),
            compute_identity(4, MARKER),
        ]);
        assert_eq!(seen.len(), 2);

        let ids: Vec<String> = filter_new(recs, &seen, "unused")
            .into_iter().map(|c| c.record.entity_id).collect();
        assert_eq!(ids, vec!["1", "3", "5"]);
    }

    #[test]
    fn fallback_marker_applies_only_without_timestamp() {
        let with    = RiskRecord::new("9", 0.4, RiskLevel::Warning).with_timestamp(MARKER);
        let without = RiskRecord::new("9", 0.4, RiskLevel::Warning);
        let out = filter_new(vec![with, without], &SeenIdentities::default(), "run-now");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].time_marker, MARKER);
        assert_eq!(out[1].time_marker, "run-now");
    }

    #[test]
    fn filter_does_not_touch_the_ledger() {
        let seen = SeenIdentities::default();
        let rec = RiskRecord::new("1", 0.3, RiskLevel::Warning).with_timestamp(MARKER);
        assert_eq!(filter_new(vec![rec.clone()], &seen, "x").len(), 1);
        assert_eq!(filter_new(vec![rec], &seen, "x").len(), 1);
        assert!(seen.is_empty());
    }
}
