// berthwatch/src/engine/selector.rs
//
// Ranking + sampling of records for publication.
//
//   global    — one sort on `order_by` (descending), truncate to cap_total
//   stratified — partition by risk tier, sort each, take up to the tier's cap,
//                concatenate in configured tier order, then apply cap_total
//
// Stratified mode exists so NORMAL/WARNING rows stay visible when a large
// CRITICAL population would otherwise fill the whole top-N.
//
// Sorting is stable: ties keep input order, records with no sort key go last.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::records::{RiskLevel, RiskRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    #[default]
    RiskScore,
    DelayMinutes,
    Timestamp,
}

impl std::str::FromStr for OrderBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "risk_score" | "riskScore"                         => Ok(Self::RiskScore),
            "predicted_delay_minutes" | "delay" | "delay_minutes" => Ok(Self::DelayMinutes),
            "timestamp"                                        => Ok(Self::Timestamp),
            other => Err(format!("unknown sort field {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionPolicy {
    pub order_by:     OrderBy,
    pub cap_total:    Option<usize>,
    pub cap_per_tier: Option<BTreeMap<RiskLevel, usize>>,
    /// Concatenation order in stratified mode.
    pub tier_order:   Vec<RiskLevel>,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            order_by:     OrderBy::RiskScore,
            cap_total:    Some(100),
            cap_per_tier: None,
            tier_order:   RiskLevel::ALL.to_vec(),
        }
    }
}

impl SelectionPolicy {
    /// Tiers to emit in stratified mode: the configured order, then any capped
    /// tier the order forgot. Tiers without a cap are not emitted.
    fn effective_tiers(&self, caps: &BTreeMap<RiskLevel, usize>) -> Vec<RiskLevel> {
        let mut tiers: Vec<RiskLevel> = self.tier_order.iter()
            .copied()
            .filter(|t| caps.contains_key(t))
            .collect();
        for t in caps.keys().rev() {
            if !tiers.contains(t) { tiers.push(*t); }
        }
        tiers
    }
}

fn sort_key_cmp(order_by: OrderBy, a: &RiskRecord, b: &RiskRecord) -> Ordering {
    // Descending, with missing keys after present ones.
    fn desc<T: PartialOrd>(a: Option<T>, b: Option<T>) -> Ordering {
        match (a, b) {
            (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
            (Some(_), None)    => Ordering::Less,
            (None, Some(_))    => Ordering::Greater,
            (None, None)       => Ordering::Equal,
        }
    }
    match order_by {
        OrderBy::RiskScore    => desc(Some(a.risk_score).filter(|v| v.is_finite()),
                                      Some(b.risk_score).filter(|v| v.is_finite())),
        OrderBy::DelayMinutes => desc(a.delay_minutes, b.delay_minutes),
        OrderBy::Timestamp    => desc(a.timestamp.as_deref(), b.timestamp.as_deref()),
    }
}

/// Stable descending sort on the policy field, no truncation.
pub fn rank<T: AsRef<RiskRecord>>(mut items: Vec<T>, order_by: OrderBy) -> Vec<T> {
    items.sort_by(|a, b| sort_key_cmp(order_by, a.as_ref(), b.as_ref()));
    items
}

pub fn select_for_publication<T: AsRef<RiskRecord>>(items: Vec<T>, policy: &SelectionPolicy) -> Vec<T> {
    let ranked = rank(items, policy.order_by);

    let mut selected = match &policy.cap_per_tier {
        None => ranked,
        Some(caps) => {
            let mut buckets: BTreeMap<RiskLevel, Vec<T>> = BTreeMap::new();
            for item in ranked {
                let tier = item.as_ref().risk_level;
                let cap  = caps.get(&tier).copied().unwrap_or(0);
                let b    = buckets.entry(tier).or_default();
                if b.len() < cap { b.push(item); }
            }
            policy.effective_tiers(caps)
                .into_iter()
                .flat_map(|t| buckets.remove(&t).unwrap_or_default())
                .collect()
        }
    };

    if let Some(cap) = policy.cap_total {
        selected.truncate(cap);
    }
    selected
}
