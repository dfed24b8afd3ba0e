// berthwatch/src/records.rs
//
// Shared domain types flowing through Berthwatch.
//
//   RiskRecord   — one scored vessel at one evaluation instant (scoring output)
//   StoreRecord  — one row read back from the store, keyed by header name
//   RowSchema    — the fixed column order written to the store per deployment
//
// Store rows are stringly typed: the store has no schema enforcement, so every
// typed read goes through a tolerant parser that yields None instead of failing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::RecordError;

/// Status written on first publication. Never mutated by Berthwatch afterwards.
pub const PENDING_REVIEW: &str = "Pending Review";

// ── Column names ──────────────────────────────────────────────────────────────

pub const COL_PREDICTION_ID: &str = "prediction_id";
pub const COL_TIMESTAMP:     &str = "timestamp";
pub const COL_VESSEL_ID:     &str = "vessel_id";
pub const COL_RISK_SCORE:    &str = "risk_score";
pub const COL_RISK_LEVEL:    &str = "risk_level";
pub const COL_DELAY_MINUTES: &str = "predicted_delay_minutes";
pub const COL_ACTION:        &str = "recommended_action";
pub const COL_STATUS:        &str = "status";

// ── Risk tier ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Normal,
    Warning,
    Critical,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 3] = [RiskLevel::Critical, RiskLevel::Warning, RiskLevel::Normal];

    /// Case-sensitive, matching the upstream tags exactly. Surrounding
    /// whitespace is tolerated since store cells are hand-editable.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "NORMAL"   => Some(Self::Normal),
            "WARNING"  => Some(Self::Warning),
            "CRITICAL" => Some(Self::Critical),
            _          => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal   => "NORMAL",
            Self::Warning  => "WARNING",
            Self::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| RecordError::InvalidField {
            field: COL_RISK_LEVEL,
            value: s.to_string(),
        })
    }
}

/// Parse a risk score, accepting only finite values in [0, 1].
/// Anything else ("N/A", "", 1.7, NaN) is treated as unparseable.
pub fn parse_score(s: &str) -> Option<f64> {
    let v: f64 = s.trim().parse().ok()?;
    if v.is_finite() && (0.0..=1.0).contains(&v) { Some(v) } else { None }
}

// ── Scoring output record ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRecord {
    pub entity_id:          String,
    /// Execution time of the scoring run or a per-record time. Used as the
    /// identity time marker when present.
    pub timestamp:          Option<String>,
    pub risk_score:         f64,
    pub risk_level:         RiskLevel,
    pub recommended_action: String,
    pub delay_minutes:      Option<i64>,
}

impl RiskRecord {
    #[cfg(test)]
    pub fn new(entity_id: impl Into<String>, risk_score: f64, risk_level: RiskLevel) -> Self {
        Self {
            entity_id: entity_id.into(),
            timestamp: None,
            risk_score,
            risk_level,
            recommended_action: String::new(),
            delay_minutes: None,
        }
    }

    #[cfg(test)]
    pub fn with_timestamp(mut self, ts: impl Into<String>) -> Self {
        self.timestamp = Some(ts.into());
        self
    }

    /// The time marker for identity: the record's own timestamp, or the
    /// run-wide fallback marker when the scoring output carried none.
    pub fn time_marker<'a>(&'a self, fallback: &'a str) -> &'a str {
        match self.timestamp.as_deref() {
            Some(ts) if !ts.trim().is_empty() => ts,
            _ => fallback,
        }
    }
}

impl AsRef<RiskRecord> for RiskRecord {
    fn as_ref(&self) -> &RiskRecord { self }
}

// ── Store rows ────────────────────────────────────────────────────────────────

/// A row read back from the store, keyed by header name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreRecord(pub BTreeMap<String, String>);

impl StoreRecord {
    #[cfg(test)]
    pub fn from_pairs<K: Into<String>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.0.get(column).map(|s| s.as_str())
    }

    pub fn entity_id(&self) -> Option<&str> {
        self.get(COL_VESSEL_ID).map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn risk_level(&self) -> Option<RiskLevel> {
        self.get(COL_RISK_LEVEL).and_then(RiskLevel::parse)
    }

    pub fn risk_score(&self) -> Option<f64> {
        self.get(COL_RISK_SCORE).and_then(parse_score)
    }
}

/// Fixed per-deployment column order for published rows. The delay column
/// sits between `risk_level` and `recommended_action` when enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RowSchema {
    pub include_delay: bool,
}

impl RowSchema {
    pub fn columns(&self) -> Vec<&'static str> {
        let mut cols = vec![COL_PREDICTION_ID, COL_TIMESTAMP, COL_VESSEL_ID, COL_RISK_SCORE, COL_RISK_LEVEL];
        if self.include_delay { cols.push(COL_DELAY_MINUTES); }
        cols.push(COL_ACTION);
        cols.push(COL_STATUS);
        cols
    }

    pub fn header(&self) -> Vec<String> {
        self.columns().into_iter().map(String::from).collect()
    }

    /// Render a record as a row in this schema's column order.
    pub fn row(&self, prediction_id: &str, time_marker: &str, rec: &RiskRecord) -> Vec<String> {
        let mut row = vec![
            prediction_id.to_string(),
            time_marker.to_string(),
            rec.entity_id.clone(),
            format!("{:.4}", rec.risk_score),
            rec.risk_level.to_string(),
        ];
        if self.include_delay {
            row.push(rec.delay_minutes.map(|d| d.to_string()).unwrap_or_default());
        }
        row.push(rec.recommended_action.clone());
        row.push(PENDING_REVIEW.to_string());
        row
    }
}

/// One row ready to append, with its identity kept alongside for the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRow {
    pub prediction_id: String,
    pub cells:         Vec<String>,
}
