// berthwatch/src/engine/alerts.rs
//
// Alert state machine. Per vessel: NOT_ALERTING → ALERTING → NOT_ALERTING.
//
// One criticality predicate per deployment — either the categorical tier
// (risk_level == CRITICAL) or a numeric cut (risk_score > threshold), never
// both OR-ed together. Rows the predicate cannot evaluate are skipped:
//
//   Level       — empty vessel id, unknown/blank risk_level
//   ScoreAbove  — empty vessel id, missing / non-numeric / out-of-range score
//
// Skipped rows never enter membership and never abort the tick.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::records::{RiskLevel, StoreRecord};
use crate::state::membership::{AlertMembership, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Criticality {
    Level,
    ScoreAbove { threshold: f64 },
}

impl Default for Criticality {
    fn default() -> Self { Self::Level }
}

impl std::str::FromStr for Criticality {
    type Err = ConfigError;

    /// `level` or `score:<threshold>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("level") { return Ok(Self::Level); }
        let invalid = |reason: &str| ConfigError::Invalid {
            key:    "CRITICALITY",
            value:  s.to_string(),
            reason: reason.to_string(),
        };
        match s.split_once(':') {
            Some((k, v)) if k.trim().eq_ignore_ascii_case("score") => {
                let threshold: f64 = v.trim().parse().map_err(|_| invalid("threshold is not a number"))?;
                if !(0.0..1.0).contains(&threshold) {
                    return Err(invalid("threshold must be in [0, 1)"));
                }
                Ok(Self::ScoreAbove { threshold })
            }
            _ => Err(invalid("expected `level` or `score:<threshold>`")),
        }
    }
}

impl std::fmt::Display for Criticality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Level                   => write!(f, "risk_level == CRITICAL"),
            Self::ScoreAbove { threshold } => write!(f, "risk_score > {threshold}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Critical(String),
    Clear(String),
    Unparseable,
}

impl Criticality {
    pub fn evaluate(&self, rec: &StoreRecord) -> Evaluation {
        let Some(id) = rec.entity_id() else { return Evaluation::Unparseable };
        let critical = match self {
            Self::Level => match rec.risk_level() {
                Some(level) => level == RiskLevel::Critical,
                None        => return Evaluation::Unparseable,
            },
            Self::ScoreAbove { threshold } => match rec.risk_score() {
                Some(score) => score > *threshold,
                None        => return Evaluation::Unparseable,
            },
        };
        if critical { Evaluation::Critical(id.to_string()) } else { Evaluation::Clear(id.to_string()) }
    }
}

/// Result of one evaluation pass over a snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    pub evaluated:  usize,
    pub skipped:    usize,
    pub critical:   usize,
    pub transition: Transition,
}

impl TickOutcome {
    pub fn onsets(&self) -> &[String] { &self.transition.onsets }
}

pub struct AlertStateMachine {
    criticality: Criticality,
    membership:  Arc<AlertMembership>,
}

impl AlertStateMachine {
    pub fn new(criticality: Criticality, membership: Arc<AlertMembership>) -> Self {
        Self { criticality, membership }
    }

    pub fn criticality(&self) -> Criticality { self.criticality }

    pub fn membership(&self) -> &Arc<AlertMembership> { &self.membership }

    /// Evaluate a snapshot and advance membership. A vessel listed several
    /// times is critical if any of its rows is.
    pub fn evaluate(&self, snapshot: &[StoreRecord]) -> TickOutcome {
        let mut current: Vec<String>     = Vec::new();
        let mut in_current: HashSet<String> = HashSet::new();
        let mut evaluated = 0usize;
        let mut skipped   = 0usize;

        for rec in snapshot {
            match self.criticality.evaluate(rec) {
                Evaluation::Critical(id) => {
                    evaluated += 1;
                    if in_current.insert(id.clone()) { current.push(id); }
                }
                Evaluation::Clear(_) => evaluated += 1,
                Evaluation::Unparseable => skipped += 1,
            }
        }

        let transition = self.membership.apply_tick(&current);
        if !transition.resolved.is_empty() {
            debug!(resolved = ?transition.resolved, "vessels left critical state");
        }

        TickOutcome { evaluated, skipped, critical: current.len(), transition }
    }
}
