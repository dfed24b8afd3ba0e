// berthwatch/src/ingest.rs
//
// Scoring output loader.
//
// Reads the model's CSV output into RiskRecords. Header names are trimmed and
// lowercased before matching. Recognised columns:
//
//   vessel_id            required
//   risk_score           required, finite, within [0, 1]
//   risk_level           optional — derived from the score when absent/blank
//   recommended_action   optional — filled from the decision map when blank
//   execution_time | timestamp_prediction | timestamp   optional time marker
//
// A malformed row is reported and skipped; the rest of the file still loads.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::engine::decision::{default_action, TierCuts};
use crate::error::RecordError;
use crate::records::{parse_score, RiskLevel, RiskRecord, COL_ACTION, COL_RISK_LEVEL, COL_RISK_SCORE, COL_VESSEL_ID};

const TIME_COLUMNS: [&str; 3] = ["execution_time", "timestamp_prediction", "timestamp"];

#[derive(Debug, Default)]
pub struct Loaded {
    pub records:   Vec<RiskRecord>,
    pub malformed: Vec<RecordError>,
}

pub async fn load_path(path: &Path, cuts: &TierCuts) -> Result<Loaded> {
    let bytes = tokio::fs::read(path).await
        .with_context(|| format!("reading scoring output {}", path.display()))?;
    let loaded = load_reader(bytes.as_slice(), cuts)
        .with_context(|| format!("parsing scoring output {}", path.display()))?;
    info!(path = %path.display(), records = loaded.records.len(), malformed = loaded.malformed.len(), "scoring output loaded");
    Ok(loaded)
}

pub fn load_reader<R: Read>(rdr: R, cuts: &TierCuts) -> Result<Loaded, csv::Error> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(rdr);

    let cols: HashMap<String, usize> = rdr.headers()?
        .iter()
        .enumerate()
        .map(|(i, h)| (h.trim().to_lowercase(), i))
        .collect();

    let mut out = Loaded::default();
    for (i, rec) in rdr.records().enumerate() {
        let row = i + 2; // 1-based, after the header
        let rec = match rec {
            Ok(r) => r,
            Err(e) => {
                warn!(row, error = %e, "unreadable scoring row skipped");
                out.malformed.push(RecordError::InvalidField { field: "row", value: e.to_string() });
                continue;
            }
        };
        let get = |name: &str| cols.get(name).and_then(|&idx| rec.get(idx)).filter(|v| !v.is_empty());

        match parse_row(&get, cuts) {
            Ok(r) => out.records.push(r),
            Err(e) => {
                let e = RecordError::AtRow { row, source: Box::new(e) };
                warn!(error = %e, "malformed scoring row skipped");
                out.malformed.push(e);
            }
        }
    }
    Ok(out)
}

fn parse_row<'r>(get: &dyn Fn(&str) -> Option<&'r str>, cuts: &TierCuts) -> Result<RiskRecord, RecordError> {
    let entity_id = get(COL_VESSEL_ID)
        .ok_or(RecordError::MissingField { field: COL_VESSEL_ID })?
        .to_string();

    let raw_score = get(COL_RISK_SCORE)
        .ok_or(RecordError::MissingField { field: COL_RISK_SCORE })?;
    let risk_score = parse_score(raw_score)
        .ok_or_else(|| RecordError::InvalidField { field: COL_RISK_SCORE, value: raw_score.to_string() })?;

    let risk_level = match get(COL_RISK_LEVEL) {
        Some(raw) => raw.parse::<RiskLevel>()?,
        None      => cuts.classify(risk_score),
    };

    let recommended_action = get(COL_ACTION)
        .map(String::from)
        .unwrap_or_else(|| default_action(risk_level).to_string());

    let timestamp = TIME_COLUMNS.iter().find_map(|c| get(c)).map(String::from);

    Ok(RiskRecord { entity_id, timestamp, risk_score, risk_level, recommended_action, delay_minutes: None })
}
