// berthwatch/src/engine/identity.rs
//
// Prediction identity: SHA256("{entity_id}_{time_marker}") truncated to 12
// lowercase hex chars. Used as the row key in the store and as the dedup key.
//
// Same (entity, marker) pair → same identity. A fresh "now" marker on every
// run produces a fresh identity on every run; only a stable execution time
// from the scoring output makes re-publication idempotent.

use std::fmt::Display;

use chrono::Utc;
use sha2::{Digest, Sha256};

/// Hex chars kept from the digest (6 bytes).
pub const IDENTITY_LEN: usize = 12;

/// Format of run markers; matches the scoring job's `execution_time` column.
pub const MARKER_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn compute_identity(entity_id: impl Display, time_marker: &str) -> String {
    let mut h = Sha256::new();
    h.update(format!("{}_{}", entity_id, time_marker).as_bytes());
    hex::encode(&h.finalize()[..IDENTITY_LEN / 2])
}

/// Process-generated marker for records that carry no time of their own.
/// Taken once per publish run so every record in the run shares it.
pub fn run_marker() -> String {
    Utc::now().format(MARKER_FORMAT).to_string()
}
