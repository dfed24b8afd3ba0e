// berthwatch/src/error.rs
//
// Error taxonomy.
//
//   ClientError   — store / notifier / assistant call failed or timed out (recoverable)
//   RecordError   — one input record is malformed (recoverable, per record)
//   PublishError  — a publish cycle failed; Partial carries the rows written
//   ConfigError   — required configuration missing or invalid (fatal for the
//                   component that needs it, never for the whole process)

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{service} request failed: {message}")]
    Network { service: &'static str, message: String },

    #[error("{service} returned HTTP {status}: {body}")]
    Status { service: &'static str, status: u16, body: String },

    #[error("{service} response could not be parsed: {message}")]
    Parse { service: &'static str, message: String },

    #[error("{service} call timed out after {after:?}")]
    Timeout { service: &'static str, after: Duration },

    #[error("local store I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("local store CSV: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("missing required field `{field}`")]
    MissingField { field: &'static str },

    #[error("invalid `{field}` value {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("row {row}: {source}")]
    AtRow {
        row: usize,
        #[source]
        source: Box<RecordError>,
    },
}

#[derive(Debug, Error)]
pub enum PublishError {
    /// The dedup ledger or the store header could not be read. Nothing was
    /// written; dedup state is unknown so the cycle fails closed.
    #[error("store unreachable, dedup state unknown: {0}")]
    Connectivity(#[source] ClientError),

    /// A chunk append failed. Rows written before it stay committed.
    #[error("partial publish: {published} of {attempted} rows written before failure: {source}")]
    Partial {
        published: usize,
        attempted: usize,
        #[source]
        source:    ClientError,
    },

    #[error("configuration: {0}")]
    Configuration(#[from] ConfigError),
}

impl PublishError {
    /// Rows that were committed to the store before the error.
    pub fn published(&self) -> usize {
        match self {
            Self::Partial { published, .. } => *published,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid { key: &'static str, value: String, reason: String },

    #[error("store header {found:?} does not match configured schema {expected:?}")]
    SchemaMismatch { expected: Vec<String>, found: Vec<String> },
}
