// berthwatch/src/clients/mod.rs
//
// External collaborators, seen only through these traits:
//
//   RecordStore — the shared spreadsheet (Google Sheets, or a local CSV mirror)
//   Notifier    — the alert channel (Telegram)
//   Assistant   — the conversational model (Gemini)
//   UpdateSource — incoming operator messages (Telegram long poll)
//
// Store, notifier and assistant calls are wrapped in `with_timeout`, so a hung
// endpoint turns into a recoverable ClientError::Timeout rather than a stuck
// tick. The long poll is the exception: it is bounded by the HTTP client
// timeout, which is set to outlast the poll window.

pub mod file_store;
pub mod gemini;
pub mod sheets;
pub mod telegram;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ClientError;
use crate::records::StoreRecord;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All data rows keyed by the header row. Empty store → empty vec.
    async fn read_all_records(&self) -> Result<Vec<StoreRecord>, ClientError>;

    /// The first row. Empty store → empty vec.
    async fn read_header(&self) -> Result<Vec<String>, ClientError>;

    /// Every cell of one column (0-based), header cell included.
    async fn read_column(&self, index: usize) -> Result<Vec<String>, ClientError>;

    async fn append_records(&self, rows: &[Vec<String>]) -> Result<(), ClientError>;

    async fn clear(&self) -> Result<(), ClientError>;

    /// Insert `columns` as a new first row, shifting existing rows down.
    async fn insert_header_row(&self, columns: &[String]) -> Result<(), ClientError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageFormat {
    Plain,
    #[default]
    Markdown,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_message(&self, target: &str, text: &str, format: MessageFormat) -> Result<(), ClientError>;
}

#[async_trait]
pub trait Assistant: Send + Sync {
    async fn ask(&self, system_instruction: &str, snapshot: &str, query: &str) -> Result<String, ClientError>;
}

#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Updates with id >= `offset`, waiting up to `poll_secs` for one to arrive.
    async fn poll_updates(&self, offset: i64, poll_secs: u64) -> Result<Vec<telegram::Update>, ClientError>;
}

/// Bound an external call. Elapsed → ClientError::Timeout.
pub async fn with_timeout<T, F>(service: &'static str, after: Duration, fut: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(res) => res,
        Err(_)  => Err(ClientError::Timeout { service, after }),
    }
}

/// Shared reqwest client with a hard per-request timeout.
pub(crate) fn http_client(service: &'static str, timeout: Duration) -> Result<reqwest::Client, ClientError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("berthwatch/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ClientError::Network { service, message: e.to_string() })
}

/// Map a non-2xx response to ClientError::Status, keeping a bounded body excerpt.
pub(crate) async fn check_status(service: &'static str, resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status.is_success() { return Ok(resp); }
    let mut body = resp.text().await.unwrap_or_default();
    body.truncate(512);
    Err(ClientError::Status { service, status: status.as_u16(), body })
}

pub(crate) fn network(service: &'static str) -> impl Fn(reqwest::Error) -> ClientError {
    move |e| ClientError::Network { service, message: e.to_string() }
}

pub(crate) fn parse(service: &'static str) -> impl Fn(reqwest::Error) -> ClientError {
    move |e| ClientError::Parse { service, message: e.to_string() }
}

/// Turn a header row + data rows into keyed records, padding short rows.
pub(crate) fn rows_to_records(mut rows: Vec<Vec<String>>) -> Vec<StoreRecord> {
    if rows.is_empty() { return Vec::new(); }
    let header: Vec<String> = rows.remove(0).into_iter().map(|h| h.trim().to_string()).collect();
    rows.into_iter()
        .filter(|r| r.iter().any(|c| !c.trim().is_empty()))
        .map(|r| {
            StoreRecord(header.iter().enumerate()
                .filter(|(_, h)| !h.is_empty())
                .map(|(i, h)| (h.clone(), r.get(i).cloned().unwrap_or_default()))
                .collect())
        })
        .collect()
}
