// berthwatch/src/testing.rs
//
// In-process fakes for the external collaborators, test builds only.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::clients::telegram::Update;
use crate::clients::{rows_to_records, Assistant, MessageFormat, Notifier, RecordStore, UpdateSource};
use crate::error::ClientError;
use crate::records::StoreRecord;

fn injected(service: &'static str) -> ClientError {
    ClientError::Network { service, message: "injected failure".into() }
}

// ── Store ─────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryStore {
    rows:         Mutex<Vec<Vec<String>>>,
    append_calls: AtomicUsize,
    read_calls:   AtomicUsize,
    /// 1-based append call that fails.
    fail_append:  Mutex<Option<usize>>,
    fail_reads:   AtomicBool,
    read_delay:   Mutex<Option<Duration>>,
}

impl MemoryStore {
    pub fn with_rows(rows: Vec<Vec<String>>) -> Self {
        let s = Self::default();
        *s.rows.lock() = rows;
        s
    }

    pub fn fail_append_on_call(&self, n: usize) { *self.fail_append.lock() = Some(n); }

    pub fn set_fail_reads(&self, fail: bool) { self.fail_reads.store(fail, Ordering::SeqCst); }

    pub fn set_read_delay(&self, d: Duration) { *self.read_delay.lock() = Some(d); }

    pub fn rows(&self) -> Vec<Vec<String>> { self.rows.lock().clone() }

    pub fn append_calls(&self) -> usize { self.append_calls.load(Ordering::SeqCst) }

    pub fn read_calls(&self) -> usize { self.read_calls.load(Ordering::SeqCst) }

    /// Data rows only (header excluded).
    pub fn data_len(&self) -> usize { self.rows.lock().len().saturating_sub(1) }

    async fn before_read(&self) -> Result<(), ClientError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.read_delay.lock();
        if let Some(d) = delay { tokio::time::sleep(d).await; }
        if self.fail_reads.load(Ordering::SeqCst) { return Err(injected("store")); }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn read_all_records(&self) -> Result<Vec<StoreRecord>, ClientError> {
        self.before_read().await?;
        Ok(rows_to_records(self.rows()))
    }

    async fn read_header(&self) -> Result<Vec<String>, ClientError> {
        self.before_read().await?;
        Ok(self.rows.lock().first().cloned().unwrap_or_default())
    }

    async fn read_column(&self, index: usize) -> Result<Vec<String>, ClientError> {
        self.before_read().await?;
        Ok(self.rows.lock().iter().map(|r| r.get(index).cloned().unwrap_or_default()).collect())
    }

    async fn append_records(&self, rows: &[Vec<String>]) -> Result<(), ClientError> {
        let call = self.append_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if *self.fail_append.lock() == Some(call) { return Err(injected("store")); }
        self.rows.lock().extend(rows.iter().cloned());
        Ok(())
    }

    async fn clear(&self) -> Result<(), ClientError> {
        self.rows.lock().clear();
        Ok(())
    }

    async fn insert_header_row(&self, columns: &[String]) -> Result<(), ClientError> {
        self.rows.lock().insert(0, columns.to_vec());
        Ok(())
    }
}

// ── Notifier ──────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingNotifier {
    sent:  Mutex<Vec<(String, String)>>,
    fail:  AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        let n = Self::default();
        n.fail.store(true, Ordering::SeqCst);
        n
    }

    pub fn set_failing(&self, fail: bool) { self.fail.store(fail, Ordering::SeqCst); }

    pub fn set_send_delay(&self, d: Duration) { *self.delay.lock() = Some(d); }

    pub fn sent(&self) -> Vec<(String, String)> { self.sent.lock().clone() }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_message(&self, target: &str, text: &str, _format: MessageFormat) -> Result<(), ClientError> {
        let delay = *self.delay.lock();
        if let Some(d) = delay { tokio::time::sleep(d).await; }
        if self.fail.load(Ordering::SeqCst) { return Err(injected("notifier")); }
        self.sent.lock().push((target.to_string(), text.to_string()));
        Ok(())
    }
}

// ── Assistant ─────────────────────────────────────────────────────────────────

pub struct CannedAssistant {
    reply: Option<String>,
    calls: Mutex<Vec<(String, String)>>,
}

impl CannedAssistant {
    pub fn replying(text: &str) -> Self { Self { reply: Some(text.to_string()), calls: Mutex::default() } }

    pub fn failing() -> Self { Self { reply: None, calls: Mutex::default() } }

    /// (snapshot, query) pairs received.
    pub fn calls(&self) -> Vec<(String, String)> { self.calls.lock().clone() }
}

#[async_trait]
impl Assistant for CannedAssistant {
    async fn ask(&self, _system: &str, snapshot: &str, query: &str) -> Result<String, ClientError> {
        self.calls.lock().push((snapshot.to_string(), query.to_string()));
        self.reply.clone().ok_or_else(|| injected("assistant"))
    }
}

// ── Update source ─────────────────────────────────────────────────────────────

/// Hands out scripted batches in order, then idles like an empty long poll.
#[derive(Default)]
pub struct ScriptedUpdates {
    batches: Mutex<VecDeque<Vec<Update>>>,
    offsets: Mutex<Vec<i64>>,
}

impl ScriptedUpdates {
    pub fn new(batches: Vec<Vec<Update>>) -> Self {
        Self { batches: Mutex::new(batches.into()), offsets: Mutex::default() }
    }

    /// Offsets requested so far, one per poll.
    pub fn offsets(&self) -> Vec<i64> { self.offsets.lock().clone() }
}

#[async_trait]
impl UpdateSource for ScriptedUpdates {
    async fn poll_updates(&self, offset: i64, poll_secs: u64) -> Result<Vec<Update>, ClientError> {
        self.offsets.lock().push(offset);
        let next = self.batches.lock().pop_front();
        match next {
            Some(batch) => Ok(batch),
            None => {
                tokio::time::sleep(Duration::from_secs(poll_secs.max(1))).await;
                Ok(Vec::new())
            }
        }
    }
}
