// berthwatch/src/chat.rs
//
// Conversational handler: operator question → live snapshot → assistant reply.
//
// The snapshot is always fetched fresh from the store, rendered as one JSON
// object per row, and capped to the most recent `max_rows` rows. Any failure
// on the way (store, assistant, timeout) degrades to a fixed apology; the
// operator never sees an error string. A request ID already answered gets no
// second reply.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::clients::{with_timeout, Assistant, MessageFormat, Notifier, RecordStore, UpdateSource};
use crate::error::ClientError;
use crate::records::StoreRecord;
use crate::state::requests::RecentRequests;

pub const APOLOGY: &str = "Sorry, I couldn't reach the port data right now. Please try again in a moment.";

pub const SYSTEM_INSTRUCTION: &str = "\
You are Berthwatch, the harbor operations assistant for a port authority. \
You answer questions about vessel delay risk using only the port dataset supplied with each question. \
Each dataset line is one published prediction with its vessel_id, risk_score (0 to 1), risk_level \
(NORMAL, WARNING or CRITICAL), recommended_action and review status. \
Be brief and operational, name vessels by ID, and say plainly when the dataset does not contain the answer.";

const RETRY_PAUSE: Duration = Duration::from_secs(5);

pub struct ChatHandler {
    store:     Arc<dyn RecordStore>,
    assistant: Arc<dyn Assistant>,
    recent:    RecentRequests,
    timeout:   Duration,
    max_rows:  usize,
}

impl ChatHandler {
    pub fn new(store: Arc<dyn RecordStore>, assistant: Arc<dyn Assistant>, timeout: Duration, max_rows: usize) -> Self {
        Self { store, assistant, recent: RecentRequests::default(), timeout, max_rows: max_rows.max(1) }
    }

    pub fn timeout(&self) -> Duration { self.timeout }

    /// Reply text for one request, or None for a duplicate / empty request.
    pub async fn handle(&self, request_id: &str, text: &str) -> Option<String> {
        let query = text.trim();
        if query.is_empty() { return None; }
        if !self.recent.first_seen(request_id) {
            debug!(request_id, "duplicate request ignored");
            return None;
        }

        match self.answer(query).await {
            Ok(reply) => Some(reply),
            Err(e) => {
                warn!(request_id, error = %e, "chat request degraded to apology");
                Some(APOLOGY.to_string())
            }
        }
    }

    async fn answer(&self, query: &str) -> Result<String, ClientError> {
        let records = with_timeout("store", self.timeout, self.store.read_all_records()).await?;
        let snapshot = render_snapshot(&records, self.max_rows);
        with_timeout("assistant", self.timeout,
            self.assistant.ask(SYSTEM_INSTRUCTION, &snapshot, query)).await
    }
}

/// Compact JSON-lines rendering of the latest `max_rows` rows.
pub fn render_snapshot(records: &[StoreRecord], max_rows: usize) -> String {
    if records.is_empty() { return "(no predictions published yet)".to_string(); }

    let skip = records.len().saturating_sub(max_rows);
    let mut out = String::new();
    if skip > 0 {
        out.push_str(&format!("(latest {} of {} rows)\n", records.len() - skip, records.len()));
    }
    for rec in &records[skip..] {
        match serde_json::to_string(&rec.0) {
            Ok(line) => { out.push_str(&line); out.push('\n'); }
            Err(e)   => debug!(error = %e, "snapshot row not serialisable, skipped"),
        }
    }
    out
}

// ── Long-poll serve loop ──────────────────────────────────────────────────────

/// Poll for operator messages until `shutdown`; each message is answered on
/// its own task so a slow assistant call never stalls polling.
pub async fn serve(
    handler:      Arc<ChatHandler>,
    source:       Arc<dyn UpdateSource>,
    replies:      Arc<dyn Notifier>,
    poll_secs:    u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut offset = 0i64;
    info!(poll_secs, "chat handler listening");

    loop {
        let polled = tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => break,
            r = source.poll_updates(offset, poll_secs) => r,
        };

        let updates = match polled {
            Ok(u) => u,
            Err(e) => {
                warn!(error = %e, "update poll failed, retrying");
                tokio::select! {
                    biased;
                    _ = shutdown.wait_for(|stop| *stop) => break,
                    _ = tokio::time::sleep(RETRY_PAUSE) => continue,
                }
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            let Some(msg)  = update.message else { continue };
            let Some(text) = msg.text else { continue };

            let handler = Arc::clone(&handler);
            let replies = Arc::clone(&replies);
            let chat_id = msg.chat.id.to_string();
            let req_id  = update.update_id.to_string();
            tokio::spawn(async move {
                let Some(reply) = handler.handle(&req_id, &text).await else { return };
                let send = replies.send_message(&chat_id, &reply, MessageFormat::Plain);
                if let Err(e) = with_timeout("notifier", handler.timeout(), send).await {
                    warn!(chat_id, error = %e, "chat reply not delivered");
                }
            });
        }
    }

    info!("chat handler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::telegram::{Chat, Message, Update};
    use crate::records::RowSchema;
    use crate::testing::{CannedAssistant, MemoryStore, RecordingNotifier, ScriptedUpdates};

    fn store_with(n: usize) -> Arc<MemoryStore> {
        let mut rows = vec![RowSchema::default().header()];
        for i in 0..n {
            rows.push(vec![format!("p{i}"), "t".into(), format!("V{i}"), "0.5".into(), "WARNING".into(), "a".into(), "Pending Review".into()]);
        }
        Arc::new(MemoryStore::with_rows(rows))
    }

    fn handler(store: &Arc<MemoryStore>, assistant: &Arc<CannedAssistant>, max_rows: usize) -> ChatHandler {
        ChatHandler::new(store.clone(), assistant.clone(), Duration::from_secs(5), max_rows)
    }

    #[tokio::test]
    async fn answers_with_fresh_snapshot() {
        let store = store_with(2);
        let assistant = Arc::new(CannedAssistant::replying("V0 and V1 are at WARNING."));
        let h = handler(&store, &assistant, 50);

        let reply = h.handle("1", "  which vessels need attention?  ").await;
        assert_eq!(reply.as_deref(), Some("V0 and V1 are at WARNING."));

        let calls = assistant.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "which vessels need attention?");
        assert_eq!(calls[0].0.lines().count(), 2);
        assert!(calls[0].0.contains(r#""vessel_id":"V1""#));
    }

    #[tokio::test]
    async fn duplicate_request_gets_no_second_reply() {
        let store = store_with(1);
        let assistant = Arc::new(CannedAssistant::replying("ok"));
        let h = handler(&store, &assistant, 50);

        assert!(h.handle("42", "status?").await.is_some());
        assert!(h.handle("42", "status?").await.is_none());
        assert_eq!(assistant.calls().len(), 1);
    }

    #[tokio::test]
    async fn store_failure_degrades_to_apology() {
        let store = store_with(1);
        store.set_fail_reads(true);
        let assistant = Arc::new(CannedAssistant::replying("unused"));
        let reply = handler(&store, &assistant, 50).handle("1", "status?").await;
        assert_eq!(reply.as_deref(), Some(APOLOGY));
        assert!(assistant.calls().is_empty());
    }

    #[tokio::test]
    async fn assistant_failure_degrades_to_apology() {
        let store = store_with(1);
        let assistant = Arc::new(CannedAssistant::failing());
        let reply = handler(&store, &assistant, 50).handle("1", "status?").await;
        assert_eq!(reply.as_deref(), Some(APOLOGY));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_times_out_to_apology() {
        let store = store_with(1);
        store.set_read_delay(Duration::from_secs(60));
        let assistant = Arc::new(CannedAssistant::replying("unused"));
        let reply = handler(&store, &assistant, 50).handle("1", "status?").await;
        assert_eq!(reply.as_deref(), Some(APOLOGY));
    }

    #[test]
    fn snapshot_keeps_latest_rows() {
        let recs: Vec<StoreRecord> = (0..5)
            .map(|i| StoreRecord::from_pairs([("vessel_id", format!("V{i}"))]))
            .collect();
        let snap = render_snapshot(&recs, 2);
        let lines: Vec<&str> = snap.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "(latest 2 of 5 rows)");
        assert_eq!(lines[2], r#"{"vessel_id":"V4"}"#);
        assert!(render_snapshot(&[], 10).contains("no predictions"));
    }

    fn text_update(id: i64, chat: i64, text: &str) -> Update {
        Update {
            update_id: id,
            message:   Some(Message { message_id: id, chat: Chat { id: chat }, text: Some(text.into()) }),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn serve_replies_once_per_update_and_advances_offset() {
        let store = store_with(1);
        let assistant = Arc::new(CannedAssistant::replying("all clear"));
        let h = Arc::new(handler(&store, &assistant, 50));
        let source = Arc::new(ScriptedUpdates::new(vec![
            vec![text_update(10, 555, "status?"), Update { update_id: 11, message: None }],
            vec![text_update(10, 555, "status?")],
        ]));
        let notifier = Arc::new(RecordingNotifier::default());
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(serve(h, source.clone(), notifier.clone(), 25, rx));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(notifier.sent(), vec![("555".to_string(), "all clear".to_string())]);
        assert_eq!(&source.offsets()[..3], &[0, 12, 12]);

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn hung_reply_send_is_abandoned_after_timeout() {
        let store = store_with(1);
        let assistant = Arc::new(CannedAssistant::replying("all clear"));
        let h = Arc::new(handler(&store, &assistant, 50));
        let source = Arc::new(ScriptedUpdates::new(vec![vec![text_update(10, 555, "status?")]]));
        let notifier = Arc::new(RecordingNotifier::default());
        notifier.set_send_delay(Duration::from_secs(60));
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(serve(h, source, notifier.clone(), 25, rx));
        tokio::time::sleep(Duration::from_secs(120)).await;

        // The send would have landed at 60s; the 5s call timeout dropped it.
        assert!(notifier.sent().is_empty());
        assert_eq!(assistant.calls().len(), 1);

        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
