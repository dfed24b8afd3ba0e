// berthwatch/src/monitor.rs
//
// Periodic alert monitor.
//
// Every `interval` (after `initial_delay`) one tick:
//   fetch snapshot → evaluate predicate → advance membership → send onsets
//
// Ticks run back to back on a single task, so they never overlap; a tick that
// overruns the period delays the next one instead of stacking it. A failed
// snapshot fetch skips the tick with membership untouched. A failed send is
// logged and not retried; membership has already moved on.
//
// One loop per process, enforced by `RunGuard`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::clients::{with_timeout, Notifier, RecordStore};
use crate::config::MonitorConfig;
use crate::engine::alerts::{AlertStateMachine, TickOutcome};
use crate::engine::dispatcher::AlertDispatcher;
use crate::state::membership::AlertMembership;

#[derive(Debug, Error)]
#[error("a monitor loop is already running in this process")]
pub struct AlreadyRunning;

static RUNNING: AtomicBool = AtomicBool::new(false);

struct RunGuard;

impl RunGuard {
    fn acquire() -> Result<Self, AlreadyRunning> {
        RUNNING.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| RunGuard)
            .map_err(|_| AlreadyRunning)
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) { RUNNING.store(false, Ordering::Release); }
}

pub struct Monitor {
    store:         Arc<dyn RecordStore>,
    machine:       AlertStateMachine,
    dispatcher:    AlertDispatcher,
    timeout:       Duration,
    interval:      Duration,
    initial_delay: Duration,
}

impl Monitor {
    pub fn new(
        store:      Arc<dyn RecordStore>,
        notifier:   Arc<dyn Notifier>,
        chat_id:    &str,
        cfg:        &MonitorConfig,
        timeout:    Duration,
    ) -> Self {
        Self {
            store,
            machine:       AlertStateMachine::new(cfg.criticality, Arc::new(AlertMembership::new())),
            dispatcher:    AlertDispatcher::new(notifier, chat_id, cfg.consolidate_above, timeout),
            timeout,
            interval:      cfg.interval(),
            initial_delay: cfg.initial_delay(),
        }
    }

    pub fn membership(&self) -> &Arc<AlertMembership> { self.machine.membership() }

    /// One evaluation pass. None when the snapshot could not be fetched.
    pub async fn tick(&self) -> Option<TickOutcome> {
        let snapshot = match with_timeout("store", self.timeout, self.store.read_all_records()).await {
            Ok(s)  => s,
            Err(e) => {
                warn!(error = %e, "snapshot fetch failed, tick skipped");
                return None;
            }
        };

        let outcome = self.machine.evaluate(&snapshot);
        if outcome.skipped > 0 {
            debug!(skipped = outcome.skipped, "unparseable rows ignored");
        }

        if !outcome.onsets().is_empty() {
            if let Err(e) = self.dispatcher.dispatch(outcome.onsets()).await {
                error!(error = %e, onsets = outcome.onsets().len(), "alert delivery failed, not retried");
            }
        }

        debug!(
            rows     = snapshot.len(),
            critical = outcome.critical,
            onsets   = outcome.onsets().len(),
            resolved = outcome.transition.resolved.len(),
            members  = self.membership().len(),
            "monitor tick",
        );
        Some(outcome)
    }

    /// Run until `shutdown` flips to true (or its sender is dropped).
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), AlreadyRunning> {
        let _guard = RunGuard::acquire()?;
        self.schedule(shutdown).await;
        Ok(())
    }

    async fn schedule(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.initial_delay, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval    = ?self.interval,
            first_tick  = ?self.initial_delay,
            criticality = %self.machine.criticality(),
            "alert monitor started",
        );

        loop {
            tokio::select! {
                biased;
                _ = stop_requested(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                biased;
                _ = stop_requested(&mut shutdown) => break,
                _ = self.tick() => {}
            }
        }

        info!(members = self.membership().len(), "alert monitor stopped");
    }
}

async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::alerts::Criticality;
    use crate::records::RowSchema;
    use crate::testing::{MemoryStore, RecordingNotifier};

    fn sheet(rows: &[(&str, &str, &str)]) -> Vec<Vec<String>> {
        let mut out = vec![RowSchema::default().header()];
        for (i, (id, score, level)) in rows.iter().enumerate() {
            let rec = vec![format!("p{i}"), "t".into(), id.to_string(), score.to_string(), level.to_string(), "a".into(), "Pending Review".into()];
            out.push(rec);
        }
        out
    }

    fn monitor(store: &Arc<MemoryStore>, notifier: &Arc<RecordingNotifier>, criticality: Criticality) -> Monitor {
        let cfg = MonitorConfig { criticality, ..Default::default() };
        Monitor::new(store.clone(), notifier.clone(), "-100", &cfg, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn tick_alerts_new_critical_vessels_once() {
        let store = Arc::new(MemoryStore::with_rows(sheet(&[("V1", "0.995", "CRITICAL"), ("V2", "0.3", "WARNING")])));
        let notifier = Arc::new(RecordingNotifier::default());
        let m = monitor(&store, &notifier, Criticality::Level);

        assert_eq!(m.tick().await.unwrap().onsets(), ["V1".to_string()]);
        assert!(m.tick().await.unwrap().onsets().is_empty());

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "-100");
        assert!(sent[0].1.contains("V1"));
    }

    #[tokio::test]
    async fn fetch_failure_skips_tick_and_keeps_membership() {
        let store = Arc::new(MemoryStore::with_rows(sheet(&[("V1", "0.995", "CRITICAL")])));
        let notifier = Arc::new(RecordingNotifier::default());
        let m = monitor(&store, &notifier, Criticality::Level);

        m.tick().await.unwrap();
        store.set_fail_reads(true);
        assert!(m.tick().await.is_none());
        assert!(m.membership().contains("V1"));

        store.set_fail_reads(false);
        assert!(m.tick().await.unwrap().onsets().is_empty(), "no re-alert after a skipped tick");
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn send_failure_does_not_roll_back_membership() {
        let store = Arc::new(MemoryStore::with_rows(sheet(&[("V1", "0.995", "CRITICAL")])));
        let notifier = Arc::new(RecordingNotifier::failing());
        let m = monitor(&store, &notifier, Criticality::Level);

        let out = m.tick().await.unwrap();
        assert_eq!(out.onsets().len(), 1);
        assert!(m.membership().contains("V1"));

        notifier.set_failing(false);
        m.tick().await.unwrap();
        assert!(notifier.sent().is_empty(), "missed alert is not retried");
    }

    #[tokio::test]
    async fn malformed_score_does_not_abort_tick() {
        let store = Arc::new(MemoryStore::with_rows(sheet(&[("V1", "N/A", "CRITICAL"), ("V2", "0.97", "CRITICAL")])));
        let notifier = Arc::new(RecordingNotifier::default());
        let m = monitor(&store, &notifier, Criticality::ScoreAbove { threshold: 0.9 });

        let out = m.tick().await.unwrap();
        assert_eq!(out.skipped, 1);
        assert_eq!(out.onsets(), ["V2".to_string()]);
    }

    #[tokio::test]
    async fn many_onsets_send_one_consolidated_message() {
        let rows: Vec<(String, &str, &str)> = (1..=5).map(|i| (format!("V{i}"), "0.999", "CRITICAL")).collect();
        let rows: Vec<(&str, &str, &str)> = rows.iter().map(|(a, b, c)| (a.as_str(), *b, *c)).collect();
        let store = Arc::new(MemoryStore::with_rows(sheet(&rows)));
        let notifier = Arc::new(RecordingNotifier::default());
        monitor(&store, &notifier, Criticality::Level).tick().await.unwrap();

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("*5 new vessels*"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_ticks_run_back_to_back_without_overlap() {
        let store = Arc::new(MemoryStore::with_rows(sheet(&[("V1", "0.995", "CRITICAL")])));
        store.set_read_delay(Duration::from_secs(25));
        let notifier = Arc::new(RecordingNotifier::default());
        let cfg = MonitorConfig { interval_secs: 10, initial_delay_secs: 0, ..Default::default() };
        let m = Monitor::new(store.clone(), notifier.clone(), "-100", &cfg, Duration::from_secs(30));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { m.schedule(rx).await });

        // Each 25s read overruns the 10s period; the next tick starts when it ends.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.read_calls(), 2);

        // Reads start at 0, 25, 50, 75, 100.
        tokio::time::sleep(Duration::from_secs(71)).await;
        assert_eq!(store.read_calls(), 5);

        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(notifier.sent().len(), 1);
    }

    // The only test that calls run(): the single-instance guard is process-wide.
    #[tokio::test(start_paused = true)]
    async fn run_loop_schedule_single_instance_and_shutdown() {
        let store = Arc::new(MemoryStore::with_rows(sheet(&[("V1", "0.995", "CRITICAL")])));
        let notifier = Arc::new(RecordingNotifier::default());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(monitor(&store, &notifier, Criticality::Level).run(rx.clone()));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.read_calls(), 0, "first tick waits for the initial delay");

        let second = monitor(&store, &notifier, Criticality::Level).run(rx).await;
        assert!(matches!(second, Err(AlreadyRunning)));

        // Ticks at 10s, 70s, 130s.
        tokio::time::sleep(Duration::from_secs(130)).await;
        assert_eq!(store.read_calls(), 3);
        assert_eq!(notifier.sent().len(), 1);

        tx.send(true).unwrap();
        assert!(handle.await.unwrap().is_ok());
    }
}
