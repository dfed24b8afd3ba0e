// berthwatch/src/pipeline.rs
//
// Publish cycle: scoring output → store.
//
//   1. header check    — empty store gets the schema header; a different
//                        header refuses the run (no misaligned columns)
//   2. ledger          — identity column re-read from the store; unreadable
//                        means dedup state unknown, so nothing is published
//   3. decide          — delay estimate when the column or the ordering needs it
//   4. rank            — stable descending sort on the policy field
//   5. dedup           — drop identities already in the ledger, keep order
//   6. select          — tier caps and the total cap over the new records,
//                        so each run publishes the best records not yet seen
//   7. publish         — chunked append; ledger grows per committed chunk

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clients::{with_timeout, RecordStore};
use crate::config::PublishConfig;
use crate::engine::decision::DelayEstimator;
use crate::engine::dedup::{filter_new, SeenIdentities};
use crate::engine::identity::run_marker;
use crate::engine::publisher::BatchPublisher;
use crate::engine::selector::{rank, select_for_publication, OrderBy};
use crate::error::{ConfigError, PublishError};
use crate::records::{PublishRow, RiskRecord, COL_PREDICTION_ID};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    /// Well-formed records offered to the cycle.
    pub candidates:        usize,
    /// Candidates whose identity was not yet in the store.
    pub new:               usize,
    /// New records kept after the caps.
    pub selected:          usize,
    pub published:         usize,
    pub skipped_malformed: usize,
}

impl std::fmt::Display for PublishReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "candidates={} new={} selected={} published={} malformed={}",
            self.candidates, self.new, self.selected, self.published, self.skipped_malformed
        )
    }
}

pub struct PublishPipeline {
    store:   Arc<dyn RecordStore>,
    cfg:     PublishConfig,
    timeout: Duration,
}

impl PublishPipeline {
    pub fn new(store: Arc<dyn RecordStore>, cfg: PublishConfig, timeout: Duration) -> Self {
        Self { store, cfg, timeout }
    }

    /// Wipe the store and write the schema header.
    pub async fn reset(&self) -> Result<(), PublishError> {
        with_timeout("store", self.timeout, self.store.clear()).await
            .map_err(PublishError::Connectivity)?;
        with_timeout("store", self.timeout, self.store.insert_header_row(&self.cfg.schema.header())).await
            .map_err(PublishError::Connectivity)?;
        warn!("store cleared and header rewritten");
        Ok(())
    }

    pub async fn run(&self, mut records: Vec<RiskRecord>, skipped_malformed: usize) -> Result<PublishReport, PublishError> {
        let mut report = PublishReport { candidates: records.len(), skipped_malformed, ..Default::default() };

        self.ensure_header().await?;
        let mut seen = self.load_ledger().await?;

        let needs_delay = self.cfg.schema.include_delay || self.cfg.selection.order_by == OrderBy::DelayMinutes;
        if needs_delay {
            let mut est = DelayEstimator::new(self.cfg.delay);
            for r in records.iter_mut().filter(|r| r.delay_minutes.is_none()) {
                r.delay_minutes = Some(est.estimate(r.risk_score));
            }
        }

        let marker     = run_marker();
        let ranked     = rank(records, self.cfg.selection.order_by);
        let candidates = filter_new(ranked, &seen, &marker);
        report.new     = candidates.len();

        let selected    = select_for_publication(candidates, &self.cfg.selection);
        report.selected = selected.len();

        let rows: Vec<PublishRow> = selected.iter()
            .map(|c| PublishRow {
                prediction_id: c.prediction_id.clone(),
                cells:         self.cfg.schema.row(&c.prediction_id, &c.time_marker, &c.record),
            })
            .collect();

        if rows.is_empty() {
            info!(%report, "nothing new to publish");
            return Ok(report);
        }

        report.published = BatchPublisher::new(self.store.as_ref(), self.cfg.chunk_size, self.timeout)
            .with_pause(self.cfg.chunk_pause())
            .publish(&rows, &mut seen).await?;

        info!(%report, ledger = seen.len(), "publish cycle complete");
        Ok(report)
    }

    async fn ensure_header(&self) -> Result<(), PublishError> {
        let expected = self.cfg.schema.header();
        let found = with_timeout("store", self.timeout, self.store.read_header()).await
            .map_err(PublishError::Connectivity)?;
        let found: Vec<String> = found.iter().map(|c| c.trim().to_string()).collect();

        if found.iter().all(|c| c.is_empty()) {
            with_timeout("store", self.timeout, self.store.insert_header_row(&expected)).await
                .map_err(PublishError::Connectivity)?;
            info!(columns = expected.len(), "empty store, header written");
            return Ok(());
        }

        // Trailing blank cells are formatting, not columns.
        let significant = found.iter().rposition(|c| !c.is_empty()).map_or(0, |i| i + 1);
        if found[..significant] != expected[..] {
            return Err(ConfigError::SchemaMismatch { expected, found }.into());
        }
        Ok(())
    }

    async fn load_ledger(&self) -> Result<SeenIdentities, PublishError> {
        let index = self.cfg.schema.columns().iter().position(|c| *c == COL_PREDICTION_ID).unwrap_or(0);
        let column = with_timeout("store", self.timeout, self.store.read_column(index)).await
            .map_err(|e| {
                warn!(error = %e, "identity column unreadable, publish aborted");
                PublishError::Connectivity(e)
            })?;
        let seen = SeenIdentities::from_column(column);
        debug!(known = seen.len(), "identity ledger loaded");
        Ok(seen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::identity::compute_identity;
    use crate::error::ClientError;
    use crate::records::{RiskLevel, RowSchema, PENDING_REVIEW};
    use crate::testing::MemoryStore;

    const MARK: &str = "2024-01-01 00:00:00";

    fn pipeline(store: &Arc<MemoryStore>, cfg: PublishConfig) -> PublishPipeline {
        PublishPipeline::new(store.clone(), cfg, Duration::from_secs(5))
    }

    fn global_top_n() -> PublishConfig {
        let mut cfg = PublishConfig::default();
        cfg.selection.cap_per_tier = None;
        cfg
    }

    fn batch() -> Vec<RiskRecord> {
        vec![
            RiskRecord::new("1", 0.42, RiskLevel::Warning).with_timestamp(MARK),
            RiskRecord::new("2", 0.995, RiskLevel::Critical).with_timestamp(MARK),
            RiskRecord::new("3", 0.01, RiskLevel::Normal).with_timestamp(MARK),
        ]
    }

    #[tokio::test]
    async fn first_publish_writes_header_and_rows_by_score() {
        let store = Arc::new(MemoryStore::default());
        let report = pipeline(&store, global_top_n()).run(batch(), 1).await.unwrap();

        assert_eq!(report, PublishReport { candidates: 3, new: 3, selected: 3, published: 3, skipped_malformed: 1 });
        let rows = store.rows();
        assert_eq!(rows[0], RowSchema::default().header());
        assert_eq!(rows[1][2], "2", "highest score first");
        assert_eq!(rows[1][0], compute_identity("2", MARK));
        assert_eq!(rows[1][1], MARK);
        assert!(rows[1..].iter().all(|r| r.last().map(String::as_str) == Some(PENDING_REVIEW)));
    }

    #[tokio::test]
    async fn second_publish_of_same_batch_writes_nothing() {
        let store = Arc::new(MemoryStore::default());
        let p = pipeline(&store, global_top_n());
        p.run(batch(), 0).await.unwrap();
        let calls = store.append_calls();

        let again = p.run(batch(), 0).await.unwrap();
        assert_eq!(again.new, 0);
        assert_eq!(again.published, 0);
        assert_eq!(store.append_calls(), calls);
        assert_eq!(store.data_len(), 3);
    }

    #[tokio::test]
    async fn identical_rows_in_one_batch_publish_once() {
        let store = Arc::new(MemoryStore::default());
        let twin = RiskRecord::new("7", 0.95, RiskLevel::Critical).with_timestamp(MARK);
        let report = pipeline(&store, global_top_n()).run(vec![twin.clone(), twin], 0).await.unwrap();
        assert_eq!(report.new, 1);
        assert_eq!(store.data_len(), 1);
    }

    #[tokio::test]
    async fn later_run_takes_next_best_new_records() {
        let store = Arc::new(MemoryStore::default());
        let mut cfg = global_top_n();
        cfg.selection.cap_total = Some(2);
        let p = pipeline(&store, cfg);

        p.run(batch(), 0).await.unwrap();
        let second = p.run(batch(), 0).await.unwrap();
        assert_eq!(second.published, 1);
        assert_eq!(store.rows()[3][2], "3");
    }

    #[tokio::test]
    async fn stratified_default_caps_apply() {
        let store = Arc::new(MemoryStore::default());
        let mut recs = Vec::new();
        for (level, n, base) in [(RiskLevel::Critical, 10, 0.999), (RiskLevel::Warning, 10, 0.5), (RiskLevel::Normal, 5, 0.01)] {
            for i in 0..n {
                recs.push(RiskRecord::new(format!("{level}-{i}"), base - i as f64 * 0.0001, level).with_timestamp(MARK));
            }
        }
        let report = pipeline(&store, PublishConfig::default()).run(recs, 0).await.unwrap();
        assert_eq!(report.new, 25);
        assert_eq!(report.published, 9);
    }

    #[tokio::test]
    async fn unreadable_ledger_fails_closed() {
        let store = Arc::new(MemoryStore::with_rows(vec![RowSchema::default().header()]));
        store.set_fail_reads(true);
        let err = pipeline(&store, global_top_n()).run(batch(), 0).await.unwrap_err();
        assert!(matches!(err, PublishError::Connectivity(ClientError::Network { .. })));
        assert_eq!(store.append_calls(), 0);
    }

    #[tokio::test]
    async fn foreign_header_is_refused() {
        let store = Arc::new(MemoryStore::with_rows(vec![vec!["id".into(), "vessel".into()]]));
        let err = pipeline(&store, global_top_n()).run(batch(), 0).await.unwrap_err();
        assert!(matches!(err, PublishError::Configuration(ConfigError::SchemaMismatch { .. })));
        assert_eq!(store.append_calls(), 0);
    }

    #[tokio::test]
    async fn delay_column_switch_must_match_existing_header() {
        let store = Arc::new(MemoryStore::with_rows(vec![RowSchema::default().header()]));
        let mut cfg = global_top_n();
        cfg.schema.include_delay = true;
        let err = pipeline(&store, cfg).run(batch(), 0).await.unwrap_err();
        assert!(matches!(err, PublishError::Configuration(_)));
    }

    #[tokio::test]
    async fn delay_column_is_filled_when_enabled() {
        let store = Arc::new(MemoryStore::default());
        let mut cfg = global_top_n();
        cfg.schema.include_delay = true;
        pipeline(&store, cfg).run(batch(), 0).await.unwrap();
        let rows = store.rows();
        assert_eq!(rows[0][5], "predicted_delay_minutes");
        assert_eq!(rows[1][5], "119", "round(0.995 * 120)");
    }

    #[tokio::test]
    async fn partial_failure_keeps_committed_chunks() {
        let store = Arc::new(MemoryStore::default());
        store.fail_append_on_call(2);
        let mut cfg = global_top_n();
        cfg.chunk_size = 2;
        let err = pipeline(&store, cfg).run(batch(), 0).await.unwrap_err();
        assert!(matches!(err, PublishError::Partial { published: 2, attempted: 3, .. }));
        assert_eq!(store.data_len(), 2);
    }

    #[tokio::test]
    async fn reset_clears_and_rewrites_header() {
        let store = Arc::new(MemoryStore::default());
        let p = pipeline(&store, global_top_n());
        p.run(batch(), 0).await.unwrap();
        p.reset().await.unwrap();
        assert_eq!(store.rows(), vec![RowSchema::default().header()]);

        let report = p.run(batch(), 0).await.unwrap();
        assert_eq!(report.published, 3, "ledger is re-read, so cleared rows publish again");
    }
}
