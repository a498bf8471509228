//! One ETL run for one source
//!
//! Fetch from the checkpoint cursor, then persist raw payloads, upsert the
//! normalized rows, and advance the checkpoint inside a single transaction.
//! Any error rolls the batch back and leaves the cursor where it was.

use chrono::Duration;
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::IngestError;
use crate::ingestion::Source;
use crate::models::coin::RawRecord;
use crate::models::etl::{RunStatus, RunSummary};
use crate::services::checkpoint;
use crate::services::coin_store;
use crate::services::failure_injector::FailureInjector;
use crate::services::schema_drift::{SchemaDriftDetector, DEFAULT_SAMPLE_SIZE};

const DEFAULT_STALE_RUN_MINUTES: i64 = 120;

pub struct IngestionPipeline {
    db: DatabaseConnection,
    source: Source,
    drift_detector: SchemaDriftDetector,
    failure_injector: Option<Arc<FailureInjector>>,
    drift_sample_size: usize,
    stale_after: Duration,
}

impl IngestionPipeline {
    pub fn new(db: DatabaseConnection, source: Source) -> Self {
        let mut drift_detector = SchemaDriftDetector::new(source.name());
        if let Some(fields) = source.expected_schema() {
            drift_detector.register_schema(source.name(), fields.iter().copied());
        }

        Self {
            db,
            source,
            drift_detector,
            failure_injector: None,
            drift_sample_size: DEFAULT_SAMPLE_SIZE,
            stale_after: Duration::minutes(DEFAULT_STALE_RUN_MINUTES),
        }
    }

    /// The injector is consulted once per batch, at the 1-indexed midpoint
    /// `ceil(len / 2)`; a `fail_at_index` fires only when it equals that record.
    pub fn with_failure_injector(mut self, injector: Option<Arc<FailureInjector>>) -> Self {
        self.failure_injector = injector;
        self
    }

    pub fn with_drift_sample_size(mut self, sample_size: usize) -> Self {
        self.drift_sample_size = sample_size;
        self
    }

    /// Age after which a `started` run no longer blocks new runs.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    pub async fn run(&self) -> Result<RunSummary, IngestError> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("etl_run", run_id = %run_id, source = self.source.name());

        self.run_guarded(run_id).instrument(span).await
    }

    async fn run_guarded(&self, run_id: String) -> Result<RunSummary, IngestError> {
        let source = self.source.name();

        if let Some(active) = checkpoint::find_active_run(&self.db, source, self.stale_after).await? {
            warn!(active_run_id = %active.run_id, "Another run is still in progress, skipping");
            return Err(IngestError::RunInProgress {
                source_name: source.to_string(),
                run_id: active.run_id,
            });
        }

        checkpoint::create_run(&self.db, &run_id, source).await?;
        info!("Starting ETL run");

        match self.execute(&run_id).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                self.record_failure(&run_id, &e).await;
                Err(e)
            }
        }
    }

    async fn execute(&self, run_id: &str) -> Result<RunSummary, IngestError> {
        let source = self.source.name();
        let cursor = checkpoint::get_cursor(&self.db, source).await?;

        let raw = self.source.fetch(cursor.as_deref()).await?;
        info!(fetched = raw.len(), cursor = ?cursor, "Fetched records");

        if raw.is_empty() {
            checkpoint::finalize_run(&self.db, run_id, RunStatus::Success, 0, 0, None).await?;
            info!("No new records to process");
            return Ok(RunSummary {
                run_id: run_id.to_string(),
                source: source.to_string(),
                records_fetched: 0,
                records_processed: 0,
                records_failed: 0,
                cursor,
            });
        }

        let next_cursor = self.source.checkpoint_value(cursor.as_deref(), &raw)?;

        let txn = self.db.begin().await?;
        let (processed, failed) = match self
            .load_batch(&txn, run_id, &raw, next_cursor.as_deref())
            .await
        {
            Ok(counts) => {
                txn.commit().await?;
                counts
            }
            Err(e) => {
                if let Err(rollback_err) = txn.rollback().await {
                    error!(error = %rollback_err, "Failed to roll back batch");
                }
                return Err(e);
            }
        };

        checkpoint::finalize_run(&self.db, run_id, RunStatus::Success, processed, failed, None)
            .await?;

        info!(
            fetched = raw.len(),
            processed = processed,
            failed = failed,
            cursor = ?next_cursor,
            "ETL run completed"
        );

        Ok(RunSummary {
            run_id: run_id.to_string(),
            source: source.to_string(),
            records_fetched: raw.len(),
            records_processed: processed,
            records_failed: failed,
            cursor: next_cursor,
        })
    }

    /// Everything that must commit or roll back together.
    async fn load_batch(
        &self,
        txn: &DatabaseTransaction,
        run_id: &str,
        raw: &[RawRecord],
        next_cursor: Option<&str>,
    ) -> Result<(usize, usize), IngestError> {
        let source = self.source.name();

        if self.drift_detector.is_registered(source) {
            let summary = self
                .drift_detector
                .analyze_batch(
                    txn,
                    source,
                    raw.iter().map(|record| &record.payload),
                    Some(run_id),
                    self.drift_sample_size,
                )
                .await;
            if summary.drift_detected {
                warn!(
                    drift_ratio = summary.drift_ratio,
                    average_confidence = summary.average_confidence,
                    "Schema drift detected in batch"
                );
            }
        }

        coin_store::save_raw_records(txn, raw).await?;

        if let Some(injector) = &self.failure_injector {
            injector.check(Some(raw.len().div_ceil(2)), "injected failure during batch load")?;
        }

        let mut normalized = Vec::with_capacity(raw.len());
        let mut failed = 0;
        for record in raw {
            match self.source.normalize(record) {
                Some(coin) => normalized.push(coin),
                None => {
                    failed += 1;
                    warn!(external_id = %record.external_id, "Skipping record that failed normalization");
                }
            }
        }

        coin_store::upsert_coins(txn, &normalized).await?;
        checkpoint::mark_success(txn, source, next_cursor, normalized.len() as u64).await?;

        Ok((normalized.len(), failed))
    }

    async fn record_failure(&self, run_id: &str, err: &IngestError) {
        let source = self.source.name();
        let message = err.to_string();

        if let Err(e) = checkpoint::mark_failed(&self.db, source, &message).await {
            error!(error = %e, "Failed to mark checkpoint as failed");
        }
        if let Err(e) =
            checkpoint::finalize_run(&self.db, run_id, RunStatus::Failed, 0, 0, Some(&message)).await
        {
            error!(error = %e, "Failed to finalize failed run record");
        }

        error!(error = %message, "ETL run failed");
    }
}
