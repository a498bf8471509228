//! Checkpoint and run-record bookkeeping
//!
//! Checkpoints say where each source resumes; run records are the audit
//! trail of every attempt. Only the pipeline writes either table.

use chrono::{Duration, NaiveDateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, Set,
};

use crate::entities::{
    etl_checkpoints,
    etl_runs,
    prelude::{EtlCheckpoints, EtlRuns},
};
use crate::models::etl::{CheckpointStatus, RunStatus};

/// Message stored on runs reclassified by [`reconcile_stale_runs`]
pub const ABANDONED_RUN_MESSAGE: &str =
    "abandoned: run exceeded the staleness timeout without completing";

pub async fn get_checkpoint<C>(
    conn: &C,
    source: &str,
) -> Result<Option<etl_checkpoints::Model>, DbErr>
where
    C: ConnectionTrait,
{
    EtlCheckpoints::find()
        .filter(etl_checkpoints::Column::Source.eq(source))
        .one(conn)
        .await
}

/// Cursor the next run should resume from, if any
pub async fn get_cursor<C>(conn: &C, source: &str) -> Result<Option<String>, DbErr>
where
    C: ConnectionTrait,
{
    Ok(get_checkpoint(conn, source)
        .await?
        .and_then(|checkpoint| checkpoint.last_cursor))
}

/// Advance the cursor after a committed batch.
///
/// Call this on the same transaction as the upsert it accompanies.
pub async fn mark_success<C>(
    conn: &C,
    source: &str,
    cursor: Option<&str>,
    records_processed: u64,
) -> Result<(), DbErr>
where
    C: ConnectionTrait,
{
    let now = Utc::now().naive_utc();
    let processed = records_processed as i64;

    let checkpoint = etl_checkpoints::ActiveModel {
        source: Set(source.to_string()),
        last_cursor: Set(cursor.map(str::to_string)),
        last_successful_run: Set(Some(now)),
        records_processed: Set(processed),
        status: Set(CheckpointStatus::Success.to_string()),
        error_message: Set(None),
        updated_at: Set(now),
        ..Default::default()
    };

    EtlCheckpoints::insert(checkpoint)
        .on_conflict(
            OnConflict::column(etl_checkpoints::Column::Source)
                .update_columns([
                    etl_checkpoints::Column::LastCursor,
                    etl_checkpoints::Column::LastSuccessfulRun,
                    etl_checkpoints::Column::Status,
                    etl_checkpoints::Column::ErrorMessage,
                    etl_checkpoints::Column::UpdatedAt,
                ])
                .value(
                    etl_checkpoints::Column::RecordsProcessed,
                    Expr::col((EtlCheckpoints, etl_checkpoints::Column::RecordsProcessed))
                        .add(processed),
                )
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;

    tracing::info!(source = %source, cursor = ?cursor, "Updated checkpoint");
    Ok(())
}

/// Record a failed run without touching the cursor.
pub async fn mark_failed<C>(conn: &C, source: &str, error: &str) -> Result<(), DbErr>
where
    C: ConnectionTrait,
{
    let now = Utc::now().naive_utc();

    let checkpoint = etl_checkpoints::ActiveModel {
        source: Set(source.to_string()),
        last_cursor: Set(None),
        last_successful_run: Set(None),
        records_processed: Set(0),
        status: Set(CheckpointStatus::Failed.to_string()),
        error_message: Set(Some(error.to_string())),
        updated_at: Set(now),
        ..Default::default()
    };

    EtlCheckpoints::insert(checkpoint)
        .on_conflict(
            OnConflict::column(etl_checkpoints::Column::Source)
                .update_columns([
                    etl_checkpoints::Column::Status,
                    etl_checkpoints::Column::ErrorMessage,
                    etl_checkpoints::Column::UpdatedAt,
                ])
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;

    tracing::debug!(source = %source, error = %error, "Marked checkpoint failed");
    Ok(())
}

pub async fn create_run<C>(conn: &C, run_id: &str, source: &str) -> Result<(), DbErr>
where
    C: ConnectionTrait,
{
    let run = etl_runs::ActiveModel {
        run_id: Set(run_id.to_string()),
        source: Set(source.to_string()),
        status: Set(RunStatus::Started.to_string()),
        records_processed: Set(0),
        records_failed: Set(0),
        duration_ms: Set(None),
        error_message: Set(None),
        started_at: Set(Utc::now().naive_utc()),
        completed_at: Set(None),
        ..Default::default()
    };

    EtlRuns::insert(run).exec_without_returning(conn).await?;

    tracing::info!(run_id = %run_id, source = %source, "Created ETL run record");
    Ok(())
}

pub async fn get_run<C>(conn: &C, run_id: &str) -> Result<Option<etl_runs::Model>, DbErr>
where
    C: ConnectionTrait,
{
    EtlRuns::find()
        .filter(etl_runs::Column::RunId.eq(run_id))
        .one(conn)
        .await
}

/// Close a run record.
///
/// Only rows still in `started` are touched, so a finished run never changes
/// again. Returns whether the record was finalized by this call.
pub async fn finalize_run<C>(
    conn: &C,
    run_id: &str,
    status: RunStatus,
    records_processed: usize,
    records_failed: usize,
    error: Option<&str>,
) -> Result<bool, DbErr>
where
    C: ConnectionTrait,
{
    let run = get_run(conn, run_id)
        .await?
        .ok_or_else(|| DbErr::RecordNotFound(format!("etl run {}", run_id)))?;

    let completed_at = Utc::now().naive_utc();
    let duration_ms = completed_at
        .signed_duration_since(run.started_at)
        .num_milliseconds()
        .max(0);

    let result = EtlRuns::update_many()
        .col_expr(etl_runs::Column::Status, Expr::value(status.as_str()))
        .col_expr(
            etl_runs::Column::RecordsProcessed,
            Expr::value(records_processed as i32),
        )
        .col_expr(etl_runs::Column::RecordsFailed, Expr::value(records_failed as i32))
        .col_expr(etl_runs::Column::DurationMs, Expr::value(duration_ms))
        .col_expr(
            etl_runs::Column::ErrorMessage,
            Expr::value(error.map(str::to_string)),
        )
        .col_expr(etl_runs::Column::CompletedAt, Expr::value(completed_at))
        .filter(etl_runs::Column::RunId.eq(run_id))
        .filter(etl_runs::Column::Status.eq(RunStatus::Started.as_str()))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        tracing::warn!(run_id = %run_id, "Run record was already finalized");
        return Ok(false);
    }

    tracing::info!(
        run_id = %run_id,
        status = %status,
        records_processed,
        records_failed,
        duration_ms,
        "Finalized ETL run record"
    );
    Ok(true)
}

/// Most recent `started` run for `source` that is not yet stale.
pub async fn find_active_run<C>(
    conn: &C,
    source: &str,
    stale_after: Duration,
) -> Result<Option<etl_runs::Model>, DbErr>
where
    C: ConnectionTrait,
{
    EtlRuns::find()
        .filter(etl_runs::Column::Source.eq(source))
        .filter(etl_runs::Column::Status.eq(RunStatus::Started.as_str()))
        .filter(etl_runs::Column::StartedAt.gt(stale_cutoff(stale_after)))
        .order_by_desc(etl_runs::Column::StartedAt)
        .one(conn)
        .await
}

/// Reclassify runs stuck in `started` for longer than `stale_after` as failed.
///
/// A run can only be left in `started` when the process died mid-run.
pub async fn reconcile_stale_runs<C>(conn: &C, stale_after: Duration) -> Result<u64, DbErr>
where
    C: ConnectionTrait,
{
    let result = EtlRuns::update_many()
        .col_expr(etl_runs::Column::Status, Expr::value(RunStatus::Failed.as_str()))
        .col_expr(etl_runs::Column::ErrorMessage, Expr::value(ABANDONED_RUN_MESSAGE))
        .col_expr(
            etl_runs::Column::CompletedAt,
            Expr::value(Utc::now().naive_utc()),
        )
        .filter(etl_runs::Column::Status.eq(RunStatus::Started.as_str()))
        .filter(etl_runs::Column::StartedAt.lte(stale_cutoff(stale_after)))
        .exec(conn)
        .await?;

    if result.rows_affected > 0 {
        tracing::warn!(
            reclassified = result.rows_affected,
            stale_after_minutes = stale_after.num_minutes(),
            "Reclassified stale ETL runs as failed"
        );
    }

    Ok(result.rows_affected)
}

fn stale_cutoff(stale_after: Duration) -> NaiveDateTime {
    Utc::now().naive_utc() - stale_after
}
