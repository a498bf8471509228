//! ETL Scheduler Job
//!
//! Runs every configured source in turn on a fixed interval.
//! Supports graceful shutdown via SIGINT.

use chrono::Duration as ChronoDuration;
use reqwest::Client;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tokio::time::{interval, Duration as TokioDuration};
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::ingestion::{CoinGeckoSource, CsvFileSource, IngestionPipeline, NewsFeedSource, Source};
use crate::services::checkpoint;
use crate::services::failure_injector::FailureInjector;
use crate::services::rate_limiter::RateLimiterRegistry;

const HTTP_TIMEOUT_SECS: u64 = 30;

/// Start the ETL scheduler job
///
/// Spawns a background task that reconciles stale runs and then ingests
/// every source sequentially, once per `ETL_SCHEDULE_MINUTES`. The first
/// cycle starts immediately.
pub async fn start_etl_scheduler(db: DatabaseConnection, settings: Settings) {
    tokio::spawn(async move {
        info!(
            schedule_interval_minutes = settings.schedule_interval_minutes,
            stale_run_timeout_minutes = settings.stale_run_timeout_minutes,
            "Initializing ETL scheduler job"
        );

        let client = match Client::builder()
            .timeout(TokioDuration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                error!(error = %e, "Failed to build HTTP client, ETL scheduler not started");
                return;
            }
        };

        let registry = RateLimiterRegistry::new();
        let pipelines = build_pipelines(&db, &settings, client, &registry);
        let stale_after = ChronoDuration::minutes(settings.stale_run_timeout_minutes);

        info!(sources = pipelines.len(), "ETL scheduler job started successfully");

        let mut interval = interval(TokioDuration::from_secs(
            settings.schedule_interval_minutes.max(1) * 60,
        ));

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received, stopping ETL scheduler job gracefully");
                    break;
                }
                _ = interval.tick() => {
                    run_etl_cycle(&db, &pipelines, stale_after).await;
                }
            }
        }

        info!("ETL scheduler job stopped");
    });
}

/// One scheduler cycle. A failing source is logged and the next one still runs.
pub async fn run_etl_cycle(
    db: &DatabaseConnection,
    pipelines: &[IngestionPipeline],
    stale_after: ChronoDuration,
) {
    info!("Starting ETL cycle");

    if let Err(e) = checkpoint::reconcile_stale_runs(db, stale_after).await {
        error!(error = %e, "Failed to reconcile stale runs");
    }

    let mut succeeded = 0;
    for pipeline in pipelines {
        match pipeline.run().await {
            Ok(summary) => {
                succeeded += 1;
                info!(
                    source = %summary.source,
                    run_id = %summary.run_id,
                    fetched = summary.records_fetched,
                    processed = summary.records_processed,
                    failed = summary.records_failed,
                    "Source ingested"
                );
            }
            Err(e) => {
                error!(source = pipeline.source_name(), error = %e, "Source ingestion failed");
            }
        }
    }

    info!(succeeded = succeeded, total = pipelines.len(), "ETL cycle completed");
}

/// One pipeline per source, sharing a client and per-source rate limiters.
pub fn build_pipelines(
    db: &DatabaseConnection,
    settings: &Settings,
    client: Client,
    registry: &RateLimiterRegistry,
) -> Vec<IngestionPipeline> {
    let injector = if settings.failure_injection.enabled {
        warn!("Failure injection is enabled; do not run this configuration in production");
        Some(Arc::new(FailureInjector::new(settings.failure_injection.clone())))
    } else {
        None
    };

    let sources = vec![
        Source::CoinGecko(CoinGeckoSource::new(
            client.clone(),
            settings.coingecko_base_url.clone(),
            settings.coingecko_api_key.clone(),
            registry.get_limiter(
                crate::ingestion::coingecko::SOURCE_NAME,
                settings.coingecko_rate_limit_per_minute,
            ),
        )),
        Source::Csv(CsvFileSource::new(settings.csv_path.clone())),
        Source::NewsFeed(NewsFeedSource::new(
            client,
            settings.news_feed_url.clone(),
            registry.get_limiter(
                crate::ingestion::news_feed::SOURCE_NAME,
                settings.news_feed_rate_limit_per_minute,
            ),
        )),
    ];

    sources
        .into_iter()
        .map(|source| {
            IngestionPipeline::new(db.clone(), source)
                .with_failure_injector(injector.clone())
                .with_drift_sample_size(settings.drift_sample_size)
                .with_stale_after(ChronoDuration::minutes(settings.stale_run_timeout_minutes))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::failure_injector::FailureInjectorConfig;
    use std::path::PathBuf;

    fn settings() -> Settings {
        Settings {
            database_url: "sqlite::memory:".to_string(),
            coingecko_api_key: String::new(),
            coingecko_base_url: "https://api.coingecko.com/api/v3".to_string(),
            coingecko_rate_limit_per_minute: 30,
            news_feed_url: "https://feed.example.com/feed.json".to_string(),
            news_feed_rate_limit_per_minute: 20,
            csv_path: PathBuf::from("data/crypto_data.csv"),
            schedule_interval_minutes: 60,
            stale_run_timeout_minutes: 120,
            drift_sample_size: 10,
            failure_injection: FailureInjectorConfig::default(),
        }
    }

    #[test]
    fn test_build_pipelines_covers_every_source_in_order() {
        let db = DatabaseConnection::Disconnected;
        let registry = RateLimiterRegistry::new();

        let pipelines = build_pipelines(&db, &settings(), Client::new(), &registry);

        let names: Vec<&str> = pipelines.iter().map(|p| p.source_name()).collect();
        assert_eq!(names, vec!["coingecko", "csv", "rss_feed"]);
    }
}
