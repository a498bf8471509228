pub mod coingecko;
pub mod csv_file;
mod http;
pub mod news_feed;
pub mod pipeline;
pub mod retry;

pub use coingecko::CoinGeckoSource;
pub use csv_file::CsvFileSource;
pub use news_feed::NewsFeedSource;
pub use pipeline::IngestionPipeline;

use crate::error::IngestError;
use crate::models::coin::{NormalizedCoin, RawRecord};

/// Every source the pipeline knows how to ingest.
pub enum Source {
    CoinGecko(CoinGeckoSource),
    Csv(CsvFileSource),
    NewsFeed(NewsFeedSource),
}

impl Source {
    /// Stable name used for checkpoints, run records, and rate limiting.
    pub fn name(&self) -> &'static str {
        match self {
            Source::CoinGecko(_) => coingecko::SOURCE_NAME,
            Source::Csv(_) => csv_file::SOURCE_NAME,
            Source::NewsFeed(_) => news_feed::SOURCE_NAME,
        }
    }

    /// Records newer than `cursor`. The only operation that performs I/O.
    pub async fn fetch(&self, cursor: Option<&str>) -> Result<Vec<RawRecord>, IngestError> {
        match self {
            Source::CoinGecko(source) => source.fetch().await,
            Source::Csv(source) => source.fetch(cursor).await,
            Source::NewsFeed(source) => source.fetch(cursor).await,
        }
    }

    /// Map a raw payload onto the canonical row, or `None` to skip it.
    pub fn normalize(&self, raw: &RawRecord) -> Option<NormalizedCoin> {
        match self {
            Source::CoinGecko(_) => CoinGeckoSource::normalize(raw),
            Source::Csv(_) => CsvFileSource::normalize(raw),
            Source::NewsFeed(_) => NewsFeedSource::normalize(raw),
        }
    }

    /// Cursor to store once `records` fetched from `cursor` have committed.
    pub fn checkpoint_value(
        &self,
        cursor: Option<&str>,
        records: &[RawRecord],
    ) -> Result<Option<String>, IngestError> {
        match self {
            Source::CoinGecko(_) => Ok(Some(CoinGeckoSource::checkpoint_value())),
            Source::Csv(_) => CsvFileSource::checkpoint_value(cursor, records).map(Some),
            Source::NewsFeed(_) => Ok(NewsFeedSource::checkpoint_value(cursor, records)),
        }
    }

    /// Field layout drift detection compares payloads against.
    pub fn expected_schema(&self) -> Option<&'static [&'static str]> {
        match self {
            Source::CoinGecko(_) => Some(coingecko::EXPECTED_SCHEMA),
            Source::Csv(_) => Some(csv_file::EXPECTED_SCHEMA),
            Source::NewsFeed(_) => None,
        }
    }
}
