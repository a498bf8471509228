use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Number, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::IngestError;
use crate::ingestion::http::send_json;
use crate::ingestion::retry::{with_retry, RetryPolicy};
use crate::models::coin::{decimal_from_number, parse_timestamp, NormalizedCoin, RawRecord};
use crate::services::rate_limiter::TokenBucket;

pub const SOURCE_NAME: &str = "coingecko";

pub const EXPECTED_SCHEMA: &[&str] = &[
    "id",
    "symbol",
    "name",
    "current_price",
    "market_cap",
    "total_volume",
    "price_change_percentage_24h",
    "last_updated",
];

/// One entry of `/coins/markets`
#[derive(Debug, Deserialize)]
struct CoinGeckoMarket {
    id: String,
    symbol: String,
    name: Option<String>,
    current_price: Option<Number>,
    market_cap: Option<Number>,
    total_volume: Option<Number>,
    price_change_percentage_24h: Option<Number>,
    last_updated: String,
}

/// Top coins by market cap. Every run fetches the current snapshot; the
/// cursor is only an advisory timestamp.
pub struct CoinGeckoSource {
    client: Client,
    base_url: String,
    api_key: String,
    limiter: Arc<TokenBucket>,
    retry: RetryPolicy,
}

impl CoinGeckoSource {
    pub fn new(client: Client, base_url: String, api_key: String, limiter: Arc<TokenBucket>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            limiter,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Header carrying the API key; pro hosts and demo hosts use different names.
    fn api_key_header(&self) -> Option<&'static str> {
        if self.api_key.is_empty() {
            None
        } else if self.base_url.contains("pro-api.coingecko.com") {
            Some("x-cg-pro-api-key")
        } else {
            Some("x-cg-demo-api-key")
        }
    }

    pub async fn fetch(&self) -> Result<Vec<RawRecord>, IngestError> {
        let url = format!("{}/coins/markets", self.base_url);
        let url = url.as_str();
        let header = self.api_key_header();

        let body = with_retry(&self.retry, "coingecko_markets", move || async move {
            self.limiter.acquire().await;

            let mut request = self.client.get(url).query(&[
                ("vs_currency", "usd"),
                ("order", "market_cap_desc"),
                ("per_page", "100"),
                ("page", "1"),
                ("sparkline", "false"),
                ("price_change_percentage", "24h"),
            ]);
            if let Some(name) = header {
                request = request.header(name, &self.api_key);
            }

            send_json(request).await
        })
        .await?;

        let records: Vec<RawRecord> = market_entries(body)?
            .into_iter()
            .map(|payload| RawRecord::new(SOURCE_NAME, payload))
            .collect();

        info!(source = SOURCE_NAME, fetched = records.len(), "Fetched market snapshot");
        Ok(records)
    }

    pub fn normalize(raw: &RawRecord) -> Option<NormalizedCoin> {
        match normalize_market(raw) {
            Ok(coin) => Some(coin),
            Err(e) => {
                warn!(source = SOURCE_NAME, external_id = %raw.external_id, error = %e, "Failed to normalize record");
                None
            }
        }
    }

    pub fn checkpoint_value() -> String {
        Utc::now().to_rfc3339()
    }
}

/// The markets endpoint answers with a JSON array; anything else is malformed.
fn market_entries(body: Value) -> Result<Vec<Map<String, Value>>, IngestError> {
    let Value::Array(items) = body else {
        return Err(IngestError::Validation(
            "expected a JSON array from /coins/markets".to_string(),
        ));
    };

    let total = items.len();
    let entries: Vec<Map<String, Value>> = items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect();

    if entries.len() < total {
        warn!(
            source = SOURCE_NAME,
            dropped = total - entries.len(),
            "Ignored non-object entries in market response"
        );
    }

    Ok(entries)
}

fn normalize_market(raw: &RawRecord) -> Result<NormalizedCoin, IngestError> {
    let market: CoinGeckoMarket = serde_json::from_value(Value::Object(raw.payload.clone()))
        .map_err(|e| IngestError::Validation(e.to_string()))?;

    let decimal = |n: Option<&Number>| n.map(decimal_from_number).transpose();

    NormalizedCoin {
        source: SOURCE_NAME.to_string(),
        external_id: market.id,
        symbol: market.symbol.to_uppercase(),
        name: market.name,
        current_price: decimal(market.current_price.as_ref())?,
        market_cap: decimal(market.market_cap.as_ref())?,
        volume_24h: decimal(market.total_volume.as_ref())?,
        price_change_24h: decimal(market.price_change_percentage_24h.as_ref())?,
        last_updated: parse_timestamp(&market.last_updated)?,
        metadata: None,
    }
    .fit_columns()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn raw(payload: Value) -> RawRecord {
        RawRecord::new(SOURCE_NAME, payload.as_object().cloned().unwrap())
    }

    fn source(base_url: &str, api_key: &str) -> CoinGeckoSource {
        CoinGeckoSource::new(
            Client::new(),
            base_url.to_string(),
            api_key.to_string(),
            Arc::new(TokenBucket::per_minute(30)),
        )
    }

    #[test]
    fn test_normalize_maps_market_fields() {
        let record = raw(json!({
            "id": "bitcoin",
            "symbol": "btc",
            "name": "Bitcoin",
            "current_price": 45000.12345678,
            "market_cap": 850000000000u64,
            "total_volume": 25000000000u64,
            "price_change_percentage_24h": -2.5,
            "last_updated": "2025-12-08T10:00:00.000Z",
            "image": "https://example.com/btc.png"
        }));

        let coin = CoinGeckoSource::normalize(&record).unwrap();

        assert_eq!(coin.source, "coingecko");
        assert_eq!(coin.external_id, "bitcoin");
        assert_eq!(coin.symbol, "BTC");
        assert_eq!(coin.current_price, Some(dec!(45000.12345678)));
        assert_eq!(coin.market_cap, Some(dec!(850000000000)));
        assert_eq!(coin.volume_24h, Some(dec!(25000000000)));
        assert_eq!(coin.price_change_24h, Some(dec!(-2.5)));
        assert_eq!(coin.last_updated.to_string(), "2025-12-08 10:00:00");
    }

    #[test]
    fn test_normalize_keeps_nulls_and_zeros() {
        let record = raw(json!({
            "id": "newcoin",
            "symbol": "new",
            "name": null,
            "current_price": 0,
            "market_cap": null,
            "total_volume": 0.0,
            "last_updated": "2025-12-08T10:00:00Z"
        }));

        let coin = CoinGeckoSource::normalize(&record).unwrap();

        assert_eq!(coin.name, None);
        assert_eq!(coin.current_price, Some(dec!(0)));
        assert_eq!(coin.market_cap, None);
        assert_eq!(coin.volume_24h, Some(dec!(0)));
        assert_eq!(coin.price_change_24h, None);
    }

    #[test]
    fn test_normalize_skips_incomplete_records() {
        let missing_timestamp = raw(json!({"id": "bitcoin", "symbol": "btc"}));
        assert!(CoinGeckoSource::normalize(&missing_timestamp).is_none());

        let bad_timestamp = raw(json!({
            "id": "bitcoin",
            "symbol": "btc",
            "last_updated": "not a date"
        }));
        assert!(CoinGeckoSource::normalize(&bad_timestamp).is_none());
    }

    #[test]
    fn test_normalize_skips_values_the_coins_table_cannot_hold() {
        let base = json!({
            "id": "memecoin",
            "symbol": "meme",
            "name": "Meme",
            "current_price": 0.0001,
            "price_change_percentage_24h": 12.5,
            "last_updated": "2025-12-08T10:00:00Z"
        });
        assert!(CoinGeckoSource::normalize(&raw(base.clone())).is_some());

        let mut long_symbol = base.clone();
        long_symbol["symbol"] = json!("m".repeat(25));
        assert!(CoinGeckoSource::normalize(&raw(long_symbol)).is_none());

        let mut long_id = base.clone();
        long_id["id"] = json!("i".repeat(101));
        assert!(CoinGeckoSource::normalize(&raw(long_id)).is_none());

        let mut runaway_change = base;
        runaway_change["price_change_percentage_24h"] = json!(1000000);
        let err = normalize_market(&raw(runaway_change)).unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
    }

    #[test]
    fn test_market_entries_requires_array() {
        let err = market_entries(json!({"error": "bad request"})).unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));

        let entries = market_entries(json!([{"id": "bitcoin"}, 7, {"id": "ethereum"}])).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_api_key_header_selection() {
        assert_eq!(source("https://api.coingecko.com/api/v3", "").api_key_header(), None);
        assert_eq!(
            source("https://api.coingecko.com/api/v3", "k").api_key_header(),
            Some("x-cg-demo-api-key")
        );
        assert_eq!(
            source("https://pro-api.coingecko.com/api/v3/", "k").api_key_header(),
            Some("x-cg-pro-api-key")
        );
    }
}
