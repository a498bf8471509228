use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::IngestError;
use crate::ingestion::http::send_json;
use crate::ingestion::retry::{with_retry, RetryPolicy};
use crate::models::coin::{parse_timestamp, truncate_chars, NormalizedCoin, RawRecord};
use crate::services::rate_limiter::TokenBucket;

pub const SOURCE_NAME: &str = "rss_feed";

const NEWS_SYMBOL: &str = "NEWS";
const MAX_TITLE_CHARS: usize = 200;
const MAX_CONTENT_CHARS: usize = 500;

#[derive(Debug, Deserialize)]
struct FeedItem {
    id: String,
    url: String,
    title: String,
    content_text: Option<String>,
    date_published: String,
    authors: Option<Vec<FeedAuthor>>,
    image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FeedAuthor {
    name: String,
}

/// JSON news feed stored alongside market data as `NEWS` rows. Items arrive
/// newest first; the cursor is the id of the newest item already ingested.
pub struct NewsFeedSource {
    client: Client,
    feed_url: String,
    limiter: Arc<TokenBucket>,
    retry: RetryPolicy,
}

impl NewsFeedSource {
    pub fn new(client: Client, feed_url: String, limiter: Arc<TokenBucket>) -> Self {
        Self {
            client,
            feed_url,
            limiter,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn fetch(&self, cursor: Option<&str>) -> Result<Vec<RawRecord>, IngestError> {
        info!(source = SOURCE_NAME, last_cursor = ?cursor, "Fetching news feed");

        let body = with_retry(&self.retry, "news_feed", move || async move {
            self.limiter.acquire().await;
            send_json(self.client.get(&self.feed_url)).await
        })
        .await?;

        let records: Vec<RawRecord> = items_since(feed_items(body)?, cursor)
            .into_iter()
            .map(|payload| RawRecord::new(SOURCE_NAME, payload))
            .collect();

        info!(
            source = SOURCE_NAME,
            fetched = records.len(),
            has_cursor = cursor.is_some(),
            "Fetched news feed items"
        );
        Ok(records)
    }

    pub fn normalize(raw: &RawRecord) -> Option<NormalizedCoin> {
        match normalize_item(raw) {
            Ok(coin) => Some(coin),
            Err(e) => {
                warn!(source = SOURCE_NAME, external_id = %raw.external_id, error = %e, "Failed to normalize feed item");
                None
            }
        }
    }

    /// Id of the newest fetched item, or the previous cursor when it has none.
    pub fn checkpoint_value(cursor: Option<&str>, records: &[RawRecord]) -> Option<String> {
        records
            .first()
            .and_then(|record| record.payload.get("id"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .or(cursor)
            .map(str::to_string)
    }
}

fn feed_items(body: Value) -> Result<Vec<Value>, IngestError> {
    match body {
        Value::Object(mut document) => match document.remove("items") {
            Some(Value::Array(items)) => Ok(items),
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(_) => Err(IngestError::Validation("feed `items` is not an array".to_string())),
        },
        _ => Err(IngestError::Validation("expected a JSON feed document".to_string())),
    }
}

/// Items newer than `cursor`; all of them when the cursor is unset or unseen.
fn items_since(items: Vec<Value>, cursor: Option<&str>) -> Vec<Map<String, Value>> {
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .take_while(|item| match cursor {
            Some(cursor) => item.get("id").and_then(Value::as_str) != Some(cursor),
            None => true,
        })
        .collect()
}

fn normalize_item(raw: &RawRecord) -> Result<NormalizedCoin, IngestError> {
    let item: FeedItem = serde_json::from_value(Value::Object(raw.payload.clone()))
        .map_err(|e| IngestError::Validation(e.to_string()))?;

    let last_updated = parse_timestamp(&item.date_published)?;
    let authors: Vec<String> = item
        .authors
        .unwrap_or_default()
        .into_iter()
        .map(|author| author.name)
        .collect();

    let metadata = json!({
        "url": item.url,
        "title": item.title,
        "content_text": item.content_text.as_deref().map(|text| truncate_chars(text, MAX_CONTENT_CHARS)),
        "authors": authors,
        "image": item.image,
        "date_published": item.date_published,
        "type": "news_article",
    });

    NormalizedCoin {
        source: SOURCE_NAME.to_string(),
        external_id: item.id,
        symbol: NEWS_SYMBOL.to_string(),
        name: Some(truncate_chars(&item.title, MAX_TITLE_CHARS)),
        current_price: Some(Decimal::ZERO),
        market_cap: Some(Decimal::ZERO),
        volume_24h: Some(Decimal::ZERO),
        price_change_24h: Some(Decimal::ZERO),
        last_updated,
        metadata: Some(metadata),
    }
    .fit_columns()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str) -> Value {
        json!({
            "id": id,
            "url": format!("https://news.example.com/{}", id),
            "title": format!("Story {}", id),
            "date_published": "2025-12-09T08:30:00+01:00"
        })
    }

    #[test]
    fn test_items_since_stops_at_cursor() {
        let items = vec![item("c"), item("b"), item("a")];

        let fresh = items_since(items.clone(), Some("b"));
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0]["id"], "c");

        assert!(items_since(items.clone(), Some("c")).is_empty());
        assert_eq!(items_since(items.clone(), Some("gone")).len(), 3);
        assert_eq!(items_since(items, None).len(), 3);
    }

    #[test]
    fn test_feed_items_shape() {
        assert_eq!(feed_items(json!({"items": [item("a")]})).unwrap().len(), 1);
        assert!(feed_items(json!({"version": "1.1"})).unwrap().is_empty());
        assert!(feed_items(json!([item("a")])).is_err());
        assert!(feed_items(json!({"items": "nope"})).is_err());
    }

    #[test]
    fn test_normalize_item() {
        let mut payload = item("abc").as_object().cloned().unwrap();
        payload.insert("title".into(), json!("T".repeat(250)));
        payload.insert("content_text".into(), json!("c".repeat(900)));
        payload.insert("authors".into(), json!([{"name": "Ada"}, {"name": "Lin"}]));
        let raw = RawRecord::new(SOURCE_NAME, payload);

        let coin = NewsFeedSource::normalize(&raw).unwrap();

        assert_eq!(coin.external_id, "abc");
        assert_eq!(coin.symbol, "NEWS");
        assert_eq!(coin.name.as_deref().map(str::len), Some(200));
        assert_eq!(coin.current_price, Some(Decimal::ZERO));
        assert_eq!(coin.last_updated.to_string(), "2025-12-09 07:30:00");

        let metadata = coin.metadata.unwrap();
        assert_eq!(metadata["type"], "news_article");
        assert_eq!(metadata["authors"], json!(["Ada", "Lin"]));
        assert_eq!(metadata["content_text"].as_str().map(str::len), Some(500));
        assert_eq!(metadata["title"].as_str().map(str::len), Some(250));
    }

    #[test]
    fn test_normalize_requires_title_and_date() {
        let raw = RawRecord::new(
            SOURCE_NAME,
            json!({"id": "x", "url": "https://news.example.com/x"})
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert!(NewsFeedSource::normalize(&raw).is_none());
    }

    #[test]
    fn test_checkpoint_is_newest_item() {
        let records: Vec<RawRecord> = [item("c"), item("b")]
            .into_iter()
            .map(|v| RawRecord::new(SOURCE_NAME, v.as_object().cloned().unwrap()))
            .collect();

        assert_eq!(NewsFeedSource::checkpoint_value(Some("a"), &records).as_deref(), Some("c"));
        assert_eq!(NewsFeedSource::checkpoint_value(Some("a"), &[]).as_deref(), Some("a"));
    }
}
