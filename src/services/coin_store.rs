//! Raw payload persistence and the idempotent coin upsert.

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ConnectionTrait, DbErr, EntityTrait, Set};
use serde_json::Value;
use std::collections::HashMap;

use crate::entities::{
    coins, raw_coin_data,
    prelude::{Coins, RawCoinData},
};
use crate::models::coin::{NormalizedCoin, RawRecord};

/// Rows per INSERT statement. A coin row binds 12 parameters, which keeps
/// every statement under SQLite's 32766 and Postgres's 65535 bind limits.
pub const INSERT_CHUNK_SIZE: usize = 500;

/// Append raw payloads to the audit trail.
pub async fn save_raw_records<C>(conn: &C, records: &[RawRecord]) -> Result<usize, DbErr>
where
    C: ConnectionTrait,
{
    for chunk in records.chunks(INSERT_CHUNK_SIZE) {
        let rows = chunk.iter().map(|record| raw_coin_data::ActiveModel {
            source: Set(record.source.clone()),
            external_id: Set(record.external_id.clone()),
            raw_json: Set(Value::Object(record.payload.clone())),
            ingested_at: Set(record.ingested_at),
            ..Default::default()
        });

        RawCoinData::insert_many(rows)
            .exec_without_returning(conn)
            .await?;
    }

    if !records.is_empty() {
        tracing::info!("Saved {} raw records", records.len());
    }
    Ok(records.len())
}

/// Insert new coins and fully replace existing ones, `INSERT_CHUNK_SIZE`
/// rows per statement on the caller's connection.
///
/// Rows sharing a (source, external_id) key collapse to the last one, since a
/// single upsert cannot touch the same row twice.
pub async fn upsert_coins<C>(conn: &C, records: &[NormalizedCoin]) -> Result<usize, DbErr>
where
    C: ConnectionTrait,
{
    let unique = dedupe_by_identity(records);
    if unique.is_empty() {
        return Ok(0);
    }

    let now = Utc::now().naive_utc();
    for chunk in unique.chunks(INSERT_CHUNK_SIZE) {
        let rows = chunk.iter().map(|coin| coins::ActiveModel {
            source: Set(coin.source.clone()),
            external_id: Set(coin.external_id.clone()),
            symbol: Set(coin.symbol.clone()),
            name: Set(coin.name.clone()),
            current_price: Set(coin.current_price),
            market_cap: Set(coin.market_cap),
            volume_24h: Set(coin.volume_24h),
            price_change_24h: Set(coin.price_change_24h),
            last_updated: Set(coin.last_updated),
            metadata: Set(coin.metadata.clone()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        });

        Coins::insert_many(rows)
            .on_conflict(
                OnConflict::columns([coins::Column::Source, coins::Column::ExternalId])
                    .update_columns([
                        coins::Column::Symbol,
                        coins::Column::Name,
                        coins::Column::CurrentPrice,
                        coins::Column::MarketCap,
                        coins::Column::Volume24h,
                        coins::Column::PriceChange24h,
                        coins::Column::LastUpdated,
                        coins::Column::Metadata,
                        coins::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;
    }

    tracing::info!("Upserted {} normalized records", unique.len());
    Ok(unique.len())
}

fn dedupe_by_identity(records: &[NormalizedCoin]) -> Vec<&NormalizedCoin> {
    let mut position: HashMap<(&str, &str), usize> = HashMap::new();
    let mut unique: Vec<&NormalizedCoin> = Vec::with_capacity(records.len());

    for record in records {
        let key = (record.source.as_str(), record.external_id.as_str());
        match position.get(&key) {
            Some(&index) => unique[index] = record,
            None => {
                position.insert(key, unique.len());
                unique.push(record);
            }
        }
    }

    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn coin(external_id: &str, price: rust_decimal::Decimal) -> NormalizedCoin {
        NormalizedCoin {
            source: "csv".to_string(),
            external_id: external_id.to_string(),
            symbol: "BTC".to_string(),
            name: Some("Bitcoin".to_string()),
            current_price: Some(price),
            market_cap: None,
            volume_24h: None,
            price_change_24h: None,
            last_updated: NaiveDate::from_ymd_opt(2025, 12, 8)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            metadata: None,
        }
    }

    #[test]
    fn test_dedupe_keeps_last_occurrence_in_first_position() {
        let records = vec![
            coin("btc", dec!(1)),
            coin("eth", dec!(2)),
            coin("btc", dec!(3)),
        ];

        let unique = dedupe_by_identity(&records);

        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].external_id, "btc");
        assert_eq!(unique[0].current_price, Some(dec!(3)));
        assert_eq!(unique[1].external_id, "eth");
    }
}
