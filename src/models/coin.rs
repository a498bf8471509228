use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

use crate::error::IngestError;

pub const MAX_EXTERNAL_ID_CHARS: usize = 100;
pub const MAX_SYMBOL_CHARS: usize = 20;
pub const MAX_NAME_CHARS: usize = 200;

/// A payload exactly as received from a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub source: String,
    pub external_id: String,
    pub payload: Map<String, Value>,
    pub ingested_at: NaiveDateTime,
}

impl RawRecord {
    /// Stamp a payload with its source; the external id comes from its `id` field.
    pub fn new(source: &str, payload: Map<String, Value>) -> Self {
        let external_id = match payload.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => "unknown".to_string(),
        };

        Self {
            source: source.to_string(),
            external_id,
            payload,
            ingested_at: Utc::now().naive_utc(),
        }
    }
}

/// Canonical coin row shared by every source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedCoin {
    pub source: String,
    pub external_id: String,
    pub symbol: String,
    pub name: Option<String>,
    pub current_price: Option<Decimal>,
    pub market_cap: Option<Decimal>,
    pub volume_24h: Option<Decimal>,
    pub price_change_24h: Option<Decimal>,
    pub last_updated: NaiveDateTime,
    pub metadata: Option<Value>,
}

impl NormalizedCoin {
    /// Fit the record to the `coins` column sizes. An over-long name is cut;
    /// an oversized identifier or an amount overflowing its NUMERIC column
    /// rejects the record.
    pub fn fit_columns(mut self) -> Result<Self, IngestError> {
        check_length("external_id", &self.external_id, MAX_EXTERNAL_ID_CHARS)?;
        check_length("symbol", &self.symbol, MAX_SYMBOL_CHARS)?;
        self.name = self.name.map(|name| truncate_chars(&name, MAX_NAME_CHARS));

        check_numeric("current_price", self.current_price, 20, 8)?;
        check_numeric("market_cap", self.market_cap, 30, 2)?;
        check_numeric("volume_24h", self.volume_24h, 30, 2)?;
        check_numeric("price_change_24h", self.price_change_24h, 10, 4)?;

        Ok(self)
    }
}

fn check_length(field: &str, value: &str, max_chars: usize) -> Result<(), IngestError> {
    let chars = value.chars().count();
    if chars > max_chars {
        return Err(IngestError::Validation(format!(
            "{field} is {chars} characters, limit is {max_chars}"
        )));
    }
    Ok(())
}

/// The value after rounding to `scale` must keep at most
/// `precision - scale` integer digits.
fn check_numeric(
    field: &str,
    value: Option<Decimal>,
    precision: u32,
    scale: u32,
) -> Result<(), IngestError> {
    let Some(value) = value else {
        return Ok(());
    };

    let limit = Decimal::from_i128_with_scale(10i128.pow(precision - scale), 0);
    if value.round_dp(scale).abs() >= limit {
        return Err(IngestError::Validation(format!(
            "{field} {value} does not fit NUMERIC({precision},{scale})"
        )));
    }
    Ok(())
}

/// Convert a JSON number through its textual form so no binary float
/// rounding leaks into the stored decimal.
pub fn decimal_from_number(number: &serde_json::Number) -> Result<Decimal, IngestError> {
    parse_decimal(&number.to_string())
}

/// Parse a decimal, accepting scientific notation.
pub fn parse_decimal(raw: &str) -> Result<Decimal, IngestError> {
    let raw = raw.trim();
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|_| IngestError::Validation(format!("not a decimal: {:?}", raw)))
}

/// Empty cells are null; anything else must be a decimal.
pub fn parse_optional_decimal(raw: Option<&str>) -> Result<Option<Decimal>, IngestError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_decimal(value).map(Some),
    }
}

/// Parse a source timestamp into naive UTC.
///
/// RFC 3339 values are converted from their offset; naive values are taken
/// as UTC already.
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, IngestError> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc).naive_utc());
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(dt);
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| IngestError::Validation(format!("unrecognized timestamp: {:?}", raw)))
}

/// Cut `input` to at most `max_chars` characters.
pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        Some((byte_index, _)) => input[..byte_index].to_string(),
        None => input.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_raw_record_external_id() {
        let with_id = json!({"id": "bitcoin", "symbol": "btc"});
        let numeric = json!({"id": 42});
        let without = json!({"symbol": "eth"});

        let as_map = |v: Value| v.as_object().cloned().unwrap();

        assert_eq!(RawRecord::new("coingecko", as_map(with_id)).external_id, "bitcoin");
        assert_eq!(RawRecord::new("csv", as_map(numeric)).external_id, "42");
        assert_eq!(RawRecord::new("csv", as_map(without)).external_id, "unknown");
    }

    #[test]
    fn test_decimal_from_json_number_keeps_digits() {
        let number = json!(45000.12345678);
        let value = decimal_from_number(number.as_number().unwrap()).unwrap();
        assert_eq!(value, dec!(45000.12345678));

        let tiny = json!(0.00001234);
        let value = decimal_from_number(tiny.as_number().unwrap()).unwrap();
        assert_eq!(value, dec!(0.00001234));

        let big = json!(850000000000u64);
        let value = decimal_from_number(big.as_number().unwrap()).unwrap();
        assert_eq!(value, dec!(850000000000));
    }

    #[test]
    fn test_parse_optional_decimal() {
        assert_eq!(parse_optional_decimal(None).unwrap(), None);
        assert_eq!(parse_optional_decimal(Some("  ")).unwrap(), None);
        assert_eq!(parse_optional_decimal(Some("2.5")).unwrap(), Some(dec!(2.5)));
        assert_eq!(parse_optional_decimal(Some("1e3")).unwrap(), Some(dec!(1000)));
        assert!(parse_optional_decimal(Some("abc")).is_err());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let zulu = parse_timestamp("2025-12-08T10:00:00Z").unwrap();
        assert_eq!((zulu.hour(), zulu.minute()), (10, 0));

        let offset = parse_timestamp("2025-12-08T12:00:00+02:00").unwrap();
        assert_eq!(offset, zulu);

        let millis = parse_timestamp("2025-12-09T10:00:00.000Z").unwrap();
        assert_eq!(millis.day(), 9);

        let naive = parse_timestamp("2025-12-08 10:00:00").unwrap();
        assert_eq!(naive, zulu);

        let date_only = parse_timestamp("2025-12-08").unwrap();
        assert_eq!(date_only.hour(), 0);

        assert!(parse_timestamp("yesterday").is_err());
    }

    fn coin() -> NormalizedCoin {
        NormalizedCoin {
            source: "csv".to_string(),
            external_id: "bitcoin".to_string(),
            symbol: "BTC".to_string(),
            name: Some("Bitcoin".to_string()),
            current_price: Some(dec!(45000.5)),
            market_cap: Some(dec!(850000000000)),
            volume_24h: None,
            price_change_24h: Some(dec!(-2.5)),
            last_updated: parse_timestamp("2025-12-08T10:00:00Z").unwrap(),
            metadata: None,
        }
    }

    #[test]
    fn test_fit_columns_accepts_values_at_the_limits() {
        let edge = NormalizedCoin {
            external_id: "x".repeat(MAX_EXTERNAL_ID_CHARS),
            symbol: "₿".repeat(MAX_SYMBOL_CHARS),
            current_price: Some(dec!(999999999999.99999999)),
            market_cap: Some(dec!(9999999999999999999999999999.99)),
            price_change_24h: Some(dec!(-999999.9999)),
            ..coin()
        };

        assert!(edge.fit_columns().is_ok());
    }

    #[test]
    fn test_fit_columns_truncates_long_names() {
        let long_name = NormalizedCoin {
            name: Some("n".repeat(250)),
            ..coin()
        };

        let fitted = long_name.fit_columns().unwrap();
        assert_eq!(fitted.name.map(|n| n.len()), Some(MAX_NAME_CHARS));
    }

    #[test]
    fn test_fit_columns_rejects_oversized_values() {
        let cases = [
            NormalizedCoin { symbol: "S".repeat(21), ..coin() },
            NormalizedCoin { external_id: "e".repeat(101), ..coin() },
            NormalizedCoin { current_price: Some(dec!(1000000000000)), ..coin() },
            NormalizedCoin { volume_24h: Some(dec!(10000000000000000000000000000)), ..coin() },
            NormalizedCoin { price_change_24h: Some(dec!(1000000)), ..coin() },
            // Rounds up to 10^6 at four decimals
            NormalizedCoin { price_change_24h: Some(dec!(-999999.99995)), ..coin() },
        ];

        for case in cases {
            let err = case.fit_columns().unwrap_err();
            assert!(matches!(err, IngestError::Validation(_)), "unexpected error: {err:?}");
        }
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("₿₿₿₿", 2), "₿₿");
    }
}
