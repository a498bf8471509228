use serde::Deserialize;
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::error::IngestError;
use crate::models::coin::{
    parse_optional_decimal, parse_timestamp, NormalizedCoin, RawRecord,
};

pub const SOURCE_NAME: &str = "csv";

pub const EXPECTED_SCHEMA: &[&str] = &[
    "id",
    "symbol",
    "name",
    "price",
    "market_cap",
    "volume_24h",
    "price_change_24h",
    "timestamp",
];

#[derive(Debug, Deserialize)]
struct CsvRow {
    id: String,
    symbol: String,
    name: Option<String>,
    price: Option<String>,
    market_cap: Option<String>,
    volume_24h: Option<String>,
    price_change_24h: Option<String>,
    timestamp: String,
}

/// A local CSV file read incrementally; the cursor is the number of data
/// rows already consumed.
pub struct CsvFileSource {
    path: PathBuf,
}

impl CsvFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn fetch(&self, cursor: Option<&str>) -> Result<Vec<RawRecord>, IngestError> {
        let offset = parse_offset(cursor)?;

        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "CSV file not found");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let records: Vec<RawRecord> = read_rows(&bytes, offset)?
            .into_iter()
            .map(|payload| RawRecord::new(SOURCE_NAME, payload))
            .collect();

        info!(
            path = %self.path.display(),
            start_row = offset,
            fetched = records.len(),
            "Read CSV records"
        );
        Ok(records)
    }

    pub fn normalize(raw: &RawRecord) -> Option<NormalizedCoin> {
        match normalize_row(raw) {
            Ok(coin) => Some(coin),
            Err(e) => {
                warn!(source = SOURCE_NAME, external_id = %raw.external_id, error = %e, "Failed to normalize CSV record");
                None
            }
        }
    }

    /// New total of consumed rows.
    pub fn checkpoint_value(cursor: Option<&str>, records: &[RawRecord]) -> Result<String, IngestError> {
        Ok((parse_offset(cursor)? + records.len()).to_string())
    }
}

fn parse_offset(cursor: Option<&str>) -> Result<usize, IngestError> {
    match cursor.map(str::trim) {
        None | Some("") => Ok(0),
        Some(value) => value
            .parse()
            .map_err(|_| IngestError::Validation(format!("invalid CSV cursor: {:?}", value))),
    }
}

/// Data rows after the first `offset`, keyed by the file's own header names.
fn read_rows(bytes: &[u8], offset: usize) -> Result<Vec<Map<String, Value>>, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();

    for result in reader.records().skip(offset) {
        let record = result?;
        let row: Map<String, Value> = headers
            .iter()
            .zip(record.iter())
            .map(|(header, field)| (header.to_string(), Value::String(field.to_string())))
            .collect();
        rows.push(row);
    }

    Ok(rows)
}

fn normalize_row(raw: &RawRecord) -> Result<NormalizedCoin, IngestError> {
    let row: CsvRow = serde_json::from_value(Value::Object(raw.payload.clone()))
        .map_err(|e| IngestError::Validation(e.to_string()))?;

    if row.id.is_empty() || row.symbol.is_empty() {
        return Err(IngestError::Validation("id and symbol are required".to_string()));
    }

    NormalizedCoin {
        source: SOURCE_NAME.to_string(),
        external_id: row.id,
        symbol: row.symbol.to_uppercase(),
        name: row.name.filter(|n| !n.is_empty()),
        current_price: parse_optional_decimal(row.price.as_deref())?,
        market_cap: parse_optional_decimal(row.market_cap.as_deref())?,
        volume_24h: parse_optional_decimal(row.volume_24h.as_deref())?,
        price_change_24h: parse_optional_decimal(row.price_change_24h.as_deref())?,
        last_updated: parse_timestamp(&row.timestamp)?,
        metadata: None,
    }
    .fit_columns()
}
