#![allow(dead_code)]

use sea_orm::{Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const CSV_HEADER: &str = "id,symbol,name,price,market_cap,volume_24h,price_change_24h,timestamp";

/// Migrated SQLite database living in its own temp directory.
///
/// Keep the value alive for the whole test; dropping it deletes the files.
pub struct TestDb {
    pub db: DatabaseConnection,
    pub dir: TempDir,
}

impl TestDb {
    pub fn csv_path(&self) -> PathBuf {
        self.dir.path().join("crypto_data.csv")
    }
}

/// Set up a fresh, migrated test database
pub async fn setup_test_db() -> Result<TestDb, DbErr> {
    let dir = tempfile::tempdir().map_err(|e| DbErr::Custom(e.to_string()))?;
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("etl.db").display());

    let db = Database::connect(&url).await?;
    migration::Migrator::up(&db, None).await?;

    Ok(TestDb { db, dir })
}

/// One CSV data row for coin `n`.
pub fn coin_row(n: usize) -> String {
    format!(
        "coin-{n},c{n},Coin {n},{price}.25,{cap}000000,{vol}00000,{change}.5,2025-12-08T10:00:00Z",
        price = 100 + n,
        cap = 10 + n,
        vol = 20 + n,
        change = n % 5,
    )
}

/// Write a CSV file with `rows` generated coins (`coin-1` onwards).
pub fn write_csv(path: &Path, rows: usize) {
    let body: Vec<String> = (1..=rows).map(coin_row).collect();
    write_csv_lines(path, CSV_HEADER, &body);
}

pub fn write_csv_lines(path: &Path, header: &str, rows: &[String]) {
    let mut contents = String::from(header);
    contents.push('\n');
    for row in rows {
        contents.push_str(row);
        contents.push('\n');
    }
    std::fs::write(path, contents).expect("failed to write CSV fixture");
}

/// Append generated coins `from..=to` to an existing CSV file.
pub fn append_csv(path: &Path, from: usize, to: usize) {
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .expect("failed to open CSV fixture");
    for n in from..=to {
        writeln!(file, "{}", coin_row(n)).expect("failed to append CSV row");
    }
}
