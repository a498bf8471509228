//! `SeaORM` Entity prelude

pub use super::coins::Entity as Coins;
pub use super::etl_checkpoints::Entity as EtlCheckpoints;
pub use super::etl_runs::Entity as EtlRuns;
pub use super::raw_coin_data::Entity as RawCoinData;
pub use super::schema_drift_logs::Entity as SchemaDriftLogs;
