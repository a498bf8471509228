pub use sea_orm_migration::prelude::*;

mod m20251208_000001_create_raw_coin_data;
mod m20251208_000002_create_coins;
mod m20251208_000003_create_etl_checkpoints;
mod m20251208_000004_create_etl_runs;
mod m20251209_000001_create_schema_drift_logs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20251208_000001_create_raw_coin_data::Migration),
            Box::new(m20251208_000002_create_coins::Migration),
            Box::new(m20251208_000003_create_etl_checkpoints::Migration),
            Box::new(m20251208_000004_create_etl_runs::Migration),
            Box::new(m20251209_000001_create_schema_drift_logs::Migration),
        ]
    }
}
