// src/lib.rs

pub mod entities {
    pub mod prelude;
    pub mod coins;
    pub mod etl_checkpoints;
    pub mod etl_runs;
    pub mod raw_coin_data;
    pub mod schema_drift_logs;
}

pub mod services {
    pub mod checkpoint;
    pub mod coin_store;
    pub mod failure_injector;
    pub mod rate_limiter;
    pub mod schema_drift;
}

pub mod config;
pub mod error;
pub mod ingestion;
pub mod jobs;
pub mod models;
