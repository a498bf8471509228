//! `SeaORM` Entity for schema_drift_logs table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "schema_drift_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub source: String,
    pub run_id: Option<String>,
    pub schema_name: String,
    #[sea_orm(column_type = "Double", nullable)]
    pub confidence_score: Option<f64>,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub missing_fields: Option<Json>,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub extra_fields: Option<Json>,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub fuzzy_matches: Option<Json>,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub warnings: Option<Json>,
    pub detected_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
