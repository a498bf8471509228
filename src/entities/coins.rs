//! `SeaORM` Entity for coins table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coins")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub source: String,
    pub external_id: String,
    pub symbol: String,
    pub name: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((20, 8)))", nullable)]
    pub current_price: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((30, 2)))", nullable)]
    pub market_cap: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((30, 2)))", nullable)]
    pub volume_24h: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((10, 4)))", nullable)]
    pub price_change_24h: Option<Decimal>,
    pub last_updated: DateTime,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub metadata: Option<Json>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
