use sea_orm_migration::prelude::*;

/// Nullable NUMERIC(precision, scale). SQLite's builder rejects precision
/// above 16, so there the column is left unsized.
fn decimal_column(manager: &SchemaManager, column: Coins, precision: u32, scale: u32) -> ColumnDef {
    let mut def = ColumnDef::new(column);
    match manager.get_database_backend() {
        sea_orm::DbBackend::Sqlite => def.decimal(),
        _ => def.decimal_len(precision, scale),
    };
    def.null();
    def
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Coins::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Coins::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Coins::Source).string_len(50).not_null())
                    .col(ColumnDef::new(Coins::ExternalId).string_len(100).not_null())
                    .col(ColumnDef::new(Coins::Symbol).string_len(20).not_null())
                    .col(ColumnDef::new(Coins::Name).string_len(200).null())
                    .col(decimal_column(manager, Coins::CurrentPrice, 20, 8))
                    .col(decimal_column(manager, Coins::MarketCap, 30, 2))
                    .col(decimal_column(manager, Coins::Volume24h, 30, 2))
                    .col(decimal_column(manager, Coins::PriceChange24h, 10, 4))
                    .col(ColumnDef::new(Coins::LastUpdated).timestamp().not_null())
                    .col(ColumnDef::new(Coins::Metadata).json_binary().null())
                    .col(
                        ColumnDef::new(Coins::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                    )
                    .col(
                        ColumnDef::new(Coins::UpdatedAt)
                            .timestamp()
                            .not_null()
                            .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                    )
                    .to_owned(),
            )
            .await?;

        // Conflict target for idempotent upserts
        manager
            .create_index(
                Index::create()
                    .name("uq_source_external_id")
                    .table(Coins::Table)
                    .col(Coins::Source)
                    .col(Coins::ExternalId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_coins_symbol_last_updated")
                    .table(Coins::Table)
                    .col(Coins::Symbol)
                    .col(Coins::LastUpdated)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Coins::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Coins {
    Table,
    Id,
    Source,
    ExternalId,
    Symbol,
    Name,
    CurrentPrice,
    MarketCap,
    #[sea_orm(iden = "volume_24h")]
    Volume24h,
    #[sea_orm(iden = "price_change_24h")]
    PriceChange24h,
    LastUpdated,
    Metadata,
    CreatedAt,
    UpdatedAt,
}
