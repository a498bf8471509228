use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Append-only audit trail of payloads exactly as received
        manager
            .create_table(
                Table::create()
                    .table(RawCoinData::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RawCoinData::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RawCoinData::Source).string_len(50).not_null())
                    .col(
                        ColumnDef::new(RawCoinData::ExternalId)
                            .string_len(100)
                            .not_null(),
                    )
                    .col(ColumnDef::new(RawCoinData::RawJson).json_binary().not_null())
                    .col(
                        ColumnDef::new(RawCoinData::IngestedAt)
                            .timestamp()
                            .not_null()
                            .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_raw_coin_data_source_external_id")
                    .table(RawCoinData::Table)
                    .col(RawCoinData::Source)
                    .col(RawCoinData::ExternalId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RawCoinData::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum RawCoinData {
    Table,
    Id,
    Source,
    ExternalId,
    RawJson,
    IngestedAt,
}
