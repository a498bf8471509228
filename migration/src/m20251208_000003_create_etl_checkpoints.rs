use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One row per source: where the next run resumes
        manager
            .create_table(
                Table::create()
                    .table(EtlCheckpoints::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EtlCheckpoints::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(EtlCheckpoints::Source)
                            .string_len(50)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(EtlCheckpoints::LastCursor).string_len(200).null())
                    .col(ColumnDef::new(EtlCheckpoints::LastSuccessfulRun).timestamp().null())
                    .col(
                        ColumnDef::new(EtlCheckpoints::RecordsProcessed)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(EtlCheckpoints::Status).string_len(20).not_null())
                    .col(ColumnDef::new(EtlCheckpoints::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(EtlCheckpoints::UpdatedAt)
                            .timestamp()
                            .not_null()
                            .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EtlCheckpoints::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum EtlCheckpoints {
    Table,
    Id,
    Source,
    LastCursor,
    LastSuccessfulRun,
    RecordsProcessed,
    Status,
    ErrorMessage,
    UpdatedAt,
}
