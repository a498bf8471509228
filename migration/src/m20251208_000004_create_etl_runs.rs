use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EtlRuns::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EtlRuns::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(EtlRuns::RunId)
                            .string_len(36)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(EtlRuns::Source).string_len(50).not_null())
                    .col(ColumnDef::new(EtlRuns::Status).string_len(20).not_null())
                    .col(
                        ColumnDef::new(EtlRuns::RecordsProcessed)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(EtlRuns::RecordsFailed)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(EtlRuns::DurationMs).big_integer().null())
                    .col(ColumnDef::new(EtlRuns::ErrorMessage).text().null())
                    .col(ColumnDef::new(EtlRuns::StartedAt).timestamp().not_null())
                    .col(ColumnDef::new(EtlRuns::CompletedAt).timestamp().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_etl_runs_source_started_at")
                    .table(EtlRuns::Table)
                    .col(EtlRuns::Source)
                    .col(EtlRuns::StartedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EtlRuns::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum EtlRuns {
    Table,
    Id,
    RunId,
    Source,
    Status,
    RecordsProcessed,
    RecordsFailed,
    DurationMs,
    ErrorMessage,
    StartedAt,
    CompletedAt,
}
