use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SchemaDriftLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SchemaDriftLogs::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SchemaDriftLogs::Source).string_len(50).not_null())
                    .col(ColumnDef::new(SchemaDriftLogs::RunId).string_len(36).null())
                    .col(
                        ColumnDef::new(SchemaDriftLogs::SchemaName)
                            .string_len(100)
                            .not_null(),
                    )
                    .col(ColumnDef::new(SchemaDriftLogs::ConfidenceScore).double().null())
                    .col(ColumnDef::new(SchemaDriftLogs::MissingFields).json_binary().null())
                    .col(ColumnDef::new(SchemaDriftLogs::ExtraFields).json_binary().null())
                    .col(ColumnDef::new(SchemaDriftLogs::FuzzyMatches).json_binary().null())
                    .col(ColumnDef::new(SchemaDriftLogs::Warnings).json_binary().null())
                    .col(
                        ColumnDef::new(SchemaDriftLogs::DetectedAt)
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
                    .name("idx_schema_drift_source_detected")
                    .table(SchemaDriftLogs::Table)
                    .col(SchemaDriftLogs::Source)
                    .col(SchemaDriftLogs::DetectedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_schema_drift_run_id")
                    .table(SchemaDriftLogs::Table)
                    .col(SchemaDriftLogs::RunId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SchemaDriftLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SchemaDriftLogs {
    Table,
    Id,
    Source,
    RunId,
    SchemaName,
    ConfidenceScore,
    MissingFields,
    ExtraFields,
    FuzzyMatches,
    Warnings,
    DetectedAt,
}
