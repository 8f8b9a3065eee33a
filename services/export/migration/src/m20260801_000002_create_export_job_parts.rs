use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ExportJobParts::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(ExportJobParts::JobId).uuid().not_null())
                    .col(ColumnDef::new(ExportJobParts::Service).string().not_null())
                    .col(
                        ColumnDef::new(ExportJobParts::Received)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(ExportJobParts::ReceivedAt).timestamp_with_time_zone())
                    // Composite PK doubles as the unique (job, service) constraint
                    // resolving concurrent duplicate part delivery.
                    .primary_key(
                        Index::create()
                            .col(ExportJobParts::JobId)
                            .col(ExportJobParts::Service),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(ExportJobParts::Table, ExportJobParts::JobId)
                            .to(ExportJobs::Table, ExportJobs::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ExportJobParts::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum ExportJobParts {
    Table,
    JobId,
    Service,
    Received,
    ReceivedAt,
}

#[derive(Iden)]
enum ExportJobs {
    Table,
    Id,
}
