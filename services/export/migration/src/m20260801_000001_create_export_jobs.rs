use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ExportJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ExportJobs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ExportJobs::UserId).uuid().not_null())
                    .col(ColumnDef::new(ExportJobs::Status).string().not_null())
                    .col(
                        ColumnDef::new(ExportJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ExportJobs::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ExportJobs::ZipObjectKey).string())
                    .col(ColumnDef::new(ExportJobs::FailureReason).string())
                    .to_owned(),
            )
            .await?;

        // Index for the expiry sweep (non-expired jobs past expires_at).
        manager
            .create_index(
                Index::create()
                    .table(ExportJobs::Table)
                    .col(ExportJobs::Status)
                    .col(ExportJobs::ExpiresAt)
                    .name("idx_export_jobs_status_expires_at")
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .table(ExportJobs::Table)
                    .col(ExportJobs::UserId)
                    .name("idx_export_jobs_user_id")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ExportJobs::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum ExportJobs {
    Table,
    Id,
    UserId,
    Status,
    CreatedAt,
    ExpiresAt,
    ZipObjectKey,
    FailureReason,
}
