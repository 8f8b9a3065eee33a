use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OutboxRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OutboxRecords::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OutboxRecords::Topic).string().not_null())
                    .col(
                        ColumnDef::new(OutboxRecords::PartitionKey)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OutboxRecords::Envelope)
                            .json_binary()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OutboxRecords::Status).string().not_null())
                    .col(
                        ColumnDef::new(OutboxRecords::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(OutboxRecords::LastError).string())
                    .col(
                        ColumnDef::new(OutboxRecords::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OutboxRecords::NextAttemptAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OutboxRecords::SentAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        // Index for the dispatcher poll query (new records due for publish).
        manager
            .create_index(
                Index::create()
                    .table(OutboxRecords::Table)
                    .col(OutboxRecords::Status)
                    .col(OutboxRecords::NextAttemptAt)
                    .name("idx_outbox_records_status_next_attempt_at")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OutboxRecords::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum OutboxRecords {
    Table,
    Id,
    Topic,
    PartitionKey,
    Envelope,
    Status,
    Attempts,
    LastError,
    CreatedAt,
    NextAttemptAt,
    SentAt,
}
