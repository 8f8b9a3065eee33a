use sea_orm_migration::prelude::*;

mod m20260801_000001_create_export_jobs;
mod m20260801_000002_create_export_job_parts;
mod m20260801_000003_create_outbox_records;
mod m20260801_000004_create_processed_events;
mod m20260801_000005_create_user_profiles;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260801_000001_create_export_jobs::Migration),
            Box::new(m20260801_000002_create_export_job_parts::Migration),
            Box::new(m20260801_000003_create_outbox_records::Migration),
            Box::new(m20260801_000004_create_processed_events::Migration),
            Box::new(m20260801_000005_create_user_profiles::Migration),
        ]
    }
}
