use sea_orm_migration::prelude::*;

use questline_export_migration::Migrator;

#[tokio::main]
async fn main() {
    cli::run_cli(Migrator).await;
}
