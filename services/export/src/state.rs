use sea_orm::DatabaseConnection;

use crate::infra::blob::HttpBlobStore;
use crate::infra::db::{DbExportJobRepository, DbLocalPartSource, DbOutboxRepository};

/// Shared application state passed to every handler via axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub blob: HttpBlobStore,
    pub part_services: Vec<String>,
    pub job_ttl: chrono::Duration,
    pub presign_ttl: std::time::Duration,
    pub internal_token: String,
}

impl AppState {
    pub fn job_repo(&self) -> DbExportJobRepository {
        DbExportJobRepository {
            db: self.db.clone(),
        }
    }

    pub fn outbox_repo(&self) -> DbOutboxRepository {
        DbOutboxRepository {
            db: self.db.clone(),
        }
    }

    pub fn part_source(&self) -> DbLocalPartSource {
        DbLocalPartSource {
            db: self.db.clone(),
        }
    }
}
