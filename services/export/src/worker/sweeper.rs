use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::domain::repository::{BlobStore, ExportJobRepository};
use crate::domain::types::{ExportJob, part_object_key};
use crate::error::ExportServiceError;

/// Periodically expires jobs whose TTL has passed and reclaims their blobs.
///
/// Blob deletion is best-effort: an unreachable blob store must not keep an
/// expired archive downloadable, so the status flips to expired regardless
/// and orphaned objects wait for the next cleanup.
pub struct ExpirySweeper<R, B>
where
    R: ExportJobRepository,
    B: BlobStore,
{
    jobs: R,
    blob: B,
    interval: Duration,
}

impl<R, B> ExpirySweeper<R, B>
where
    R: ExportJobRepository,
    B: BlobStore,
{
    pub fn new(jobs: R, blob: B, interval: Duration) -> Self {
        Self {
            jobs,
            blob,
            interval,
        }
    }

    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match self.tick().await {
                Ok(0) => {}
                Ok(expired) => info!(expired, "export sweep expired jobs"),
                Err(e) => warn!(error = %e, "export sweep failed"),
            }
        }
    }

    /// One sweep pass. Returns how many jobs were expired.
    pub async fn tick(&self) -> Result<usize, ExportServiceError> {
        let expired = self.jobs.list_expired(Utc::now()).await?;
        let count = expired.len();
        for job in expired {
            self.reclaim_blobs(&job).await;
            self.jobs.mark_expired(job.id).await?;
        }
        Ok(count)
    }

    async fn reclaim_blobs(&self, job: &ExportJob) {
        if let Some(key) = &job.zip_object_key {
            if let Err(e) = self.blob.delete(key).await {
                warn!(job_id = %job.id, key = %key, error = %e, "archive delete failed");
            }
        }
        let parts = match self.jobs.list_parts(job.id).await {
            Ok(parts) => parts,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "part listing failed during sweep");
                return;
            }
        };
        for part in parts.iter().filter(|p| p.received) {
            let key = part_object_key(job.id, &part.service);
            if let Err(e) = self.blob.delete(&key).await {
                warn!(job_id = %job.id, key = %key, error = %e, "part delete failed");
            }
        }
    }
}
