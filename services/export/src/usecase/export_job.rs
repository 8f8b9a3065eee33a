use chrono::Duration;
use tracing::info;
use uuid::Uuid;

use crate::domain::events::export_requested_envelope;
use crate::domain::repository::{BlobStore, ExportJobRepository, LocalPartSource};
use crate::domain::types::{EXPORT_REQUESTED_TOPIC, ExportJob, ExportJobStatus, OutboxRecord};
use crate::error::ExportServiceError;
use crate::usecase::receive_part::ReceivePartUseCase;

/// Start an export saga: persist the job, its expected parts, and the fan-out
/// request in one transaction, then deliver this service's own slice.
///
/// The fan-out request reaches the other services through the outbox, never
/// directly, so a crash after the transaction commits still ends with the
/// request published.
pub struct CreateExportJobUseCase<R, B, L>
where
    R: ExportJobRepository + Clone,
    B: BlobStore + Clone,
    L: LocalPartSource,
{
    pub jobs: R,
    pub blob: B,
    pub source: L,
    /// Services expected to contribute one part each. The first entry is
    /// this service's own, produced locally.
    pub services: Vec<String>,
    pub job_ttl: Duration,
}

impl<R, B, L> CreateExportJobUseCase<R, B, L>
where
    R: ExportJobRepository + Clone,
    B: BlobStore + Clone,
    L: LocalPartSource,
{
    pub async fn execute(&self, user_id: Uuid) -> Result<ExportJob, ExportServiceError> {
        let job = ExportJob::new(user_id, self.job_ttl);
        let envelope = export_requested_envelope(job.id, user_id)?;
        let fanout = OutboxRecord::for_envelope(EXPORT_REQUESTED_TOPIC, &envelope)?;

        self.jobs.create_job(&job, &self.services, &fanout).await?;
        self.jobs.mark_running(job.id).await?;
        info!(job_id = %job.id, user_id = %user_id, "export job started");

        // This service's slice does not go over the wire; it is collected
        // and delivered in-process, through the same receive path the remote
        // parts take.
        if let Some(local) = self.services.first() {
            let payload = self.source.collect(user_id).await?;
            let receive = ReceivePartUseCase {
                jobs: self.jobs.clone(),
                blob: self.blob.clone(),
            };
            receive.execute(job.id, local, payload).await?;
        }

        // Re-read: the local part may already have completed a job that
        // expects no remote parts.
        self.jobs
            .find_job(job.id)
            .await?
            .ok_or(ExportServiceError::JobNotFound)
    }
}

/// Read a job's status on behalf of its owner.
pub struct GetExportJobUseCase<R: ExportJobRepository> {
    pub jobs: R,
}

impl<R: ExportJobRepository> GetExportJobUseCase<R> {
    pub async fn execute(
        &self,
        user_id: Uuid,
        job_id: Uuid,
    ) -> Result<ExportJob, ExportServiceError> {
        let job = self
            .jobs
            .find_job(job_id)
            .await?
            .ok_or(ExportServiceError::JobNotFound)?;
        // Another user's job is indistinguishable from a missing one.
        if job.user_id != user_id {
            return Err(ExportServiceError::JobNotFound);
        }
        Ok(job)
    }
}

/// Produce a time-limited download URL for a completed export.
pub struct DownloadExportUseCase<R, B>
where
    R: ExportJobRepository,
    B: BlobStore,
{
    pub jobs: R,
    pub blob: B,
    pub presign_ttl: std::time::Duration,
}

impl<R, B> DownloadExportUseCase<R, B>
where
    R: ExportJobRepository,
    B: BlobStore,
{
    pub async fn execute(
        &self,
        user_id: Uuid,
        job_id: Uuid,
    ) -> Result<String, ExportServiceError> {
        let job = self
            .jobs
            .find_job(job_id)
            .await?
            .ok_or(ExportServiceError::JobNotFound)?;
        if job.user_id != user_id {
            return Err(ExportServiceError::JobNotFound);
        }
        if job.status != ExportJobStatus::Completed {
            return Err(ExportServiceError::NotReady);
        }
        let key = job.zip_object_key.ok_or(ExportServiceError::NotReady)?;
        self.blob.presign_get(&key, self.presign_ttl).await
    }
}
