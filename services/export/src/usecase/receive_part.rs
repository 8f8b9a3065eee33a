use anyhow::Context as _;
use chrono::Utc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::domain::repository::{BlobStore, ExportJobRepository};
use crate::domain::types::{
    EXPORT_CONSUMER_GROUP, ExportJob, ExportJobStatus, JobPart, JobTransition,
    archive_object_key, part_object_key,
};
use crate::error::ExportServiceError;

/// Outcome of one part delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartDelivery {
    Applied,
    /// The processed ledger already held the event; nothing was written.
    Duplicate,
    /// The job had already left the running flow; the data was dropped.
    Ignored,
}

/// Saga receive-part operation: store one service's slice, record the part,
/// and complete the job once every expected part is present.
///
/// The processed-ledger insert, the part row, and the completion transition
/// commit in one transaction, so a failure anywhere leaves the event unseen
/// and the transport's redelivery is processed instead of skipped. The blob
/// write is an idempotent overwrite and may run before that transaction.
pub struct ReceivePartUseCase<R, B>
where
    R: ExportJobRepository,
    B: BlobStore,
{
    pub jobs: R,
    pub blob: B,
}

impl<R, B> ReceivePartUseCase<R, B>
where
    R: ExportJobRepository,
    B: BlobStore,
{
    /// Internal-HTTP and in-process path: no event identity, always applied.
    pub async fn execute(
        &self,
        job_id: Uuid,
        service: &str,
        payload: serde_json::Value,
    ) -> Result<(), ExportServiceError> {
        self.execute_deduped(None, job_id, service, payload)
            .await
            .map(|_| ())
    }

    /// Consumer path: deduplicated on the envelope's event id.
    pub async fn execute_deduped(
        &self,
        event_id: Option<Uuid>,
        job_id: Uuid,
        service: &str,
        payload: serde_json::Value,
    ) -> Result<PartDelivery, ExportServiceError> {
        // Cheap read-only dedupe before touching the blob store; the ledger
        // insert below still arbitrates concurrent same-id deliveries.
        if let Some(id) = event_id {
            if self.jobs.is_processed(EXPORT_CONSUMER_GROUP, id).await? {
                debug!(event_id = %id, job_id = %job_id, "duplicate part event skipped");
                return Ok(PartDelivery::Duplicate);
            }
        }

        let job = self
            .jobs
            .find_job(job_id)
            .await?
            .ok_or(ExportServiceError::JobNotFound)?;

        // An unexpected service name is a collaborator misconfiguration.
        self.jobs
            .find_part(job_id, service)
            .await?
            .ok_or_else(|| ExportServiceError::UnknownPart {
                service: service.to_owned(),
            })?;

        // A job past the running flow takes no more data: a blob written now
        // would sit outside the sweep's reach forever.
        if !matches!(
            job.status,
            ExportJobStatus::Pending | ExportJobStatus::Running
        ) {
            debug!(job_id = %job_id, service, status = job.status.as_str(), "part for finished job ignored");
            return Ok(PartDelivery::Ignored);
        }

        let bytes = serde_json::to_vec(&payload).context("serialize part payload")?;
        self.blob
            .put(&part_object_key(job_id, service), bytes)
            .await?;

        let transition = self.prepare_completion(&job, service).await?;
        let applied = self
            .jobs
            .record_part_delivery(
                EXPORT_CONSUMER_GROUP,
                event_id,
                job_id,
                service,
                Utc::now(),
                transition.as_ref(),
            )
            .await?;
        if !applied {
            // Lost a concurrent race on the same event id after the
            // pre-check; the winner's write stands.
            debug!(event_id = ?event_id, job_id = %job_id, "duplicate part event skipped");
            return Ok(PartDelivery::Duplicate);
        }
        debug!(job_id = %job_id, service, "export part received");

        match &transition {
            Some(JobTransition::Complete { zip_object_key }) => {
                info!(job_id = %job_id, key = %zip_object_key, "export job completed");
            }
            Some(JobTransition::Fail { reason }) => {
                error!(job_id = %job_id, error = %reason, "export assembly failed");
            }
            // Two final parts committing concurrently may both miss the
            // prepared transition; re-evaluate from committed state.
            None => self.check_completion(job_id).await?,
        }
        Ok(PartDelivery::Applied)
    }

    /// Decide, before the recording transaction, whether this part is the
    /// last one missing; if so, assemble the archive now so the completion
    /// commits together with the part.
    async fn prepare_completion(
        &self,
        job: &ExportJob,
        service: &str,
    ) -> Result<Option<JobTransition>, ExportServiceError> {
        if job.status != ExportJobStatus::Running {
            return Ok(None);
        }
        let parts = self.jobs.list_parts(job.id).await?;
        if parts.is_empty()
            || parts
                .iter()
                .any(|p| p.service != service && !p.received)
        {
            return Ok(None);
        }
        Ok(Some(match self.assemble(job, &parts).await {
            Ok(zip_object_key) => JobTransition::Complete { zip_object_key },
            Err(e) => JobTransition::Fail {
                reason: format!("{e:#}"),
            },
        }))
    }

    /// Trigger assembly when every expected part is present. Only a running
    /// job is assembled, so a redelivered part after completion (or a lost
    /// completion race) is a no-op.
    async fn check_completion(&self, job_id: Uuid) -> Result<(), ExportServiceError> {
        let Some(job) = self.jobs.find_job(job_id).await? else {
            return Ok(());
        };
        if job.status != ExportJobStatus::Running {
            return Ok(());
        }
        let parts = self.jobs.list_parts(job_id).await?;
        if parts.is_empty() || parts.iter().any(|p| !p.received) {
            return Ok(());
        }

        match self.assemble(&job, &parts).await {
            Ok(zip_object_key) => {
                let completed = self
                    .jobs
                    .complete_if_running(job_id, &zip_object_key)
                    .await?;
                if completed {
                    info!(job_id = %job_id, key = %zip_object_key, "export job completed");
                } else {
                    debug!(job_id = %job_id, "completion already claimed");
                }
            }
            Err(e) => {
                let reason = format!("{e:#}");
                error!(job_id = %job_id, error = %reason, "export assembly failed");
                self.jobs.fail_if_running(job_id, &reason).await?;
            }
        }
        Ok(())
    }

    /// Read every stored part and package them into a single archive with
    /// one named entry per service, written under the job's archive key.
    async fn assemble(&self, job: &ExportJob, parts: &[JobPart]) -> anyhow::Result<String> {
        let mut archive = serde_json::Map::new();
        for part in parts {
            let bytes = self.blob.get(&part_object_key(job.id, &part.service)).await?;
            let value: serde_json::Value = serde_json::from_slice(&bytes)
                .with_context(|| format!("decode stored part {}", part.service))?;
            archive.insert(part.service.clone(), value);
        }
        let key = archive_object_key(job.id);
        let bytes =
            serde_json::to_vec(&serde_json::Value::Object(archive)).context("serialize archive")?;
        self.blob.put(&key, bytes).await?;
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::domain::types::{EXPORT_REQUESTED_TOPIC, OutboxRecord};
    use crate::infra::memory::{MemoryBlobStore, MemoryExportJobRepository};

    const SERVICES: [&str; 4] = ["profile", "quests", "submissions", "achievements"];

    async fn seed_running_job(jobs: &MemoryExportJobRepository) -> ExportJob {
        let job = ExportJob::new(Uuid::new_v4(), chrono::Duration::hours(24));
        let services: Vec<String> = SERVICES.iter().map(|s| s.to_string()).collect();
        let envelope = questline_relay::Envelope::new(
            "export.requested",
            1,
            "export",
            job.id.to_string(),
            json!({}),
        );
        let fanout = OutboxRecord::for_envelope(EXPORT_REQUESTED_TOPIC, &envelope).unwrap();
        jobs.create_job(&job, &services, &fanout).await.unwrap();
        jobs.mark_running(job.id).await.unwrap();
        job
    }

    fn usecase(
        jobs: &MemoryExportJobRepository,
        blob: &MemoryBlobStore,
    ) -> ReceivePartUseCase<MemoryExportJobRepository, MemoryBlobStore> {
        ReceivePartUseCase {
            jobs: jobs.clone(),
            blob: blob.clone(),
        }
    }

    #[tokio::test]
    async fn should_stay_running_with_partial_parts() {
        let jobs = MemoryExportJobRepository::new();
        let blob = MemoryBlobStore::new();
        let job = seed_running_job(&jobs).await;
        let usecase = usecase(&jobs, &blob);

        for service in ["profile", "quests", "submissions"] {
            usecase
                .execute(job.id, service, json!({ "service": service }))
                .await
                .unwrap();
        }

        let job = jobs.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, ExportJobStatus::Running);
        assert_eq!(job.zip_object_key, None);
    }

    #[tokio::test]
    async fn should_complete_once_all_parts_arrive() {
        let jobs = MemoryExportJobRepository::new();
        let blob = MemoryBlobStore::new();
        let job = seed_running_job(&jobs).await;
        let usecase = usecase(&jobs, &blob);

        for service in SERVICES {
            usecase
                .execute(job.id, service, json!({ "service": service }))
                .await
                .unwrap();
        }

        let job = jobs.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, ExportJobStatus::Completed);
        let key = job.zip_object_key.expect("archive key set");

        let archive: serde_json::Value =
            serde_json::from_slice(&blob.object(&key).unwrap()).unwrap();
        for service in SERVICES {
            assert_eq!(archive[service], json!({ "service": service }));
        }
    }

    #[tokio::test]
    async fn should_tolerate_redelivered_part_after_completion() {
        let jobs = MemoryExportJobRepository::new();
        let blob = MemoryBlobStore::new();
        let job = seed_running_job(&jobs).await;
        let usecase = usecase(&jobs, &blob);

        for service in SERVICES {
            usecase
                .execute(job.id, service, json!({ "service": service }))
                .await
                .unwrap();
        }
        let completed = jobs.find_job(job.id).await.unwrap().unwrap();
        let archive_before = blob.object(completed.zip_object_key.as_deref().unwrap());

        // Fifth delivery for an already-received service.
        let outcome = usecase
            .execute_deduped(None, job.id, "quests", json!({ "service": "quests" }))
            .await
            .unwrap();
        assert_eq!(outcome, PartDelivery::Ignored);

        let job = jobs.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, ExportJobStatus::Completed);
        let archive_after = blob.object(job.zip_object_key.as_deref().unwrap());
        assert_eq!(archive_before, archive_after);
    }

    #[tokio::test]
    async fn should_drop_part_for_expired_job_without_writing_blobs() {
        let jobs = MemoryExportJobRepository::new();
        let blob = MemoryBlobStore::new();
        let job = seed_running_job(&jobs).await;
        jobs.mark_expired(job.id).await.unwrap();
        let usecase = usecase(&jobs, &blob);

        let outcome = usecase
            .execute_deduped(Some(Uuid::new_v4()), job.id, "quests", json!({}))
            .await
            .unwrap();
        assert_eq!(outcome, PartDelivery::Ignored);

        assert!(!blob.contains(&part_object_key(job.id, "quests")));
        let part = jobs.find_part(job.id, "quests").await.unwrap().unwrap();
        assert!(!part.received);
    }

    #[tokio::test]
    async fn should_not_mark_event_processed_when_recording_fails() {
        let jobs = MemoryExportJobRepository::new();
        let blob = MemoryBlobStore::new();
        let job = seed_running_job(&jobs).await;
        let usecase = usecase(&jobs, &blob);
        let event_id = Uuid::new_v4();

        // The recording transaction aborts: ledger entry and part row roll
        // back together.
        jobs.fail_next_delivery();
        let result = usecase
            .execute_deduped(Some(event_id), job.id, "quests", json!({ "n": 1 }))
            .await;
        assert!(result.is_err());
        let part = jobs.find_part(job.id, "quests").await.unwrap().unwrap();
        assert!(!part.received);

        // The redelivery is not a duplicate: it applies.
        let outcome = usecase
            .execute_deduped(Some(event_id), job.id, "quests", json!({ "n": 1 }))
            .await
            .unwrap();
        assert_eq!(outcome, PartDelivery::Applied);
        let part = jobs.find_part(job.id, "quests").await.unwrap().unwrap();
        assert!(part.received);
    }

    #[tokio::test]
    async fn should_reject_unknown_service() {
        let jobs = MemoryExportJobRepository::new();
        let blob = MemoryBlobStore::new();
        let job = seed_running_job(&jobs).await;
        let usecase = usecase(&jobs, &blob);

        let result = usecase.execute(job.id, "billing", json!({})).await;
        assert!(matches!(
            result,
            Err(ExportServiceError::UnknownPart { service }) if service == "billing",
        ));
    }

    #[tokio::test]
    async fn should_reject_unknown_job() {
        let jobs = MemoryExportJobRepository::new();
        let blob = MemoryBlobStore::new();
        let usecase = usecase(&jobs, &blob);

        let result = usecase.execute(Uuid::new_v4(), "profile", json!({})).await;
        assert!(matches!(result, Err(ExportServiceError::JobNotFound)));
    }

    #[tokio::test]
    async fn should_fail_job_when_assembly_cannot_read_parts() {
        let jobs = MemoryExportJobRepository::new();
        let blob = MemoryBlobStore::new();
        let job = seed_running_job(&jobs).await;
        let usecase = usecase(&jobs, &blob);

        for service in ["profile", "quests", "submissions"] {
            usecase
                .execute(job.id, service, json!({ "service": service }))
                .await
                .unwrap();
        }
        // Corrupt a stored part so assembly fails to decode it.
        blob.put(&part_object_key(job.id, "quests"), b"not-json".to_vec())
            .await
            .unwrap();

        usecase
            .execute(job.id, "achievements", json!({}))
            .await
            .unwrap();

        let job = jobs.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, ExportJobStatus::Failed);
        assert!(job.failure_reason.is_some());
        assert_eq!(job.zip_object_key, None);
    }
}
