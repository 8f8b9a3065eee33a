use tracing::debug;

use questline_relay::{Envelope, EventHandler, HandlerError};

use crate::domain::events::ExportEvent;
use crate::domain::repository::{BlobStore, ExportJobRepository};
use crate::error::ExportServiceError;
use crate::usecase::receive_part::{PartDelivery, ReceivePartUseCase};

/// Consumes `export.part_ready` events from the other services.
///
/// The receive use case records the event id, the part row, and any job
/// transition in one transaction, so a failure anywhere leaves the event
/// unseen and the transport's redelivery is processed instead of skipped.
pub struct PartReadyHandler<R, B>
where
    R: ExportJobRepository,
    B: BlobStore,
{
    pub receive: ReceivePartUseCase<R, B>,
}

impl<R, B> EventHandler for PartReadyHandler<R, B>
where
    R: ExportJobRepository,
    B: BlobStore,
{
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let part = match ExportEvent::decode(envelope) {
            Ok(ExportEvent::PartReady(part)) => part,
            // Anything else on this topic cannot be processed by retrying.
            Ok(other) => {
                return Err(HandlerError::terminal(anyhow::anyhow!(
                    "unexpected event on parts topic: {other:?}",
                )));
            }
            Err(e) => return Err(HandlerError::terminal(e)),
        };

        match self
            .receive
            .execute_deduped(envelope.event_id, part.job_id, &part.service, part.payload)
            .await
        {
            Ok(PartDelivery::Applied) => Ok(()),
            Ok(PartDelivery::Duplicate | PartDelivery::Ignored) => {
                debug!(event_id = ?envelope.event_id, job_id = %part.job_id, "part event skipped");
                Ok(())
            }
            Err(e) => Err(classify(e)),
        }
    }
}

/// A missing job or an unexpected service name never heals with time; every
/// other failure is assumed transient.
fn classify(e: ExportServiceError) -> HandlerError {
    match e {
        ExportServiceError::JobNotFound | ExportServiceError::UnknownPart { .. } => {
            HandlerError::terminal(e)
        }
        other => HandlerError::retryable(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    use crate::domain::events::{EXPORT_PART_READY, ExportPartReadyV1};
    use crate::domain::types::{
        EXPORT_REQUESTED_TOPIC, ExportJob, OutboxRecord, part_object_key,
    };
    use crate::infra::memory::{MemoryBlobStore, MemoryExportJobRepository};

    fn handler(
        jobs: &MemoryExportJobRepository,
        blob: &MemoryBlobStore,
    ) -> PartReadyHandler<MemoryExportJobRepository, MemoryBlobStore> {
        PartReadyHandler {
            receive: ReceivePartUseCase {
                jobs: jobs.clone(),
                blob: blob.clone(),
            },
        }
    }

    async fn seed_running_job(jobs: &MemoryExportJobRepository, services: &[&str]) -> ExportJob {
        let job = ExportJob::new(Uuid::new_v4(), chrono::Duration::hours(24));
        let services: Vec<String> = services.iter().map(|s| s.to_string()).collect();
        let envelope = Envelope::new(
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

    fn part_ready(job_id: Uuid, service: &str, payload: serde_json::Value) -> Envelope {
        let body = ExportPartReadyV1 {
            job_id,
            service: service.to_owned(),
            payload,
        };
        Envelope::new(
            EXPORT_PART_READY,
            1,
            service,
            job_id.to_string(),
            serde_json::to_value(&body).unwrap(),
        )
    }

    #[tokio::test]
    async fn should_store_part_from_event() {
        let jobs = MemoryExportJobRepository::new();
        let blob = MemoryBlobStore::new();
        let job = seed_running_job(&jobs, &["profile", "quests"]).await;
        let handler = handler(&jobs, &blob);

        let envelope = part_ready(job.id, "quests", json!({ "completed": 7 }));
        handler.handle(&envelope).await.unwrap();

        let part = jobs.find_part(job.id, "quests").await.unwrap().unwrap();
        assert!(part.received);
        assert!(blob.contains(&part_object_key(job.id, "quests")));
    }

    #[tokio::test]
    async fn should_skip_duplicate_deliveries_by_event_id() {
        let jobs = MemoryExportJobRepository::new();
        let blob = MemoryBlobStore::new();
        let job = seed_running_job(&jobs, &["profile", "quests"]).await;
        let handler = handler(&jobs, &blob);

        let mut envelope = part_ready(job.id, "quests", json!({ "completed": 7 }));
        handler.handle(&envelope).await.unwrap();

        // Same event id, different body: the duplicate's payload must not
        // overwrite the first delivery's.
        envelope.payload = serde_json::to_value(ExportPartReadyV1 {
            job_id: job.id,
            service: "quests".to_owned(),
            payload: json!({ "completed": 999 }),
        })
        .unwrap();
        handler.handle(&envelope).await.unwrap();

        let stored: serde_json::Value = serde_json::from_slice(
            &blob.object(&part_object_key(job.id, "quests")).unwrap(),
        )
        .unwrap();
        assert_eq!(stored, json!({ "completed": 7 }));
    }

    #[tokio::test]
    async fn should_process_idless_events_every_time() {
        let jobs = MemoryExportJobRepository::new();
        let blob = MemoryBlobStore::new();
        let job = seed_running_job(&jobs, &["profile", "quests"]).await;
        let handler = handler(&jobs, &blob);

        let mut envelope = part_ready(job.id, "quests", json!({ "completed": 7 }));
        envelope.event_id = None;
        handler.handle(&envelope).await.unwrap();

        envelope.payload = serde_json::to_value(ExportPartReadyV1 {
            job_id: job.id,
            service: "quests".to_owned(),
            payload: json!({ "completed": 8 }),
        })
        .unwrap();
        handler.handle(&envelope).await.unwrap();

        // No id means no dedupe: the second delivery is applied.
        let stored: serde_json::Value = serde_json::from_slice(
            &blob.object(&part_object_key(job.id, "quests")).unwrap(),
        )
        .unwrap();
        assert_eq!(stored, json!({ "completed": 8 }));
    }

    #[tokio::test]
    async fn should_be_terminal_for_unknown_job() {
        let jobs = MemoryExportJobRepository::new();
        let blob = MemoryBlobStore::new();
        let handler = handler(&jobs, &blob);

        let envelope = part_ready(Uuid::new_v4(), "quests", json!({}));
        let err = handler.handle(&envelope).await.unwrap_err();
        assert!(matches!(err, HandlerError::Terminal(_)));
    }

    #[tokio::test]
    async fn should_be_terminal_for_unexpected_service() {
        let jobs = MemoryExportJobRepository::new();
        let blob = MemoryBlobStore::new();
        let job = seed_running_job(&jobs, &["profile"]).await;
        let handler = handler(&jobs, &blob);

        let envelope = part_ready(job.id, "billing", json!({}));
        let err = handler.handle(&envelope).await.unwrap_err();
        assert!(matches!(err, HandlerError::Terminal(_)));
    }

    #[tokio::test]
    async fn should_be_terminal_for_undecodable_events() {
        let jobs = MemoryExportJobRepository::new();
        let blob = MemoryBlobStore::new();
        let handler = handler(&jobs, &blob);

        let envelope = Envelope::new("export.part_ready", 9, "quests", "job-1", json!({}));
        let err = handler.handle(&envelope).await.unwrap_err();
        assert!(matches!(err, HandlerError::Terminal(_)));
    }

    #[tokio::test]
    async fn should_apply_redelivery_after_storage_outage() {
        let jobs = MemoryExportJobRepository::new();
        let blob = MemoryBlobStore::new();
        let job = seed_running_job(&jobs, &["profile", "quests"]).await;
        let handler = handler(&jobs, &blob);

        // First delivery hits an unavailable blob store: retryable, and the
        // event must not end up marked processed.
        blob.fail_puts();
        let envelope = part_ready(job.id, "quests", json!({ "completed": 7 }));
        let err = handler.handle(&envelope).await.unwrap_err();
        assert!(matches!(err, HandlerError::Retryable(_)));
        assert!(!jobs.find_part(job.id, "quests").await.unwrap().unwrap().received);

        // After recovery the redelivery of the same envelope applies.
        blob.restore_puts();
        handler.handle(&envelope).await.unwrap();
        let part = jobs.find_part(job.id, "quests").await.unwrap().unwrap();
        assert!(part.received);
        assert!(blob.contains(&part_object_key(job.id, "quests")));
    }

    #[tokio::test]
    async fn should_apply_redelivery_after_lost_recording() {
        let jobs = MemoryExportJobRepository::new();
        let blob = MemoryBlobStore::new();
        let job = seed_running_job(&jobs, &["profile", "quests"]).await;
        let handler = handler(&jobs, &blob);

        // The recording transaction rolls back: ledger entry and part row go
        // with it, so the redelivery is not mistaken for a duplicate.
        jobs.fail_next_delivery();
        let envelope = part_ready(job.id, "quests", json!({ "completed": 7 }));
        let err = handler.handle(&envelope).await.unwrap_err();
        assert!(matches!(err, HandlerError::Retryable(_)));
        assert!(!jobs.find_part(job.id, "quests").await.unwrap().unwrap().received);

        handler.handle(&envelope).await.unwrap();
        assert!(jobs.find_part(job.id, "quests").await.unwrap().unwrap().received);
    }
}
