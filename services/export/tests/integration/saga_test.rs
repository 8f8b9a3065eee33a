//! End-to-end export saga over the in-memory infrastructure: outbox fan-out,
//! part consumption with dedupe, completion, and download.

use serde_json::json;
use uuid::Uuid;

use questline_relay::{
    ConsumerLoop, Envelope, MemorySubscription, MemoryTransport, RetryPolicy, Transport,
};

use questline_export::config::OutboxConfig;
use questline_export::domain::events::{EXPORT_PART_READY, ExportPartReadyV1, ExportRequestedV1};
use questline_export::domain::repository::ExportJobRepository;
use questline_export::domain::types::{
    EXPORT_CONSUMER_GROUP, EXPORT_PARTS_TOPIC, EXPORT_REQUESTED_TOPIC, ExportJobStatus,
};
use questline_export::infra::memory::{
    MemoryBlobStore, MemoryExportJobRepository, MemoryOutboxRepository, StaticPartSource,
};
use questline_export::usecase::export_job::{CreateExportJobUseCase, DownloadExportUseCase};
use questline_export::usecase::receive_part::ReceivePartUseCase;
use questline_export::worker::dispatcher::OutboxDispatcher;
use questline_export::worker::parts::PartReadyHandler;

const SERVICES: [&str; 4] = ["profile", "quests", "submissions", "achievements"];

struct Harness {
    jobs: MemoryExportJobRepository,
    blob: MemoryBlobStore,
    transport: MemoryTransport,
    consumer: ConsumerLoop<
        MemorySubscription,
        MemoryTransport,
        PartReadyHandler<MemoryExportJobRepository, MemoryBlobStore>,
    >,
    dispatcher: OutboxDispatcher<MemoryOutboxRepository, MemoryTransport>,
}

impl Harness {
    async fn new() -> Self {
        let jobs = MemoryExportJobRepository::new();
        let blob = MemoryBlobStore::new();
        let transport = MemoryTransport::new();

        let subscription = transport
            .subscribe(EXPORT_PARTS_TOPIC, EXPORT_CONSUMER_GROUP)
            .await;
        let handler = PartReadyHandler {
            receive: ReceivePartUseCase {
                jobs: jobs.clone(),
                blob: blob.clone(),
            },
        };
        let consumer = ConsumerLoop::new(
            EXPORT_PARTS_TOPIC,
            subscription,
            transport.clone(),
            handler,
            RetryPolicy {
                max_retries: 2,
                base_delay: std::time::Duration::from_millis(1),
                max_delay: std::time::Duration::from_millis(4),
            },
        );
        // The dispatcher reads the job repo's embedded outbox, mirroring the
        // shared database in production.
        let dispatcher = OutboxDispatcher::new(
            jobs.outbox.clone(),
            transport.clone(),
            OutboxConfig::default(),
        );
        Self {
            jobs,
            blob,
            transport,
            consumer,
            dispatcher,
        }
    }

    async fn create_job(&self, user_id: Uuid) -> questline_export::domain::types::ExportJob {
        let create = CreateExportJobUseCase {
            jobs: self.jobs.clone(),
            blob: self.blob.clone(),
            source: StaticPartSource {
                value: json!({ "displayName": "avery" }),
            },
            services: SERVICES.iter().map(|s| s.to_string()).collect(),
            job_ttl: chrono::Duration::hours(24),
        };
        create.execute(user_id).await.unwrap()
    }

    fn part_ready_envelope(&self, job_id: Uuid, service: &str) -> Envelope {
        let body = ExportPartReadyV1 {
            job_id,
            service: service.to_owned(),
            payload: json!({ "service": service }),
        };
        Envelope::new(
            EXPORT_PART_READY,
            1,
            service,
            job_id.to_string(),
            serde_json::to_value(&body).unwrap(),
        )
    }

    /// Publish one remote part and drive the consumer through it.
    async fn deliver_part(&mut self, envelope: &Envelope) {
        self.transport
            .publish(EXPORT_PARTS_TOPIC, &envelope.partition_key, envelope)
            .await
            .unwrap();
        assert!(self.consumer.poll_once().await.unwrap());
    }
}

#[tokio::test]
async fn should_run_export_saga_to_completion() {
    let mut harness = Harness::new().await;
    let user_id = Uuid::new_v4();

    // Create: job comes back running, with the local profile part in place.
    let job = harness.create_job(user_id).await;
    assert_eq!(job.status, ExportJobStatus::Running);
    assert_eq!(job.zip_object_key, None);

    // Dispatch: the fan-out request reaches the wire with the job's user.
    assert_eq!(harness.dispatcher.tick().await.unwrap(), 1);
    let fanout = harness.transport.published(EXPORT_REQUESTED_TOPIC);
    assert_eq!(fanout.len(), 1);
    let request: ExportRequestedV1 = fanout[0].decode_payload().unwrap();
    assert_eq!(request.job_id, job.id);
    assert_eq!(request.user_id, user_id);

    // Two remote parts in: still running.
    for service in ["quests", "submissions"] {
        let envelope = harness.part_ready_envelope(job.id, service);
        harness.deliver_part(&envelope).await;
    }
    let current = harness.jobs.find_job(job.id).await.unwrap().unwrap();
    assert_eq!(current.status, ExportJobStatus::Running);

    // Final part: completed, with every slice in the archive.
    let envelope = harness.part_ready_envelope(job.id, "achievements");
    harness.deliver_part(&envelope).await;

    let completed = harness.jobs.find_job(job.id).await.unwrap().unwrap();
    assert_eq!(completed.status, ExportJobStatus::Completed);
    let key = completed.zip_object_key.expect("archive key set");
    let archive: serde_json::Value =
        serde_json::from_slice(&harness.blob.object(&key).unwrap()).unwrap();
    for service in SERVICES {
        assert!(archive.get(service).is_some(), "missing {service} slice");
    }
    assert_eq!(archive["profile"], json!({ "displayName": "avery" }));

    // Download: presigned URL for the archive.
    let download = DownloadExportUseCase {
        jobs: harness.jobs.clone(),
        blob: harness.blob.clone(),
        presign_ttl: std::time::Duration::from_secs(600),
    };
    let url = download.execute(user_id, job.id).await.unwrap();
    assert!(url.contains(&key));
}

#[tokio::test]
async fn should_ignore_redelivered_part_events() {
    let mut harness = Harness::new().await;
    let job = harness.create_job(Uuid::new_v4()).await;

    let envelope = harness.part_ready_envelope(job.id, "quests");
    harness.deliver_part(&envelope).await;

    // Redelivery of the same envelope: skipped by the guard, still acked,
    // nothing dead-lettered.
    harness.deliver_part(&envelope).await;

    assert_eq!(harness.transport.acked().len(), 2);
    assert!(
        harness
            .transport
            .published(&format!("{EXPORT_PARTS_TOPIC}.dlq"))
            .is_empty()
    );

    let current = harness.jobs.find_job(job.id).await.unwrap().unwrap();
    assert_eq!(current.status, ExportJobStatus::Running);
    let received = harness
        .jobs
        .list_parts(job.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|p| p.received)
        .count();
    assert_eq!(received, 2);
}

#[tokio::test]
async fn should_dead_letter_part_for_unknown_job() {
    let mut harness = Harness::new().await;
    harness.create_job(Uuid::new_v4()).await;

    let envelope = harness.part_ready_envelope(Uuid::new_v4(), "quests");
    harness.deliver_part(&envelope).await;

    let dead = harness
        .transport
        .published(&format!("{EXPORT_PARTS_TOPIC}.dlq"));
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].event_id, envelope.event_id);
    // The poison delivery is acked once it is parked on the DLQ.
    assert_eq!(harness.transport.acked().len(), 1);
}
