#![allow(async_fn_in_trait)]

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::types::{ExportJob, JobPart, JobTransition, OutboxRecord};
use crate::error::ExportServiceError;

/// Repository for export jobs and their parts.
pub trait ExportJobRepository: Send + Sync {
    /// Insert the job, one part row per expected service (all unreceived),
    /// and the fan-out outbox record atomically (same transaction).
    async fn create_job(
        &self,
        job: &ExportJob,
        services: &[String],
        fanout: &OutboxRecord,
    ) -> Result<(), ExportServiceError>;

    async fn find_job(&self, job_id: Uuid) -> Result<Option<ExportJob>, ExportServiceError>;

    /// pending → running. A no-op if the job already left pending.
    async fn mark_running(&self, job_id: Uuid) -> Result<(), ExportServiceError>;

    async fn find_part(
        &self,
        job_id: Uuid,
        service: &str,
    ) -> Result<Option<JobPart>, ExportServiceError>;

    /// `true` if the processed ledger already holds the pair.
    async fn is_processed(
        &self,
        consumer_group: &str,
        event_id: Uuid,
    ) -> Result<bool, ExportServiceError>;

    /// Apply one part delivery atomically: insert `(consumer_group,
    /// event_id)` into the processed ledger (when the delivery carries an
    /// id), mark the part received, and commit the prepared job transition,
    /// all in one transaction. Returns `false` and writes nothing when the
    /// ledger already holds the event. A delivery without an id skips the
    /// ledger insert and is always applied.
    async fn record_part_delivery(
        &self,
        consumer_group: &str,
        event_id: Option<Uuid>,
        job_id: Uuid,
        service: &str,
        at: DateTime<Utc>,
        transition: Option<&JobTransition>,
    ) -> Result<bool, ExportServiceError>;

    async fn list_parts(&self, job_id: Uuid) -> Result<Vec<JobPart>, ExportServiceError>;

    /// running → completed with the archive key. Returns `false` (changing
    /// nothing) if the job already left running — the at-most-once guard for
    /// assembly.
    async fn complete_if_running(
        &self,
        job_id: Uuid,
        zip_object_key: &str,
    ) -> Result<bool, ExportServiceError>;

    /// running → failed with a reason. Returns `false` if the job already
    /// left running.
    async fn fail_if_running(
        &self,
        job_id: Uuid,
        reason: &str,
    ) -> Result<bool, ExportServiceError>;

    /// Jobs past `expires_at` in any status except expired.
    async fn list_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExportJob>, ExportServiceError>;

    async fn mark_expired(&self, job_id: Uuid) -> Result<(), ExportServiceError>;
}

/// Repository for the transactional outbox queue.
pub trait OutboxRepository: Send + Sync {
    /// Records due for publish: `new` with `next_attempt_at <= now`, oldest
    /// first, at most `limit`.
    async fn claim_batch(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<OutboxRecord>, ExportServiceError>;

    async fn mark_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), ExportServiceError>;

    /// Record a failed attempt and schedule the next one.
    async fn mark_retry(
        &self,
        id: Uuid,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), ExportServiceError>;

    /// Terminal failure: the record is never retried again, kept for audit.
    async fn mark_failed(
        &self,
        id: Uuid,
        attempts: i32,
        error: &str,
    ) -> Result<(), ExportServiceError>;
}

/// Port to the external blob store (bytes under a key).
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), ExportServiceError>;
    async fn get(&self, key: &str) -> Result<Vec<u8>, ExportServiceError>;
    /// Idempotent: deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), ExportServiceError>;
    /// Time-limited read URL for `key`.
    async fn presign_get(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<String, ExportServiceError>;
}

/// This service's own slice of a user's data, produced without a network
/// round-trip (the coordinator owns it).
pub trait LocalPartSource: Send + Sync {
    async fn collect(&self, user_id: Uuid) -> Result<serde_json::Value, ExportServiceError>;
}
