//! In-memory implementations of the domain ports, for tests and local runs
//! without Postgres or a blob service.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::repository::{
    BlobStore, ExportJobRepository, LocalPartSource, OutboxRepository,
};
use crate::domain::types::{
    ExportJob, ExportJobStatus, JobPart, JobTransition, OutboxRecord, OutboxStatus,
};
use crate::error::ExportServiceError;

// ── Outbox ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct OutboxState {
    records: HashMap<Uuid, OutboxRecord>,
    fail_next_mark_sent: bool,
}

#[derive(Clone, Default)]
pub struct MemoryOutboxRepository {
    state: Arc<Mutex<OutboxState>>,
}

impl MemoryOutboxRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: OutboxRecord) {
        self.state
            .lock()
            .unwrap()
            .records
            .insert(record.id, record);
    }

    pub fn record(&self, id: Uuid) -> Option<OutboxRecord> {
        self.state.lock().unwrap().records.get(&id).cloned()
    }

    /// Test hook: pull `next_attempt_at` into the past so the next claim
    /// picks the record up without waiting out the backoff.
    pub fn make_due(&self, id: Uuid) {
        if let Some(record) = self.state.lock().unwrap().records.get_mut(&id) {
            record.next_attempt_at = Utc::now() - chrono::Duration::seconds(1);
        }
    }

    /// Test hook: fail the next `mark_sent`, simulating a crash between a
    /// successful publish and persisting the status change.
    pub fn fail_next_mark_sent(&self) {
        self.state.lock().unwrap().fail_next_mark_sent = true;
    }
}

impl OutboxRepository for MemoryOutboxRepository {
    async fn claim_batch(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<OutboxRecord>, ExportServiceError> {
        let state = self.state.lock().unwrap();
        let mut due: Vec<OutboxRecord> = state
            .records
            .values()
            .filter(|r| r.status == OutboxStatus::New && r.next_attempt_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|r| r.created_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn mark_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), ExportServiceError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next_mark_sent {
            state.fail_next_mark_sent = false;
            return Err(ExportServiceError::Internal(anyhow!("store unavailable")));
        }
        if let Some(record) = state.records.get_mut(&id) {
            record.status = OutboxStatus::Sent;
            record.sent_at = Some(at);
            record.last_error = None;
        }
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: Uuid,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), ExportServiceError> {
        if let Some(record) = self.state.lock().unwrap().records.get_mut(&id) {
            record.attempts = attempts;
            record.next_attempt_at = next_attempt_at;
            record.last_error = Some(error.to_owned());
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        attempts: i32,
        error: &str,
    ) -> Result<(), ExportServiceError> {
        if let Some(record) = self.state.lock().unwrap().records.get_mut(&id) {
            record.status = OutboxStatus::Failed;
            record.attempts = attempts;
            record.last_error = Some(error.to_owned());
        }
        Ok(())
    }
}

// ── Export jobs ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct JobState {
    jobs: HashMap<Uuid, ExportJob>,
    parts: HashMap<(Uuid, String), JobPart>,
    processed: HashMap<(String, Uuid), DateTime<Utc>>,
    fail_next_delivery: bool,
}

#[derive(Clone, Default)]
pub struct MemoryExportJobRepository {
    state: Arc<Mutex<JobState>>,
    /// Shared with the dispatcher under test: `create_job` lands the fan-out
    /// record here, as the database transaction would.
    pub outbox: MemoryOutboxRepository,
}

impl MemoryExportJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: move a job's `expires_at` into the past.
    pub fn force_expire(&self, job_id: Uuid) {
        if let Some(job) = self.state.lock().unwrap().jobs.get_mut(&job_id) {
            job.expires_at = Utc::now() - chrono::Duration::seconds(1);
        }
    }

    /// Test hook: abort the next `record_part_delivery` before any write,
    /// as a rolled-back database transaction would.
    pub fn fail_next_delivery(&self) {
        self.state.lock().unwrap().fail_next_delivery = true;
    }
}

impl ExportJobRepository for MemoryExportJobRepository {
    async fn create_job(
        &self,
        job: &ExportJob,
        services: &[String],
        fanout: &OutboxRecord,
    ) -> Result<(), ExportServiceError> {
        let mut state = self.state.lock().unwrap();
        state.jobs.insert(job.id, job.clone());
        for service in services {
            state.parts.insert(
                (job.id, service.clone()),
                JobPart {
                    job_id: job.id,
                    service: service.clone(),
                    received: false,
                    received_at: None,
                },
            );
        }
        drop(state);
        self.outbox.insert(fanout.clone());
        Ok(())
    }

    async fn find_job(&self, job_id: Uuid) -> Result<Option<ExportJob>, ExportServiceError> {
        Ok(self.state.lock().unwrap().jobs.get(&job_id).cloned())
    }

    async fn mark_running(&self, job_id: Uuid) -> Result<(), ExportServiceError> {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(&job_id) {
            if job.status == ExportJobStatus::Pending {
                job.status = ExportJobStatus::Running;
            }
        }
        Ok(())
    }

    async fn find_part(
        &self,
        job_id: Uuid,
        service: &str,
    ) -> Result<Option<JobPart>, ExportServiceError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .parts
            .get(&(job_id, service.to_owned()))
            .cloned())
    }

    async fn is_processed(
        &self,
        consumer_group: &str,
        event_id: Uuid,
    ) -> Result<bool, ExportServiceError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .processed
            .contains_key(&(consumer_group.to_owned(), event_id)))
    }

    async fn record_part_delivery(
        &self,
        consumer_group: &str,
        event_id: Option<Uuid>,
        job_id: Uuid,
        service: &str,
        at: DateTime<Utc>,
        transition: Option<&JobTransition>,
    ) -> Result<bool, ExportServiceError> {
        // All writes land under one lock, mirroring the single database
        // transaction.
        let mut state = self.state.lock().unwrap();
        if state.fail_next_delivery {
            state.fail_next_delivery = false;
            return Err(ExportServiceError::Internal(anyhow!(
                "store unavailable"
            )));
        }
        if let Some(id) = event_id {
            let key = (consumer_group.to_owned(), id);
            if state.processed.contains_key(&key) {
                return Ok(false);
            }
            state.processed.insert(key, at);
        }
        if let Some(part) = state.parts.get_mut(&(job_id, service.to_owned())) {
            part.received = true;
            part.received_at = Some(at);
        }
        match transition {
            Some(JobTransition::Complete { zip_object_key }) => {
                if let Some(job) = state.jobs.get_mut(&job_id) {
                    if job.status == ExportJobStatus::Running {
                        job.status = ExportJobStatus::Completed;
                        job.zip_object_key = Some(zip_object_key.clone());
                    }
                }
            }
            Some(JobTransition::Fail { reason }) => {
                if let Some(job) = state.jobs.get_mut(&job_id) {
                    if job.status == ExportJobStatus::Running {
                        job.status = ExportJobStatus::Failed;
                        job.failure_reason = Some(reason.clone());
                    }
                }
            }
            None => {}
        }
        Ok(true)
    }

    async fn list_parts(&self, job_id: Uuid) -> Result<Vec<JobPart>, ExportServiceError> {
        let state = self.state.lock().unwrap();
        let mut parts: Vec<JobPart> = state
            .parts
            .values()
            .filter(|p| p.job_id == job_id)
            .cloned()
            .collect();
        parts.sort_by(|a, b| a.service.cmp(&b.service));
        Ok(parts)
    }

    async fn complete_if_running(
        &self,
        job_id: Uuid,
        zip_object_key: &str,
    ) -> Result<bool, ExportServiceError> {
        let mut state = self.state.lock().unwrap();
        match state.jobs.get_mut(&job_id) {
            Some(job) if job.status == ExportJobStatus::Running => {
                job.status = ExportJobStatus::Completed;
                job.zip_object_key = Some(zip_object_key.to_owned());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_if_running(
        &self,
        job_id: Uuid,
        reason: &str,
    ) -> Result<bool, ExportServiceError> {
        let mut state = self.state.lock().unwrap();
        match state.jobs.get_mut(&job_id) {
            Some(job) if job.status == ExportJobStatus::Running => {
                job.status = ExportJobStatus::Failed;
                job.failure_reason = Some(reason.to_owned());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExportJob>, ExportServiceError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .jobs
            .values()
            .filter(|j| j.expires_at < now && j.status != ExportJobStatus::Expired)
            .cloned()
            .collect())
    }

    async fn mark_expired(&self, job_id: Uuid) -> Result<(), ExportServiceError> {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.status = ExportJobStatus::Expired;
        }
        Ok(())
    }
}

// ── Blob store ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct BlobState {
    objects: HashMap<String, Vec<u8>>,
    fail_deletes: bool,
    fail_puts: bool,
}

#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    state: Arc<Mutex<BlobState>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().unwrap().objects.contains_key(key)
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().objects.get(key).cloned()
    }

    /// Test hook: make every delete fail (sweep must still expire the job).
    pub fn fail_deletes(&self) {
        self.state.lock().unwrap().fail_deletes = true;
    }

    /// Test hook: make every put fail until `restore_puts`.
    pub fn fail_puts(&self) {
        self.state.lock().unwrap().fail_puts = true;
    }

    pub fn restore_puts(&self) {
        self.state.lock().unwrap().fail_puts = false;
    }
}

impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), ExportServiceError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_puts {
            return Err(ExportServiceError::Internal(anyhow!(
                "blob store unavailable"
            )));
        }
        state.objects.insert(key.to_owned(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ExportServiceError> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| ExportServiceError::Internal(anyhow!("no such object: {key}")))
    }

    async fn delete(&self, key: &str) -> Result<(), ExportServiceError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_deletes {
            return Err(ExportServiceError::Internal(anyhow!("blob store unavailable")));
        }
        state.objects.remove(key);
        Ok(())
    }

    async fn presign_get(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<String, ExportServiceError> {
        Ok(format!("memory://{key}?expires={}", ttl.as_secs()))
    }
}

// ── Local part source ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct StaticPartSource {
    pub value: serde_json::Value,
}

impl LocalPartSource for StaticPartSource {
    async fn collect(&self, _user_id: Uuid) -> Result<serde_json::Value, ExportServiceError> {
        Ok(self.value.clone())
    }
}
