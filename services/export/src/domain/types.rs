use anyhow::anyhow;
use chrono::{DateTime, Utc};
use questline_relay::Envelope;
use uuid::Uuid;

/// Producing service name stamped on every envelope.
pub const SERVICE_NAME: &str = "export";

/// Fan-out request topic, consumed by every part-producing service.
pub const EXPORT_REQUESTED_TOPIC: &str = "export.requested";

/// Topic on which services publish their computed slice of a user's data.
pub const EXPORT_PARTS_TOPIC: &str = "export.parts";

/// Consumer group for this service's parts consumer.
pub const EXPORT_CONSUMER_GROUP: &str = "export-service";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportJobStatus {
    /// Created but not yet fanned out / running.
    Pending,
    Running,
    Completed,
    Expired,
    Failed,
}

impl ExportJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Expired => "expired",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "expired" => Some(Self::Expired),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Export saga root: one job per user request, completed when every expected
/// part has been received and the archive assembled.
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: ExportJobStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub zip_object_key: Option<String>,
    pub failure_reason: Option<String>,
}

impl ExportJob {
    pub fn new(user_id: Uuid, ttl: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            status: ExportJobStatus::Pending,
            created_at: now,
            expires_at: now + ttl,
            zip_object_key: None,
            failure_reason: None,
        }
    }
}

/// Terminal job transition prepared from a pre-read of the parts, committed
/// in the same transaction that records the final part.
#[derive(Debug, Clone)]
pub enum JobTransition {
    Complete { zip_object_key: String },
    Fail { reason: String },
}

/// One expected per-service slice of an export job.
#[derive(Debug, Clone)]
pub struct JobPart {
    pub job_id: Uuid,
    pub service: String,
    pub received: bool,
    pub received_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    New,
    Sent,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "new" => Some(Self::New),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Durable publish intent, written in the same transaction as the business
/// change it announces.
#[derive(Debug, Clone)]
pub struct OutboxRecord {
    /// Equals the envelope's event id, so retries republish the same
    /// logical event.
    pub id: Uuid,
    pub topic: String,
    pub partition_key: String,
    /// Serialized envelope, republished as-is on every attempt.
    pub envelope: serde_json::Value,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// Build a `new` record from a locally-created envelope. Fails if the
    /// envelope carries no event id (foreign envelopes are not outboxed).
    pub fn for_envelope(topic: impl Into<String>, envelope: &Envelope) -> anyhow::Result<Self> {
        let id = envelope
            .event_id
            .ok_or_else(|| anyhow!("outboxed envelope must carry an event id"))?;
        let now = Utc::now();
        Ok(Self {
            id,
            topic: topic.into(),
            partition_key: envelope.partition_key.clone(),
            envelope: serde_json::to_value(envelope)?,
            status: OutboxStatus::New,
            attempts: 0,
            last_error: None,
            created_at: now,
            next_attempt_at: now,
            sent_at: None,
        })
    }
}

/// Blob key for one stored part payload.
pub fn part_object_key(job_id: Uuid, service: &str) -> String {
    format!("export-jobs/{job_id}/parts/{service}.json")
}

/// Blob key for the assembled archive.
pub fn archive_object_key(job_id: Uuid) -> String {
    format!("export-jobs/{job_id}/archive.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn should_round_trip_job_status_strings() {
        for status in [
            ExportJobStatus::Pending,
            ExportJobStatus::Running,
            ExportJobStatus::Completed,
            ExportJobStatus::Expired,
            ExportJobStatus::Failed,
        ] {
            assert_eq!(ExportJobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ExportJobStatus::parse("done"), None);
    }

    #[test]
    fn should_build_outbox_record_from_envelope() {
        let envelope = Envelope::new("export.requested", 1, SERVICE_NAME, "job-1", json!({}));
        let record = OutboxRecord::for_envelope(EXPORT_REQUESTED_TOPIC, &envelope).unwrap();
        assert_eq!(Some(record.id), envelope.event_id);
        assert_eq!(record.partition_key, "job-1");
        assert_eq!(record.status, OutboxStatus::New);
        assert_eq!(record.attempts, 0);
    }

    #[test]
    fn should_reject_outboxing_envelope_without_id() {
        let mut envelope = Envelope::new("export.requested", 1, SERVICE_NAME, "job-1", json!({}));
        envelope.event_id = None;
        assert!(OutboxRecord::for_envelope(EXPORT_REQUESTED_TOPIC, &envelope).is_err());
    }

    #[test]
    fn should_derive_deterministic_blob_keys() {
        let job_id = Uuid::nil();
        assert_eq!(
            part_object_key(job_id, "quests"),
            "export-jobs/00000000-0000-0000-0000-000000000000/parts/quests.json",
        );
        assert_eq!(
            archive_object_key(job_id),
            "export-jobs/00000000-0000-0000-0000-000000000000/archive.json",
        );
    }
}
