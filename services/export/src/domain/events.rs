//! Typed event bodies exchanged over the relay.
//!
//! Payloads are a schema-tagged union: `(event_type, event_version)` selects
//! the decode path, so an unknown type or version is an explicit error
//! instead of a silently misread body.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use questline_relay::Envelope;

use crate::domain::types::SERVICE_NAME;

pub const EXPORT_REQUESTED: &str = "export.requested";
pub const EXPORT_PART_READY: &str = "export.part_ready";

/// Fan-out request: every part-producing service computes its slice for
/// `user_id` and delivers it under `job_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequestedV1 {
    pub job_id: Uuid,
    pub user_id: Uuid,
}

/// One service's computed slice, delivered back to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPartReadyV1 {
    pub job_id: Uuid,
    pub service: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExportEvent {
    Requested(ExportRequestedV1),
    PartReady(ExportPartReadyV1),
}

#[derive(Debug, thiserror::Error)]
pub enum EventDecodeError {
    #[error("unsupported event {event_type} v{event_version}")]
    Unsupported {
        event_type: String,
        event_version: i32,
    },
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl ExportEvent {
    pub fn decode(envelope: &Envelope) -> Result<Self, EventDecodeError> {
        match (envelope.event_type.as_str(), envelope.event_version) {
            (EXPORT_REQUESTED, 1) => Ok(Self::Requested(envelope.decode_payload()?)),
            (EXPORT_PART_READY, 1) => Ok(Self::PartReady(envelope.decode_payload()?)),
            (event_type, event_version) => Err(EventDecodeError::Unsupported {
                event_type: event_type.to_owned(),
                event_version,
            }),
        }
    }
}

/// Envelope for the fan-out request. Partitioned by job id so every event of
/// one job stays ordered.
pub fn export_requested_envelope(job_id: Uuid, user_id: Uuid) -> anyhow::Result<Envelope> {
    let payload = serde_json::to_value(ExportRequestedV1 { job_id, user_id })?;
    Ok(Envelope::new(
        EXPORT_REQUESTED,
        1,
        SERVICE_NAME,
        job_id.to_string(),
        payload,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn should_decode_export_requested_v1() {
        let job_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let envelope = export_requested_envelope(job_id, user_id).unwrap();

        let event = ExportEvent::decode(&envelope).unwrap();
        assert_eq!(
            event,
            ExportEvent::Requested(ExportRequestedV1 { job_id, user_id }),
        );
    }

    #[test]
    fn should_decode_part_ready_v1() {
        let body = ExportPartReadyV1 {
            job_id: Uuid::new_v4(),
            service: "quests".to_owned(),
            payload: json!({"completed": 12}),
        };
        let envelope = Envelope::new(
            EXPORT_PART_READY,
            1,
            "quests",
            body.job_id.to_string(),
            serde_json::to_value(&body).unwrap(),
        );

        let event = ExportEvent::decode(&envelope).unwrap();
        assert_eq!(event, ExportEvent::PartReady(body));
    }

    #[test]
    fn should_reject_unknown_version() {
        let envelope = Envelope::new(EXPORT_REQUESTED, 2, SERVICE_NAME, "job-1", json!({}));
        let err = ExportEvent::decode(&envelope).unwrap_err();
        assert!(matches!(
            err,
            EventDecodeError::Unsupported { event_version: 2, .. }
        ));
    }

    #[test]
    fn should_reject_unknown_event_type() {
        let envelope = Envelope::new("quest.created", 1, "quests", "q-1", json!({}));
        assert!(matches!(
            ExportEvent::decode(&envelope),
            Err(EventDecodeError::Unsupported { .. }),
        ));
    }
}
