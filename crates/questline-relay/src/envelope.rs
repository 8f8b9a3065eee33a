use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable wire format wrapping a typed payload with delivery metadata.
///
/// `event_id` is assigned exactly once at creation and never regenerated:
/// every delivery attempt of the same logical event carries the same id, which
/// is what makes consumer-side deduplication possible. Envelopes from foreign
/// producers may arrive without an id (`None`); such events cannot be
/// deduplicated and are processed on every delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    pub event_id: Option<Uuid>,
    pub event_type: String,
    /// Schema version of the payload; `(event_type, event_version)` selects
    /// the decode path on the consumer side.
    pub event_version: i32,
    pub occurred_at: DateTime<Utc>,
    /// Producing service name.
    pub source: String,
    pub trace_id: String,
    /// Transport ordering domain: ordering is guaranteed only among envelopes
    /// sharing this key.
    pub partition_key: String,
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new(
        event_type: impl Into<String>,
        event_version: i32,
        source: impl Into<String>,
        partition_key: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Some(Uuid::new_v4()),
            event_type: event_type.into(),
            event_version,
            occurred_at: Utc::now(),
            source: source.into(),
            trace_id: Uuid::new_v4().to_string(),
            partition_key: partition_key.into(),
            payload,
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    /// Decode the payload as `T`. Callers match on `(event_type,
    /// event_version)` first to pick the target type.
    pub fn decode_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Dead-letter destination for a topic (suffix convention).
pub fn dlq_topic(topic: &str) -> String {
    format!("{topic}.dlq")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn should_assign_event_id_once() {
        let envelope = Envelope::new("quest.created", 1, "quests", "q-1", json!({"id": 1}));
        assert!(envelope.event_id.is_some());

        // Re-serializing the same envelope keeps the same id.
        let bytes = serde_json::to_string(&envelope).unwrap();
        let decoded: Envelope = serde_json::from_str(&bytes).unwrap();
        assert_eq!(decoded.event_id, envelope.event_id);
    }

    #[test]
    fn should_tolerate_missing_event_id() {
        let raw = json!({
            "eventType": "quest.created",
            "eventVersion": 1,
            "occurredAt": "2026-01-01T00:00:00Z",
            "source": "quests",
            "traceId": "t-1",
            "partitionKey": "q-1",
            "payload": {},
        });
        let envelope: Envelope = serde_json::from_value(raw).unwrap();
        assert_eq!(envelope.event_id, None);
    }

    #[test]
    fn should_decode_typed_payload() {
        #[derive(serde::Deserialize)]
        struct QuestCreated {
            id: i32,
        }
        let envelope = Envelope::new("quest.created", 1, "quests", "q-7", json!({"id": 7}));
        let payload: QuestCreated = envelope.decode_payload().unwrap();
        assert_eq!(payload.id, 7);
    }

    #[test]
    fn should_derive_dlq_topic_by_suffix() {
        assert_eq!(dlq_topic("export.parts"), "export.parts.dlq");
    }
}
