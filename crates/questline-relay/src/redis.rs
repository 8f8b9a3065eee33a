//! Redis Streams transport: XADD to publish, consumer groups with
//! XREADGROUP / XACK for at-least-once delivery per group.

use anyhow::anyhow;
use deadpool_redis::{Pool, redis};
use tracing::debug;

use crate::envelope::Envelope;
use crate::error::RelayError;
use crate::transport::{AckToken, Delivery, Subscription, Transport};

const ENVELOPE_FIELD: &str = "envelope";
const PARTITION_KEY_FIELD: &str = "key";

#[derive(Clone)]
pub struct RedisTransport {
    pool: Pool,
    /// Consumer name within a group (typically the pod/host name).
    consumer_name: String,
}

impl RedisTransport {
    pub fn new(pool: Pool, consumer_name: impl Into<String>) -> Self {
        Self {
            pool,
            consumer_name: consumer_name.into(),
        }
    }

    /// Join (creating if needed) the consumer group `group` on `topic`.
    ///
    /// The group starts at `$`: only envelopes published after group creation
    /// are delivered.
    pub async fn subscribe(&self, topic: &str, group: &str) -> Result<RedisSubscription, RelayError> {
        let mut conn = self.pool.get().await.map_err(RelayError::transport)?;
        let created: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(topic)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match created {
            Ok(()) => debug!(topic, group, "created consumer group"),
            // BUSYGROUP means the group already exists.
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(topic, group, "consumer group already exists");
            }
            Err(e) => return Err(RelayError::transport(e)),
        }
        Ok(RedisSubscription {
            pool: self.pool.clone(),
            topic: topic.to_owned(),
            group: group.to_owned(),
            consumer: self.consumer_name.clone(),
            block_ms: 5_000,
        })
    }
}

impl Transport for RedisTransport {
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        envelope: &Envelope,
    ) -> Result<(), RelayError> {
        let body = serde_json::to_string(envelope)?;
        let mut conn = self.pool.get().await.map_err(RelayError::transport)?;
        let _id: String = redis::cmd("XADD")
            .arg(topic)
            .arg("*")
            .arg(PARTITION_KEY_FIELD)
            .arg(partition_key)
            .arg(ENVELOPE_FIELD)
            .arg(body)
            .query_async(&mut conn)
            .await
            .map_err(RelayError::transport)?;
        Ok(())
    }
}

pub struct RedisSubscription {
    pool: Pool,
    topic: String,
    group: String,
    consumer: String,
    block_ms: u64,
}

impl Subscription for RedisSubscription {
    async fn next(&mut self) -> Result<Option<Delivery>, RelayError> {
        loop {
            let mut conn = self.pool.get().await.map_err(RelayError::transport)?;
            let reply: redis::Value = redis::cmd("XREADGROUP")
                .arg("GROUP")
                .arg(&self.group)
                .arg(&self.consumer)
                .arg("COUNT")
                .arg(1)
                .arg("BLOCK")
                .arg(self.block_ms)
                .arg("STREAMS")
                .arg(&self.topic)
                .arg(">")
                .query_async(&mut conn)
                .await
                .map_err(RelayError::transport)?;
            match reply {
                // Block timeout expired; wait for the next envelope.
                redis::Value::Nil => continue,
                value => {
                    if let Some(delivery) = parse_delivery(value)? {
                        return Ok(Some(delivery));
                    }
                }
            }
        }
    }

    async fn ack(&mut self, token: &AckToken) -> Result<(), RelayError> {
        let mut conn = self.pool.get().await.map_err(RelayError::transport)?;
        let _acked: i64 = redis::cmd("XACK")
            .arg(&self.topic)
            .arg(&self.group)
            .arg(&token.0)
            .query_async(&mut conn)
            .await
            .map_err(RelayError::transport)?;
        Ok(())
    }
}

/// Extract the first message from an XREADGROUP reply:
/// `[[stream, [[id, [field, value, ...]]]]]`.
fn parse_delivery(value: redis::Value) -> Result<Option<Delivery>, RelayError> {
    let protocol = |what: &str| RelayError::transport(anyhow!("unexpected XREADGROUP reply: {what}"));

    let redis::Value::Array(streams) = value else {
        return Err(protocol("not an array"));
    };
    let Some(redis::Value::Array(stream)) = streams.into_iter().next() else {
        return Ok(None);
    };
    // stream = [name, entries]
    let mut stream = stream.into_iter();
    let _name = stream.next();
    let Some(redis::Value::Array(entries)) = stream.next() else {
        return Err(protocol("missing entries"));
    };
    let Some(redis::Value::Array(entry)) = entries.into_iter().next() else {
        return Ok(None);
    };
    // entry = [id, fields]
    let mut entry = entry.into_iter();
    let id = match entry.next() {
        Some(redis::Value::BulkString(bytes)) => {
            String::from_utf8(bytes).map_err(|_| protocol("non-utf8 id"))?
        }
        Some(redis::Value::SimpleString(s)) => s,
        _ => return Err(protocol("missing id")),
    };
    let Some(redis::Value::Array(fields)) = entry.next() else {
        return Err(protocol("missing fields"));
    };
    let mut envelope = None;
    let mut fields = fields.into_iter();
    while let (Some(field), Some(value)) = (fields.next(), fields.next()) {
        let is_envelope = matches!(
            &field,
            redis::Value::BulkString(bytes) if bytes.as_slice() == ENVELOPE_FIELD.as_bytes()
        );
        if is_envelope {
            if let redis::Value::BulkString(bytes) = value {
                envelope = Some(serde_json::from_slice::<Envelope>(&bytes)?);
            }
        }
    }
    let envelope = envelope.ok_or_else(|| protocol("missing envelope field"))?;
    Ok(Some(Delivery {
        envelope,
        token: AckToken(id),
    }))
}
