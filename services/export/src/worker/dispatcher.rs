use chrono::Utc;
use tracing::{debug, error, warn};

use questline_relay::{Envelope, Transport};

use crate::config::OutboxConfig;
use crate::domain::repository::OutboxRepository;
use crate::domain::types::OutboxRecord;
use crate::error::ExportServiceError;

/// Polls the outbox and publishes due records to the transport.
///
/// Delivery is at-least-once: `mark_sent` runs after the publish, so a crash
/// between the two republishes the record (with the same event id) on the
/// next tick. Consumers deduplicate on that id.
///
/// Run exactly one dispatcher per deployment; `claim_batch` does not lock
/// records against a second poller.
pub struct OutboxDispatcher<R, T>
where
    R: OutboxRepository,
    T: Transport,
{
    outbox: R,
    transport: T,
    config: OutboxConfig,
}

impl<R, T> OutboxDispatcher<R, T>
where
    R: OutboxRepository,
    T: Transport,
{
    pub fn new(outbox: R, transport: T, config: OutboxConfig) -> Self {
        Self {
            outbox,
            transport,
            config,
        }
    }

    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.dispatch_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                warn!(error = %e, "outbox tick failed");
            }
        }
    }

    /// One dispatch pass. Returns how many records were published.
    pub async fn tick(&self) -> Result<usize, ExportServiceError> {
        let batch = self
            .outbox
            .claim_batch(Utc::now(), self.config.batch_size)
            .await?;
        let mut sent = 0;
        for record in batch {
            if self.dispatch(&record).await? {
                sent += 1;
            }
        }
        Ok(sent)
    }

    async fn dispatch(&self, record: &OutboxRecord) -> Result<bool, ExportServiceError> {
        let envelope: Envelope = match serde_json::from_value(record.envelope.clone()) {
            Ok(envelope) => envelope,
            Err(e) => {
                // A record we wrote but cannot read back will never publish;
                // no number of retries changes that.
                let message = format!("undecodable envelope: {e}");
                error!(
                    record_id = %record.id,
                    topic = %record.topic,
                    error = %message,
                    "outbox record failed terminally",
                );
                self.outbox
                    .mark_failed(record.id, record.attempts, &message)
                    .await?;
                return Ok(false);
            }
        };

        let publish = self
            .transport
            .publish(&record.topic, &record.partition_key, &envelope);
        match tokio::time::timeout(self.config.send_timeout, publish).await {
            Ok(Ok(())) => {
                self.outbox.mark_sent(record.id, Utc::now()).await?;
                debug!(record_id = %record.id, topic = %record.topic, "outbox record published");
                Ok(true)
            }
            Ok(Err(e)) => {
                self.handle_failure(record, &e.to_string()).await?;
                Ok(false)
            }
            Err(_) => {
                self.handle_failure(record, "publish timed out").await?;
                Ok(false)
            }
        }
    }

    /// Linear backoff: the n-th failure schedules the next attempt
    /// `n * base_retry_secs` out. Past the attempt budget the record goes
    /// terminal and is kept for audit.
    async fn handle_failure(
        &self,
        record: &OutboxRecord,
        error: &str,
    ) -> Result<(), ExportServiceError> {
        let attempts = record.attempts + 1;
        if attempts >= self.config.max_attempts {
            error!(
                record_id = %record.id,
                topic = %record.topic,
                attempts,
                error,
                "outbox record failed terminally",
            );
            self.outbox.mark_failed(record.id, attempts, error).await
        } else {
            let next_attempt_at =
                Utc::now() + chrono::Duration::seconds(attempts as i64 * self.config.base_retry_secs);
            warn!(
                record_id = %record.id,
                topic = %record.topic,
                attempts,
                error,
                "outbox publish failed, retrying",
            );
            self.outbox
                .mark_retry(record.id, attempts, next_attempt_at, error)
                .await
        }
    }
}
