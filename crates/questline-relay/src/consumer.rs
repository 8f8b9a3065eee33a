use std::time::Duration;

use tracing::{error, info, warn};

use crate::envelope::{Envelope, dlq_topic};
use crate::error::RelayError;
use crate::transport::{Delivery, Subscription, Transport};

/// Handler outcome classification, inspected by the retry wrapper.
///
/// `Retryable` covers transient infrastructure failures; `Terminal` covers
/// rejections retrying cannot change (validation, not-found, authorization).
/// Terminal failures go straight to the dead-letter topic.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("retryable: {0}")]
    Retryable(#[source] anyhow::Error),
    #[error("terminal: {0}")]
    Terminal(#[source] anyhow::Error),
}

impl HandlerError {
    pub fn retryable(err: impl Into<anyhow::Error>) -> Self {
        Self::Retryable(err.into())
    }

    pub fn terminal(err: impl Into<anyhow::Error>) -> Self {
        Self::Terminal(err.into())
    }
}

/// A business-event handler invoked once per delivery.
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError>;
}

/// Exponential backoff with a capped maximum interval and bounded retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Drives one subscription: invokes the handler per delivery, retries
/// retryable failures with backoff, dead-letters poison messages, and only
/// then acknowledges. Acknowledgment is manual — a crash before ack leaves
/// the delivery to the transport's redelivery.
pub struct ConsumerLoop<S, T, H> {
    topic: String,
    subscription: S,
    transport: T,
    handler: H,
    policy: RetryPolicy,
}

impl<S, T, H> ConsumerLoop<S, T, H>
where
    S: Subscription,
    T: Transport,
    H: EventHandler,
{
    pub fn new(
        topic: impl Into<String>,
        subscription: S,
        transport: T,
        handler: H,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            topic: topic.into(),
            subscription,
            transport,
            handler,
            policy,
        }
    }

    /// Consume until the subscription closes. Per-delivery failures are
    /// logged and do not stop the loop.
    pub async fn run(mut self) {
        info!(topic = %self.topic, "consumer loop started");
        loop {
            match self.poll_once().await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    warn!(topic = %self.topic, error = %e, "consumer poll failed");
                }
            }
        }
        info!(topic = %self.topic, "consumer loop stopped");
    }

    /// Process a single delivery. Returns `Ok(false)` when the subscription
    /// closed.
    pub async fn poll_once(&mut self) -> Result<bool, RelayError> {
        let Some(delivery) = self.subscription.next().await? else {
            return Ok(false);
        };
        self.process(delivery).await?;
        Ok(true)
    }

    async fn process(&mut self, delivery: Delivery) -> Result<(), RelayError> {
        let envelope = &delivery.envelope;
        let mut attempt = 0u32;
        loop {
            match self.handler.handle(envelope).await {
                Ok(()) => break,
                Err(HandlerError::Terminal(e)) => {
                    error!(
                        topic = %self.topic,
                        event_type = %envelope.event_type,
                        event_id = ?envelope.event_id,
                        error = %e,
                        "terminal handler failure, dead-lettering",
                    );
                    self.dead_letter(envelope).await?;
                    break;
                }
                Err(HandlerError::Retryable(e)) if attempt < self.policy.max_retries => {
                    attempt += 1;
                    let delay = self.policy.delay(attempt);
                    warn!(
                        topic = %self.topic,
                        event_id = ?envelope.event_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retryable handler failure",
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(HandlerError::Retryable(e)) => {
                    error!(
                        topic = %self.topic,
                        event_id = ?envelope.event_id,
                        attempts = attempt,
                        error = %e,
                        "retry budget exhausted, dead-lettering",
                    );
                    self.dead_letter(envelope).await?;
                    break;
                }
            }
        }
        // Ack only after success or a confirmed dead-letter publish; a failed
        // dead-letter leaves the delivery unacked for transport redelivery.
        self.subscription.ack(&delivery.token).await
    }

    async fn dead_letter(&self, envelope: &Envelope) -> Result<(), RelayError> {
        let topic = dlq_topic(&self.topic);
        self.transport
            .publish(&topic, &envelope.partition_key, envelope)
            .await
    }
}
