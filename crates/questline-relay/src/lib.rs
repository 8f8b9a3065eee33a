//! Reliable event relay primitives shared by Questline services.
//!
//! The transport is an external at-least-once pub/sub channel; ordering is
//! guaranteed only among records sharing a partition key. Everything here is
//! built around that contract: envelopes carry a stable event id assigned at
//! creation, consumers deduplicate on that id against a durable ledger, and
//! the consumer loop routes poison messages to `<topic>.dlq`.

#![allow(async_fn_in_trait)]

pub mod consumer;
pub mod envelope;
pub mod error;
pub mod redis;
pub mod transport;

pub use consumer::{ConsumerLoop, EventHandler, HandlerError, RetryPolicy};
pub use envelope::{Envelope, dlq_topic};
pub use error::RelayError;
pub use redis::{RedisSubscription, RedisTransport};
pub use transport::{AckToken, Delivery, MemorySubscription, MemoryTransport, Subscription, Transport};
