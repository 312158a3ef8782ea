//! Message definitions for the broker
//!
//! `Message` is a producer request waiting in the queue. Notes on fields:
//! - `producer` / `producer_id`: where the answer has to be routed back to,
//!   the producer's address and the local id its transport gave the request
//! - `payload`: raw request bytes, forwarded untouched to consumers
//! - `received_at`: milliseconds since UNIX epoch, set on arrival
//! - `seq`: queue-assigned identity, used to remove the head only if it is
//!   still the message a dispatch pass looked at
//! - `attempts`: fan-out passes that failed to deliver this message

use bytes::Bytes;

use crate::endpoint::Address;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub producer: Address,
    pub producer_id: u32,
    pub payload: Bytes,
    pub received_at: i64,
    pub seq: u64,
    pub attempts: u32,
}

impl Message {
    pub fn new(producer: impl Into<Address>, producer_id: u32, payload: Bytes) -> Self {
        Self {
            producer: producer.into(),
            producer_id,
            payload,
            received_at: chrono::Utc::now().timestamp_millis(),
            seq: 0,
            attempts: 0,
        }
    }

    /// Milliseconds this message has spent waiting since it arrived.
    pub fn age_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis() - self.received_at
    }
}
