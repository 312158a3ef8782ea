//! Answer correlation table
//!
//! Every copy of a message the broker forwards is recorded under the
//! consumer's address and the local id that send produced. When the
//! consumer replies with that id, the record tells the broker which producer
//! request the reply belongs to. A record is taken at most once.
//!
//! `send_and_record` holds the table's write lock across the send, so a
//! reply that comes back before the send returns still finds its record.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::endpoint::Address;
use crate::utils::{Error, Result};

/// Consumer side of a correlation: who got the message and under which id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnswerKey {
    pub consumer: Address,
    pub consumer_id: u32,
}

/// Producer side of a correlation: where the answer goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerRecord {
    pub producer: Address,
    pub producer_id: u32,
}

impl AnswerKey {
    pub fn new(consumer: impl Into<Address>, consumer_id: u32) -> Self {
        Self {
            consumer: consumer.into(),
            consumer_id,
        }
    }
}

impl AnswerRecord {
    pub fn new(producer: impl Into<Address>, producer_id: u32) -> Self {
        Self {
            producer: producer.into(),
            producer_id,
        }
    }
}

#[derive(Debug, Default)]
pub struct AnswerTable {
    records: RwLock<HashMap<AnswerKey, AnswerRecord>>,
}

impl AnswerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a correlation. A reused key silently replaces the old record.
    pub fn record(&self, key: AnswerKey, value: AnswerRecord) {
        self.records.write().insert(key, value);
    }

    /// Run `send`, and record `value` under `consumer` and the id it returns.
    /// Nothing is recorded when the send fails.
    pub fn send_and_record<F>(&self, consumer: &str, value: AnswerRecord, send: F) -> Result<u32>
    where
        F: FnOnce() -> Result<u32>,
    {
        let mut records = self.records.write();
        let local_id = send()?;
        records.insert(AnswerKey::new(consumer, local_id), value);
        Ok(local_id)
    }

    pub fn take_and_remove(&self, key: &AnswerKey) -> Result<AnswerRecord> {
        self.records.write().remove(key).ok_or(Error::AnswerNotFound)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
