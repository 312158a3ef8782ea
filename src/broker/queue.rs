//! Pending message queue
//!
//! FIFO of producer messages waiting for a consumer. Readers push to the
//! back from many tasks; only the dispatch loop looks at or removes the
//! front. `peek` followed by `remove_front` lets the fan-out policy try a
//! delivery before committing to removal.

use std::collections::VecDeque;

use parking_lot::RwLock;

use crate::broker::message::Message;
use crate::utils::{Error, Result};

#[derive(Debug, Default)]
pub struct MessageQueue {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    messages: VecDeque<Message>,
    next_seq: u64,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to the back and return the sequence number it was given.
    pub fn enqueue(&self, mut message: Message) -> u64 {
        let mut inner = self.inner.write();
        inner.next_seq += 1;
        message.seq = inner.next_seq;
        inner.messages.push_back(message);
        inner.next_seq
    }

    /// Clone of the front message, without removing it.
    pub fn peek(&self) -> Result<Message> {
        self.inner
            .read()
            .messages
            .front()
            .cloned()
            .ok_or(Error::MessageNotFound)
    }

    pub fn dequeue(&self) -> Result<Message> {
        self.inner
            .write()
            .messages
            .pop_front()
            .ok_or(Error::MessageNotFound)
    }

    /// Remove the front message if it is still the one with sequence `seq`.
    pub fn remove_front(&self, seq: u64) -> Result<Message> {
        let mut inner = self.inner.write();
        match inner.messages.front() {
            Some(front) if front.seq == seq => {
                inner.messages.pop_front().ok_or(Error::MessageNotFound)
            }
            _ => Err(Error::MessageNotFound),
        }
    }

    /// Count one more failed delivery attempt on the front message `seq`.
    pub fn record_attempt(&self, seq: u64) -> Result<u32> {
        let mut inner = self.inner.write();
        match inner.messages.front_mut() {
            Some(front) if front.seq == seq => {
                front.attempts += 1;
                Ok(front.attempts)
            }
            _ => Err(Error::MessageNotFound),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
