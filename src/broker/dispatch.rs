//! Dispatch engine
//!
//! The single task that moves messages from the queue to consumers. It
//! sleeps until woken, then runs dispatch passes until a pass makes no
//! progress. Readers wake it whenever a message is enqueued or a consumer
//! completes its handshake. The wake is a `Notify` permit, so a wake that
//! lands between the last pass and the wait is not lost.
//!
//! Two policies, chosen once per broker:
//! - `Direct`: the front message goes to the next consumer in round-robin
//!   order. A failed send drops the message; it is never requeued.
//! - `Command`: the front message is parsed as a command and a copy goes to
//!   every consumer subscribed to that command name, each copy with its own
//!   correlation record. The message stays at the front until at least one
//!   consumer received it, or until it has failed `max_attempts` passes.
//!
//! The engine never holds more than one structure lock at a time. Anything
//! that changed between a check and the following operation is caught by
//! the next pass.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::broker::answers::{AnswerRecord, AnswerTable};
use crate::broker::consumers::ConsumerRegistry;
use crate::broker::message::Message;
use crate::broker::queue::MessageQueue;
use crate::broker::subscriptions::SubscriptionTable;
use crate::command::CommandRegistry;
use crate::endpoint::EndpointRef;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    #[default]
    Direct,
    Command,
}

/// Result of a single dispatch pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Queue empty or no consumers.
    Idle,
    /// The message was delivered to this many consumers and removed.
    Dispatched(usize),
    /// The message was removed without being delivered.
    Dropped,
    /// The message could not be delivered and stays at the front.
    Stalled,
}

impl Pass {
    pub fn made_progress(&self) -> bool {
        matches!(self, Pass::Dispatched(_) | Pass::Dropped)
    }
}

#[derive(Debug)]
pub struct DispatchEngine {
    mode: DispatchMode,
    queue: Arc<MessageQueue>,
    consumers: Arc<ConsumerRegistry>,
    answers: Arc<AnswerTable>,
    subscriptions: Arc<SubscriptionTable>,
    commands: Arc<CommandRegistry>,
    max_attempts: u32,
    wake: Notify,
}

impl DispatchEngine {
    /// Default number of failed fan-out passes before the head is dropped.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 16;

    pub fn new(
        mode: DispatchMode,
        queue: Arc<MessageQueue>,
        consumers: Arc<ConsumerRegistry>,
        answers: Arc<AnswerTable>,
        subscriptions: Arc<SubscriptionTable>,
        commands: Arc<CommandRegistry>,
    ) -> Self {
        Self {
            mode,
            queue,
            consumers,
            answers,
            subscriptions,
            commands,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            wake: Notify::new(),
        }
    }

    /// Drop an undeliverable head after `max_attempts` passes. `0` never drops.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Signal that there may be work to do.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Dispatch loop. Runs until the task is aborted.
    pub async fn run(self: Arc<Self>) {
        info!(mode = ?self.mode, "dispatch loop started");
        loop {
            self.drain();
            self.wake.notified().await;
        }
    }

    /// Run passes until one makes no progress. Returns the number of
    /// messages that left the queue.
    pub fn drain(&self) -> usize {
        let mut done = 0;
        while self.dispatch_once().made_progress() {
            done += 1;
        }
        done
    }

    pub fn dispatch_once(&self) -> Pass {
        if self.queue.is_empty() || self.consumers.is_empty() {
            return Pass::Idle;
        }
        match self.mode {
            DispatchMode::Direct => self.dispatch_direct(),
            DispatchMode::Command => self.dispatch_fanout(),
        }
    }

    fn dispatch_direct(&self) -> Pass {
        let Ok(consumer) = self.consumers.next() else {
            return Pass::Idle;
        };
        let Ok(message) = self.queue.dequeue() else {
            return Pass::Idle;
        };

        if self.deliver(&consumer, &message) {
            Pass::Dispatched(1)
        } else {
            warn!(
                producer = %message.producer,
                id = message.producer_id,
                "message dropped after failed send"
            );
            Pass::Dropped
        }
    }

    fn dispatch_fanout(&self) -> Pass {
        let Ok(message) = self.queue.peek() else {
            return Pass::Idle;
        };

        let command = match self.commands.parse(&message.payload) {
            Ok(cmd) => cmd.name,
            Err(err) => {
                warn!(producer = %message.producer, id = message.producer_id, "{err}");
                return self.stall(&message);
            }
        };
        debug!(
            %command,
            producer = %message.producer,
            id = message.producer_id,
            len = message.payload.len(),
            "process queue message"
        );

        let mut delivered = 0;
        for consumer in self.consumers.list_all() {
            if !self.subscriptions.is_subscribed(consumer.address(), &command) {
                continue;
            }
            if self.deliver(&consumer, &message) {
                delivered += 1;
            }
        }

        if delivered == 0 {
            debug!(%command, "no subscribed consumer accepted the message");
            return self.stall(&message);
        }
        if self.queue.remove_front(message.seq).is_err() {
            warn!(seq = message.seq, "dispatched message already left the queue");
        }
        Pass::Dispatched(delivered)
    }

    /// Send one copy of `message` and record where its answer must go.
    fn deliver(&self, consumer: &EndpointRef, message: &Message) -> bool {
        let record = AnswerRecord::new(message.producer.clone(), message.producer_id);
        let sent = self.answers.send_and_record(consumer.address(), record, || {
            consumer.send(message.payload.clone())
        });
        match sent {
            Ok(local_id) => {
                debug!(
                    consumer = %consumer.address(),
                    local_id,
                    id = message.producer_id,
                    len = message.payload.len(),
                    queued_ms = message.age_ms(),
                    "sent to consumer"
                );
                true
            }
            Err(err) => {
                warn!(consumer = %consumer.address(), "can't send message to consumer: {err}");
                false
            }
        }
    }

    fn stall(&self, message: &Message) -> Pass {
        let Ok(attempts) = self.queue.record_attempt(message.seq) else {
            return Pass::Idle;
        };
        if self.max_attempts > 0
            && attempts >= self.max_attempts
            && self.queue.remove_front(message.seq).is_ok()
        {
            warn!(
                producer = %message.producer,
                id = message.producer_id,
                attempts,
                "undeliverable message dropped"
            );
            return Pass::Dropped;
        }
        Pass::Stalled
    }
}
