//! Broker engine
//!
//! `Broker` wires the queue, the consumer registry, the answer table, the
//! subscription table and the dispatch engine together, and implements the
//! reader state machine every inbound endpoint event goes through:
//! - the hello token registers the sender as a consumer and wakes dispatch
//! - data from a registered consumer is an answer packet, routed back to the
//!   producer it correlates to; in command mode an uncorrelated payload may
//!   instead be a `subscribe`/`unsubscribe` control message
//! - anything else is a producer request and goes to the queue
//! - a disconnect forgets the peer, its consumer entry and its subscriptions
//!
//! Errors never leave the reader: `handle_event` logs them and carries on.
//! `handle_data` returns them for callers that want to look.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broker::answers::{AnswerKey, AnswerRecord, AnswerTable};
use crate::broker::consumers::ConsumerRegistry;
use crate::broker::dispatch::{DispatchEngine, DispatchMode};
use crate::broker::message::Message;
use crate::broker::peers::PeerTable;
use crate::broker::queue::MessageQueue;
use crate::broker::subscriptions::SubscriptionTable;
use crate::command::{self, CommandRegistry, Control};
use crate::config::BrokerSettings;
use crate::endpoint::{Address, EndpointEvent, EndpointRef, Link};
use crate::protocol::{self, Packet};
use crate::utils::Result;

/// What the reader did with an inbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    ConsumerRegistered,
    AnswerForwarded { producer: Address, producer_id: u32 },
    Subscribed(String),
    Unsubscribed(String),
    Enqueued { seq: u64 },
    ApiHandshake,
}

/// Point-in-time counters, logged periodically by the binary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    pub queued: usize,
    pub consumers: usize,
    pub pending_answers: usize,
    pub subscribed_consumers: usize,
    pub peers: usize,
}

#[derive(Debug)]
pub struct Broker {
    mode: DispatchMode,
    queue: Arc<MessageQueue>,
    consumers: Arc<ConsumerRegistry>,
    answers: Arc<AnswerTable>,
    subscriptions: Arc<SubscriptionTable>,
    commands: Arc<CommandRegistry>,
    peers: PeerTable,
    dispatcher: Arc<DispatchEngine>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(DispatchMode::Direct)
    }
}

impl Broker {
    pub fn new(mode: DispatchMode) -> Self {
        Self::with_commands(
            mode,
            Arc::new(CommandRegistry::new()),
            DispatchEngine::DEFAULT_MAX_ATTEMPTS,
        )
    }

    /// Build a broker around an existing command registry. Only command mode
    /// consults it.
    pub fn with_commands(
        mode: DispatchMode,
        commands: Arc<CommandRegistry>,
        fanout_max_attempts: u32,
    ) -> Self {
        let queue = Arc::new(MessageQueue::new());
        let consumers = Arc::new(ConsumerRegistry::new());
        let answers = Arc::new(AnswerTable::new());
        let subscriptions = Arc::new(SubscriptionTable::new());
        let dispatcher = DispatchEngine::new(
            mode,
            queue.clone(),
            consumers.clone(),
            answers.clone(),
            subscriptions.clone(),
            commands.clone(),
        )
        .with_max_attempts(fanout_max_attempts);

        Self {
            mode,
            queue,
            consumers,
            answers,
            subscriptions,
            commands,
            peers: PeerTable::new(),
            dispatcher: Arc::new(dispatcher),
        }
    }

    pub fn from_settings(settings: &BrokerSettings) -> Self {
        let commands = CommandRegistry::with_names(settings.commands.iter().cloned());
        Self::with_commands(
            settings.mode,
            Arc::new(commands),
            settings.fanout_max_attempts,
        )
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    pub fn consumers(&self) -> &ConsumerRegistry {
        &self.consumers
    }

    pub fn answers(&self) -> &AnswerTable {
        &self.answers
    }

    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.subscriptions
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    pub fn dispatcher(&self) -> &DispatchEngine {
        &self.dispatcher
    }

    /// Spawn the dispatch loop. Abort the handle to stop it.
    pub fn start(&self) -> JoinHandle<()> {
        tokio::spawn(self.dispatcher.clone().run())
    }

    /// Spawn a reader task feeding every event of `link` to the broker.
    pub fn attach(self: &Arc<Self>, link: Link) -> JoinHandle<()> {
        let broker = self.clone();
        let Link {
            endpoint,
            mut events,
        } = link;

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let closed = event == EndpointEvent::Disconnected;
                broker.handle_event(&endpoint, event);
                if closed {
                    return;
                }
            }
            broker.disconnect(endpoint.address());
        })
    }

    pub fn handle_event(&self, endpoint: &EndpointRef, event: EndpointEvent) {
        match event {
            EndpointEvent::Connected => {
                debug!(peer = %endpoint.address(), "peer connected");
                self.peers.insert(endpoint.clone());
            }
            EndpointEvent::Disconnected => self.disconnect(endpoint.address()),
            EndpointEvent::DataReceived { id, data } => {
                match self.handle_data(endpoint, id, data) {
                    Ok(_) => {}
                    Err(err) if err.is_not_found() => {
                        debug!(peer = %endpoint.address(), "{err}, dropped");
                    }
                    Err(err) => warn!(peer = %endpoint.address(), "{err}"),
                }
            }
        }
    }

    /// Run one inbound payload through the reader state machine.
    pub fn handle_data(&self, endpoint: &EndpointRef, id: u32, data: Bytes) -> Result<Inbound> {
        let address = endpoint.address();
        if !self.peers.contains(address) {
            self.peers.insert(endpoint.clone());
        }

        if protocol::is_consumer_hello(&data) {
            return self.register_consumer(endpoint);
        }

        if self.consumers.exists(address) {
            return self.handle_consumer_data(address, &data);
        }

        self.enqueue(address, id, data)
    }

    fn register_consumer(&self, endpoint: &EndpointRef) -> Result<Inbound> {
        self.consumers.add(endpoint.clone())?;
        info!(consumer = %endpoint.address(), "consumer added");

        if let Err(err) = endpoint.send(Bytes::from_static(protocol::CONSUMER_HELLO_ACK)) {
            warn!(consumer = %endpoint.address(), "can't send hello ack: {err}");
        }
        self.dispatcher.wake();
        Ok(Inbound::ConsumerRegistered)
    }

    fn handle_consumer_data(&self, consumer: &str, data: &Bytes) -> Result<Inbound> {
        let packet = match Packet::decode(data) {
            Ok(packet) => packet,
            Err(_) if Packet::is_api_handshake(data) => {
                debug!(%consumer, "api protocol handshake");
                return Ok(Inbound::ApiHandshake);
            }
            Err(err) => return Err(err),
        };

        match self
            .answers
            .take_and_remove(&AnswerKey::new(consumer, packet.id))
        {
            Ok(record) => self.forward_answer(record, packet.payload),
            Err(err) => {
                if self.mode == DispatchMode::Command {
                    if let Some(control) = command::parse_control(data) {
                        return Ok(self.apply_control(consumer, control));
                    }
                }
                Err(err)
            }
        }
    }

    fn forward_answer(&self, record: AnswerRecord, payload: Bytes) -> Result<Inbound> {
        let producer = self.peers.get(&record.producer)?;
        let len = payload.len();
        producer.send(Packet::new(record.producer_id, payload).encode())?;
        debug!(
            producer = %record.producer,
            id = record.producer_id,
            len,
            "answer sent to producer"
        );
        Ok(Inbound::AnswerForwarded {
            producer: record.producer,
            producer_id: record.producer_id,
        })
    }

    fn apply_control(&self, consumer: &str, control: Control) -> Inbound {
        match control {
            Control::Subscribe(command) => {
                self.subscriptions.subscribe(consumer, &command);
                info!(%consumer, %command, "subscribe command");
                // a stalled head may be deliverable now
                self.dispatcher.wake();
                Inbound::Subscribed(command)
            }
            Control::Unsubscribe(command) => {
                self.subscriptions.unsubscribe(consumer, &command);
                info!(%consumer, %command, "unsubscribe command");
                Inbound::Unsubscribed(command)
            }
        }
    }

    fn enqueue(&self, producer: &str, id: u32, data: Bytes) -> Result<Inbound> {
        if self.mode == DispatchMode::Command {
            self.commands.parse(&data)?;
        }

        let len = data.len();
        let seq = self.queue.enqueue(Message::new(producer, id, data));
        debug!(
            %producer,
            id,
            len,
            queue_len = self.queue.len(),
            "message added to queue"
        );
        self.dispatcher.wake();
        Ok(Inbound::Enqueued { seq })
    }

    /// Forget everything known about a peer. Safe to call more than once.
    pub fn disconnect(&self, address: &str) {
        if self.consumers.remove(address).is_ok() {
            info!(consumer = %address, "consumer removed");
        }
        let commands = self.subscriptions.commands(address);
        if !commands.is_empty() {
            debug!(consumer = %address, ?commands, "subscriptions dropped");
        }
        self.subscriptions.drop_all(address);
        if self.peers.remove(address).is_some() {
            debug!(peer = %address, "peer disconnected");
        }
    }

    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            queued: self.queue.len(),
            consumers: self.consumers.len(),
            pending_answers: self.answers.len(),
            subscribed_consumers: self.subscriptions.len(),
            peers: self.peers.len(),
        }
    }
}
