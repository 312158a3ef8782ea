//! The `consumer` module implements the consumer role.
//!
//! A consumer introduces itself to the broker with the hello token as soon
//! as its link connects. Once the broker acknowledges, it subscribes to its
//! configured commands (only meaningful for a broker in command mode). Once
//! registered, the ack token is an ordinary payload. Every other message
//! from the broker is passed to the handler, and a non-empty result goes
//! back as an answer packet carrying the id the message arrived with.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::command;
use crate::endpoint::{EndpointEvent, EndpointRef, Link};
use crate::protocol::{self, Packet};
use crate::utils::Result;

/// A message handed to the consumer by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: u32,
    pub payload: Bytes,
}

pub type HandlerResult = std::result::Result<Bytes, Box<dyn StdError + Send + Sync>>;

pub type Handler = Arc<dyn Fn(&Delivery) -> HandlerResult + Send + Sync>;

pub struct Consumer {
    broker: EndpointRef,
    handler: Handler,
    commands: Vec<String>,
    registered: AtomicBool,
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("broker", &self.broker.address())
            .field("commands", &self.commands)
            .field("registered", &self.is_registered())
            .finish()
    }
}

impl Consumer {
    pub fn new<F>(broker: EndpointRef, handler: F) -> Self
    where
        F: Fn(&Delivery) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            broker,
            handler: Arc::new(handler),
            commands: Vec::new(),
            registered: AtomicBool::new(false),
        }
    }

    /// Commands to subscribe to once the broker acknowledges the hello.
    pub fn subscribe_to<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands.extend(commands.into_iter().map(Into::into));
        self
    }

    /// Spawn the task that drives this consumer from `events`.
    pub fn spawn(self, events: UnboundedReceiver<EndpointEvent>) -> (Arc<Self>, JoinHandle<()>) {
        let consumer = Arc::new(self);
        let handle = tokio::spawn(consumer.clone().run(events));
        (consumer, handle)
    }

    /// Convenience for `Consumer::new(link.endpoint, handler).spawn(link.events)`.
    pub fn start<F>(link: Link, commands: Vec<String>, handler: F) -> (Arc<Self>, JoinHandle<()>)
    where
        F: Fn(&Delivery) -> HandlerResult + Send + Sync + 'static,
    {
        Self::new(link.endpoint, handler)
            .subscribe_to(commands)
            .spawn(link.events)
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    pub fn subscribe(&self, command: &str) -> Result<u32> {
        self.broker
            .send(Bytes::from(command::subscribe_message(command)))
    }

    pub fn unsubscribe(&self, command: &str) -> Result<u32> {
        self.broker
            .send(Bytes::from(command::unsubscribe_message(command)))
    }

    pub fn handle_event(&self, event: EndpointEvent) {
        match event {
            EndpointEvent::Connected => {
                info!(broker = %self.broker.address(), "connected");
                if let Err(e) = self.broker.send(Bytes::from_static(protocol::CONSUMER_HELLO)) {
                    warn!("can't send hello: {e}");
                }
            }
            EndpointEvent::Disconnected => {
                self.registered.store(false, Ordering::Release);
                info!(broker = %self.broker.address(), "disconnected");
            }
            EndpointEvent::DataReceived { id, data } => {
                if !self.is_registered() && protocol::is_consumer_hello_ack(&data) {
                    self.on_registered();
                    return;
                }
                self.process(Delivery { id, payload: data });
            }
        }
    }

    fn on_registered(&self) {
        self.registered.store(true, Ordering::Release);
        info!(broker = %self.broker.address(), "connected to broker");
        for command in &self.commands {
            match self.subscribe(command) {
                Ok(_) => debug!(%command, "subscribed"),
                Err(e) => warn!(%command, "can't subscribe: {e}"),
            }
        }
    }

    fn process(&self, delivery: Delivery) {
        let answer = match (self.handler)(&delivery) {
            Ok(answer) => answer,
            Err(e) => {
                warn!(id = delivery.id, "process message error: {e}");
                return;
            }
        };
        if answer.is_empty() {
            return;
        }

        let len = answer.len();
        if let Err(e) = self.broker.send(Packet::new(delivery.id, answer).encode()) {
            warn!(id = delivery.id, len, "send answer error: {e}");
        }
    }

    pub async fn run(self: Arc<Self>, mut events: UnboundedReceiver<EndpointEvent>) {
        while let Some(event) = events.recv().await {
            let closed = event == EndpointEvent::Disconnected;
            self.handle_event(event);
            if closed {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests;
