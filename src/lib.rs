//! # DispatchQ
//!
//! `dispatchq` is an in-memory request/answer message broker built with Rust.
//! Producers send requests to the broker, the broker queues them and hands
//! each one to a consumer (round-robin) or to every consumer subscribed to
//! the request's command (fan-out), and routes the consumers' answers back
//! to the producer that asked.
//!
//! ## Core Modules
//!
//! The library is structured into several modules, each with a distinct responsibility:
//!
//! - `broker`: The queue, the consumer registry, the answer and subscription tables, the dispatch engine and the reader state machine.
//! - `command`: Command-line style payload parsing and the command registry used by fan-out dispatch.
//! - `config`: Handles loading and managing configuration.
//! - `consumer`: The consumer role: handshake, subscriptions, answering.
//! - `endpoint`: The connection abstraction every transport implements.
//! - `producer`: The producer role: requests, answer matching and timeouts.
//! - `protocol`: The correlation packet and the handshake tokens.
//! - `transport`: In-process links and the WebSocket server/client.
//! - `utils`: Contains shared utilities, such as error handling and logging.

pub mod broker;
pub mod command;
pub mod config;
pub mod consumer;
pub mod endpoint;
pub mod producer;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use broker::{Broker, DispatchMode};
pub use consumer::{Consumer, Delivery};
pub use endpoint::{Endpoint, EndpointEvent, EndpointRef, Link};
pub use producer::{AnswerMode, Producer, ProducerOptions};
pub use protocol::Packet;
pub use utils::{Error, Result};
