//! The `broker` module contains the broker side of the system: the shared
//! registries, the dispatch engine and the `Broker` that ties them to
//! inbound endpoint events.

pub mod answers;
pub mod consumers;
pub mod dispatch;
pub mod engine;
pub mod message;
pub mod peers;
pub mod queue;
pub mod subscriptions;

pub use dispatch::{DispatchEngine, DispatchMode, Pass};
pub use engine::{Broker, BrokerStats, Inbound};

#[cfg(test)]
mod tests;
