//! Endpoint abstraction
//!
//! An `Endpoint` is one side of a connection to a peer as seen by the local
//! process: it has a stable address naming the peer and can send it a
//! datagram, returning the local message id the transport assigned. Inbound
//! traffic arrives as `EndpointEvent`s, in delivery order, on a channel
//! owned by whoever serves the link.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::utils::Result;

pub type Address = String;

pub trait Endpoint: Send + Sync + fmt::Debug {
    /// Stable address of the remote peer. Used as registry and map key.
    fn address(&self) -> &str;

    /// Send `data` to the peer and return the local message id it was given.
    fn send(&self, data: Bytes) -> Result<u32>;

    /// Close the connection. Later sends fail.
    fn close(&self);
}

pub type EndpointRef = Arc<dyn Endpoint>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointEvent {
    Connected,
    Disconnected,
    /// `id` is the local message id the sender's transport assigned.
    DataReceived { id: u32, data: Bytes },
}

/// A connected endpoint together with the stream of events coming from it.
#[derive(Debug)]
pub struct Link {
    pub endpoint: EndpointRef,
    pub events: UnboundedReceiver<EndpointEvent>,
}

impl Link {
    pub fn address(&self) -> &str {
        self.endpoint.address()
    }
}
