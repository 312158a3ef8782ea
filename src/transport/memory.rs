//! In-process transport
//!
//! `link(a, b)` connects two named peers with a pair of unbounded tokio
//! channels. Each side gets a `Link` whose endpoint addresses the other
//! side and whose event stream carries what the other side sent. Both sides
//! see `Connected` first. Closing either endpoint delivers `Disconnected` to
//! both and makes every later send fail.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::endpoint::{Address, Endpoint, EndpointEvent, Link};
use crate::utils::{Error, Result};

#[derive(Debug)]
pub struct MemoryEndpoint {
    /// Address of the remote peer.
    address: Address,
    /// Event stream of the remote peer.
    outbound: UnboundedSender<EndpointEvent>,
    /// Our own event stream, used to report the close locally.
    inbound: UnboundedSender<EndpointEvent>,
    closed: Arc<AtomicBool>,
    next_id: AtomicU32,
}

impl Endpoint for MemoryEndpoint {
    fn address(&self) -> &str {
        &self.address
    }

    fn send(&self, data: Bytes) -> Result<u32> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::SendFailure(format!("link to {} closed", self.address)));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.outbound
            .send(EndpointEvent::DataReceived { id, data })
            .map_err(Error::send)?;
        Ok(id)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.outbound.send(EndpointEvent::Disconnected);
            let _ = self.inbound.send(EndpointEvent::Disconnected);
        }
    }
}

/// Connect `a` and `b`. Returns `a`'s side first.
pub fn link(a: &str, b: &str) -> (Link, Link) {
    let (to_a, events_a) = mpsc::unbounded_channel();
    let (to_b, events_b) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));

    let _ = to_a.send(EndpointEvent::Connected);
    let _ = to_b.send(EndpointEvent::Connected);

    let a_side = MemoryEndpoint {
        address: b.to_string(),
        outbound: to_b.clone(),
        inbound: to_a.clone(),
        closed: closed.clone(),
        next_id: AtomicU32::new(1),
    };
    let b_side = MemoryEndpoint {
        address: a.to_string(),
        outbound: to_a,
        inbound: to_b,
        closed,
        next_id: AtomicU32::new(1),
    };

    (
        Link {
            endpoint: Arc::new(a_side),
            events: events_a,
        },
        Link {
            endpoint: Arc::new(b_side),
            events: events_b,
        },
    )
}
