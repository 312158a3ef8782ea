//! Consumer registry
//!
//! Ordered set of consumers that completed the hello handshake, keyed by
//! endpoint address. `next()` hands consumers out round-robin in
//! registration order.
//!
//! The cursor is the position of the consumer `next()` returns next.
//! Removing an entry before the cursor shifts it back by one, so a removal
//! never makes `next()` skip a live consumer or hand out a removed one.

use std::collections::HashSet;

use parking_lot::RwLock;

use crate::endpoint::{Address, EndpointRef};
use crate::utils::{Error, Result};

#[derive(Debug, Default)]
pub struct ConsumerRegistry {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<EndpointRef>,
    index: HashSet<Address>,
    cursor: usize,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a consumer. A second add for the same address is rejected and
    /// the original registration is kept.
    pub fn add(&self, endpoint: EndpointRef) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.index.insert(endpoint.address().to_string()) {
            return Err(Error::ConsumerAlreadyExists);
        }
        inner.entries.push(endpoint);
        Ok(())
    }

    pub fn remove(&self, address: &str) -> Result<EndpointRef> {
        let mut inner = self.inner.write();
        if !inner.index.remove(address) {
            return Err(Error::ConsumerNotFound);
        }
        let pos = inner
            .entries
            .iter()
            .position(|e| e.address() == address)
            .ok_or(Error::ConsumerNotFound)?;
        let removed = inner.entries.remove(pos);
        if pos < inner.cursor {
            inner.cursor -= 1;
        }
        Ok(removed)
    }

    pub fn exists(&self, address: &str) -> bool {
        self.inner.read().index.contains(address)
    }

    /// Next consumer in round-robin order, wrapping to the front.
    pub fn next(&self) -> Result<EndpointRef> {
        let mut inner = self.inner.write();
        if inner.entries.is_empty() {
            return Err(Error::ConsumerNotFound);
        }
        if inner.cursor >= inner.entries.len() {
            inner.cursor = 0;
        }
        let endpoint = inner.entries[inner.cursor].clone();
        inner.cursor += 1;
        Ok(endpoint)
    }

    /// Snapshot of every registered consumer, in registration order.
    pub fn list_all(&self) -> Vec<EndpointRef> {
        self.inner.read().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
