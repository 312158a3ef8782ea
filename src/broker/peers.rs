//! Connected peers by address, so answers can be routed to a producer that
//! is known only by the address stored in the answer table.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::endpoint::{Address, EndpointRef};
use crate::utils::{Error, Result};

#[derive(Debug, Default)]
pub struct PeerTable {
    peers: RwLock<HashMap<Address, EndpointRef>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, endpoint: EndpointRef) {
        self.peers
            .write()
            .insert(endpoint.address().to_string(), endpoint);
    }

    pub fn contains(&self, address: &str) -> bool {
        self.peers.read().contains_key(address)
    }

    pub fn remove(&self, address: &str) -> Option<EndpointRef> {
        self.peers.write().remove(address)
    }

    pub fn get(&self, address: &str) -> Result<EndpointRef> {
        self.peers
            .read()
            .get(address)
            .cloned()
            .ok_or_else(|| Error::PeerNotFound(address.to_string()))
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
