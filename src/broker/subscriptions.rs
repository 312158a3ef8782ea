//! Subscription table
//!
//! Maps a consumer address to the set of command names it wants fanned out
//! to it. Duplicate subscriptions are a no-op, and a consumer with no entry
//! is subscribed to nothing.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::endpoint::Address;

#[derive(Debug, Default)]
pub struct SubscriptionTable {
    subscribers: RwLock<HashMap<Address, HashSet<String>>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `command` to the consumer's set. Returns false if it was already there.
    pub fn subscribe(&self, consumer: &str, command: &str) -> bool {
        self.subscribers
            .write()
            .entry(consumer.to_string())
            .or_default()
            .insert(command.to_string())
    }

    /// Remove `command` from the consumer's set. Returns false if it was absent.
    pub fn unsubscribe(&self, consumer: &str, command: &str) -> bool {
        let mut subscribers = self.subscribers.write();
        let Some(commands) = subscribers.get_mut(consumer) else {
            return false;
        };
        let removed = commands.remove(command);
        if commands.is_empty() {
            subscribers.remove(consumer);
        }
        removed
    }

    pub fn is_subscribed(&self, consumer: &str, command: &str) -> bool {
        self.subscribers
            .read()
            .get(consumer)
            .is_some_and(|commands| commands.contains(command))
    }

    /// Forget every subscription of a consumer.
    pub fn drop_all(&self, consumer: &str) {
        self.subscribers.write().remove(consumer);
    }

    pub fn commands(&self, consumer: &str) -> Vec<String> {
        let mut commands: Vec<String> = self
            .subscribers
            .read()
            .get(consumer)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default();
        commands.sort();
        commands
    }

    /// Number of consumers with at least one subscription.
    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
