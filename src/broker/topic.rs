//! Topic state
//!
//! A `Topic` holds the backlog of published-but-not-yet-fetched payloads and
//! the set of connections currently subscribed to it. Subscriptions are a
//! `HashSet`, so duplicate subscriptions are a no-op.
//!
//! Concurrency note: callers must synchronize access to `Topic` (the broker
//! lock) when modifying it.

use std::collections::{HashSet, VecDeque};

use serde_json::Value;

use crate::broker::connection::ConnectionId;

#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub backlog: VecDeque<Value>,
    pub subscribers: HashSet<ConnectionId>,
}

impl Topic {
    /// Create a new, empty topic with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            backlog: VecDeque::new(),
            subscribers: HashSet::new(),
        }
    }

    /// Append a payload to the back of the backlog.
    pub fn push(&mut self, payload: Value) {
        self.backlog.push_back(payload);
    }

    /// Remove and return the oldest payload.
    pub fn pop(&mut self) -> Option<Value> {
        self.backlog.pop_front()
    }

    /// Copy of the backlog, oldest first. The backlog itself is left untouched.
    pub fn snapshot(&self) -> Vec<Value> {
        self.backlog.iter().cloned().collect()
    }

    /// Add a subscriber to the topic. Duplicate adds are ignored.
    pub fn subscribe(&mut self, id: ConnectionId) {
        self.subscribers.insert(id);
    }

    /// Remove a subscriber from the topic.
    pub fn unsubscribe(&mut self, id: &ConnectionId) -> bool {
        self.subscribers.remove(id)
    }
}
