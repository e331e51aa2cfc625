//! Broker engine
//!
//! This module contains the in-memory topic store responsible for:
//! - creating topics the first time anything references them
//! - keeping each topic's FIFO backlog of published payloads
//! - tracking subscriber sets, and the reverse index on every connection
//! - fanning a published payload out to the current subscribers
//!
//! Concurrency and usage notes:
//! - The API here is synchronous and designed to be held behind a single
//!   lock (`SharedBroker`) by the transport layer. A whole request (store
//!   mutation, reply, replay or fan-out) runs under one lock acquisition, so
//!   requests from different connections never interleave mid-step.
//! - Outbound frames are only queued on per-connection channels; nothing in
//!   here awaits, so the lock is never held across network I/O.
//! - A subscriber with `outbound_limit` pushes still unwritten is evicted on
//!   the next fan-out instead of growing its queue without bound.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::broker::connection::{Connection, ConnectionId};
use crate::broker::message::Push;
use crate::broker::topic::Topic;
use crate::utils::error::BrokerError;

pub type SharedBroker = Arc<Mutex<Broker>>;

/// Lock the shared broker, ignoring poisoning: the store stays usable after
/// a session panics.
pub fn lock(broker: &SharedBroker) -> MutexGuard<'_, Broker> {
    broker.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Frames a subscriber may have queued before a fan-out evicts it.
pub const DEFAULT_OUTBOUND_LIMIT: usize = 1024;

#[derive(Debug)]
pub struct Broker {
    pub topics: HashMap<String, Topic>,
    pub connections: HashMap<ConnectionId, Connection>,
    pub outbound_limit: usize,
}

impl Default for Broker {
    fn default() -> Self {
        Self {
            topics: HashMap::new(),
            connections: HashMap::new(),
            outbound_limit: DEFAULT_OUTBOUND_LIMIT,
        }
    }
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outbound_limit(mut self, limit: usize) -> Self {
        self.outbound_limit = limit.max(1);
        self
    }

    /// Wrap a fresh broker for sharing between sessions.
    pub fn shared() -> SharedBroker {
        Self::new().into_shared()
    }

    pub fn into_shared(self) -> SharedBroker {
        Arc::new(Mutex::new(self))
    }

    pub fn register_connection(&mut self, connection: Connection) -> ConnectionId {
        let id = connection.id.clone();
        self.connections.insert(id.clone(), connection);
        id
    }

    /// The explicit creation step: topics spring into existence the first
    /// time any operation names them and are never removed.
    fn ensure_topic(&mut self, name: &str) -> &mut Topic {
        self.topics.entry(name.to_string()).or_insert_with(|| {
            debug!("Creating topic '{name}'");
            Topic::new(name)
        })
    }

    /// Append `payload` to the topic's backlog. Fan-out is a separate step.
    pub fn publish(&mut self, topic: &str, payload: Value) {
        self.ensure_topic(topic).push(payload);
    }

    /// Subscribe a registered connection and return a copy of the backlog,
    /// oldest first, for replay.
    pub fn subscribe(
        &mut self,
        topic: &str,
        id: &ConnectionId,
    ) -> Result<Vec<Value>, BrokerError> {
        let Some(connection) = self.connections.get_mut(id) else {
            return Err(BrokerError::UnknownConnection(id.clone()));
        };
        connection.topics.insert(topic.to_string());

        let topic = self.ensure_topic(topic);
        topic.subscribe(id.clone());
        Ok(topic.snapshot())
    }

    /// Remove a subscription. Removing a non-member is a no-op.
    pub fn unsubscribe(&mut self, topic: &str, id: &ConnectionId) {
        if let Some(connection) = self.connections.get_mut(id) {
            connection.topics.remove(topic);
        }
        self.ensure_topic(topic).unsubscribe(id);
    }

    /// Pop the oldest backlog entry. `None` means the backlog is empty.
    pub fn fetch(&mut self, topic: &str) -> Option<Value> {
        self.ensure_topic(topic).pop()
    }

    /// Forget a connection and every subscription it holds. Dropping the
    /// `Connection` also drops its outbound sender, which lets the writer task
    /// flush what is queued and release the socket.
    ///
    /// Returns `false` if the connection was already gone.
    pub fn drop_connection(&mut self, id: &ConnectionId) -> bool {
        let Some(connection) = self.connections.remove(id) else {
            return false;
        };

        for topic in &connection.topics {
            if let Some(t) = self.topics.get_mut(topic) {
                t.unsubscribe(id);
            }
        }

        match connection.peer {
            Some(peer) => debug!(
                "Dropped connection {id} from {peer} ({} subscriptions)",
                connection.topics.len()
            ),
            None => debug!(
                "Dropped connection {id} ({} subscriptions)",
                connection.topics.len()
            ),
        }
        true
    }

    /// Queue a frame for a single connection.
    pub fn deliver<T: Serialize>(&self, id: &ConnectionId, frame: &T) -> Result<(), BrokerError> {
        self.connections
            .get(id)
            .ok_or_else(|| BrokerError::UnknownConnection(id.clone()))?
            .send(frame)
    }

    /// Push `payload` to every current subscriber of `topic`.
    ///
    /// A subscriber whose outbound path is gone, or that already has
    /// `outbound_limit` frames it has not read, is torn down on the spot; the
    /// remaining subscribers still get the message. Returns how many
    /// subscribers the push was queued for.
    pub fn fan_out(&mut self, topic: &str, payload: &Value) -> usize {
        let Some(entry) = self.topics.get(topic) else {
            return 0;
        };

        let line = match serde_json::to_string(&Push::new(topic, payload.clone())) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize push for '{topic}': {e}");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut dead = Vec::new();

        for sub_id in &entry.subscribers {
            match self.connections.get(sub_id) {
                Some(connection) => {
                    match connection.push_line(line.clone(), self.outbound_limit) {
                        Ok(()) => delivered += 1,
                        Err(e) => {
                            warn!("Failed to push to {sub_id}: {e}");
                            // releases a writer blocked on a peer that stopped reading
                            connection.cancel();
                            dead.push(sub_id.clone());
                        }
                    }
                }
                None => {
                    warn!("No connection registered with id: {sub_id}");
                    dead.push(sub_id.clone());
                }
            }
        }

        for sub_id in dead {
            if !self.drop_connection(&sub_id) {
                if let Some(t) = self.topics.get_mut(topic) {
                    t.unsubscribe(&sub_id);
                }
            }
        }

        delivered
    }
}
