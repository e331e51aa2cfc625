//! Connection representation
//!
//! `Connection` models one accepted TCP session as seen by the broker. It
//! holds the sending side of the per-connection outbound channel (drained by
//! the session's writer task), a count of frames queued but not yet written,
//! the session's cancellation token, and the set of topics the connection is
//! subscribed to, which is the reverse index used for cleanup on disconnect.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::utils::error::BrokerError;

pub type ConnectionId = String;

#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub peer: Option<SocketAddr>,
    pub sender: UnboundedSender<String>,
    pub topics: HashSet<String>,
    queued: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl Connection {
    /// Create a new connection around an outbound channel. The `id` is a UUID
    /// used to identify the connection across broker operations; `cancel`
    /// stops the owning session when the broker evicts the connection.
    pub fn new(
        sender: UnboundedSender<String>,
        peer: Option<SocketAddr>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            peer,
            sender,
            topics: HashSet::new(),
            queued: Arc::new(AtomicUsize::new(0)),
            cancel,
        }
    }

    /// Shared counter of queued frames. The writer task decrements it once a
    /// frame has been written to the socket.
    pub fn queue_counter(&self) -> Arc<AtomicUsize> {
        self.queued.clone()
    }

    /// Frames queued for this connection that have not been written yet.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Stop the owning session: its read loop ends and its writer gives up
    /// on whatever is still queued.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Encode `frame` as one JSON line and queue it for the writer task.
    ///
    /// Fails once the writer task is gone, which is how a dead peer shows up
    /// on the publishing side.
    pub fn send<T: Serialize>(&self, frame: &T) -> Result<(), BrokerError> {
        let line = serde_json::to_string(frame)?;
        self.send_line(line)
    }

    /// Queue an already encoded line (without the trailing newline).
    pub fn send_line(&self, line: String) -> Result<(), BrokerError> {
        self.queued.fetch_add(1, Ordering::AcqRel);
        self.sender.send(line).map_err(|_| {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            BrokerError::ConnectionClosed(self.id.clone())
        })
    }

    /// Queue a push, refusing when the peer already has `limit` frames it has
    /// not read.
    pub fn push_line(&self, line: String, limit: usize) -> Result<(), BrokerError> {
        let queued = self.queued();
        if queued >= limit {
            return Err(BrokerError::Stalled {
                id: self.id.clone(),
                queued,
            });
        }
        self.send_line(line)
    }
}
