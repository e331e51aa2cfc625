//! TCP transport
//!
//! This file implements the broker's network side. Responsibilities:
//! - Accept TCP connections and run one session task per connection
//! - Register a `Connection` with the broker and drain its outbound channel
//!   into the socket from a dedicated writer task
//! - Read newline-delimited JSON requests one at a time and dispatch them
//!   under the broker lock
//! - Tear the session down on end-of-stream, read or write failure, or
//!   server shutdown
//!
//! Within one connection, request N+1 is not read until the reply to request
//! N (and any replay or fan-out it causes) has been queued on the ordered
//! outbound channel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::engine::lock;
use crate::broker::{Connection, ConnectionId, SharedBroker};
use crate::transport::dispatch::handle_line;
use crate::utils::error::BrokerError;

/// Bind `addr` and serve until `shutdown` is cancelled.
pub async fn start_tcp_server(
    addr: String,
    broker: SharedBroker,
    shutdown: CancellationToken,
) -> Result<(), BrokerError> {
    let listener = TcpListener::bind(&addr).await?;
    info!("Broker listening on {}", listener.local_addr()?);
    serve(listener, broker, shutdown).await
}

/// Accept connections on an already bound listener.
///
/// Once `shutdown` fires no new connections are accepted; every live session
/// sees the cancellation, tears itself down, and is awaited before this
/// returns.
pub async fn serve(
    listener: TcpListener,
    broker: SharedBroker,
    shutdown: CancellationToken,
) -> Result<(), BrokerError> {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let session = Session::accept(stream, peer, broker.clone(), shutdown.child_token());
                    sessions.spawn(session.run());
                }
                Err(e) => warn!("Failed to accept connection: {e}"),
            },
            Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(e) = joined {
                    error!("Session task failed: {e}");
                }
            }
        }
    }

    info!("Shutting down, waiting for {} sessions", sessions.len());
    while sessions.join_next().await.is_some() {}
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// One accepted connection, from accept to released socket.
pub struct Session {
    id: ConnectionId,
    peer: SocketAddr,
    state: SessionState,
    broker: SharedBroker,
    lines: FramedRead<OwnedReadHalf, LinesCodec>,
    writer: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Session {
    /// Register the connection with the broker and start its writer task.
    /// There is no handshake: the session is `Active` as soon as this returns.
    pub fn accept(
        stream: TcpStream,
        peer: SocketAddr,
        broker: SharedBroker,
        cancel: CancellationToken,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel::<String>();

        let connection = Connection::new(tx, Some(peer), cancel.clone());
        let queued = connection.queue_counter();
        let id = lock(&broker).register_connection(connection);
        info!("Client {id} connected from {peer}");

        let writer = tokio::spawn(write_loop(
            id.clone(),
            FramedWrite::new(write_half, LinesCodec::new()),
            rx,
            queued,
            cancel.clone(),
        ));

        let mut session = Self {
            id,
            peer,
            state: SessionState::Connecting,
            broker,
            lines: FramedRead::new(read_half, LinesCodec::new()),
            writer: Some(writer),
            cancel,
        };
        session.transition(SessionState::Active);
        session
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session {} {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }

    /// Read and dispatch requests until the connection ends, then tear down.
    pub async fn run(mut self) {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("Session {} cancelled", self.id);
                    break;
                }
                next = self.lines.next() => next,
            };

            let line = match next {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    warn!("Failed to read from {}: {e}", self.id);
                    break;
                }
                None => break,
            };

            let result = {
                let mut broker = lock(&self.broker);
                handle_line(&mut broker, &self.id, &line)
            };
            if let Err(e) = result {
                error!("Error handling client {} ({}): {e}", self.id, self.peer);
                break;
            }
        }

        self.close().await;
    }

    /// Idempotent teardown: drop every subscription, then wait for the writer
    /// to flush what is queued and release the socket.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if self.state != SessionState::Closing {
            self.transition(SessionState::Closing);
            // a failed fan-out may already have dropped it
            lock(&self.broker).drop_connection(&self.id);
        }

        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.await {
                error!("Writer task for {} failed: {e}", self.id);
            }
        }

        self.transition(SessionState::Closed);
        info!("Client {} disconnected ({})", self.id, self.peer);
    }
}

/// Drain the outbound channel into the socket.
///
/// Ends when the broker drops the connection (channel closed), when a write
/// fails, or when the session is cancelled. A write failure cancels the
/// session so its read loop moves on to teardown. After cancellation a frame
/// is still written if the socket takes it without waiting; a peer that has
/// stopped reading never holds the writer up.
async fn write_loop(
    id: ConnectionId,
    mut sink: FramedWrite<OwnedWriteHalf, LinesCodec>,
    mut rx: mpsc::UnboundedReceiver<String>,
    queued: Arc<AtomicUsize>,
    cancel: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            biased;
            line = rx.recv() => match line {
                Some(line) => line,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };

        let written = tokio::select! {
            biased;
            written = sink.send(line) => written,
            _ = cancel.cancelled() => {
                debug!("Abandoning {} queued frames for {id}", queued.load(Ordering::Acquire));
                return;
            }
        };
        queued.fetch_sub(1, Ordering::AcqRel);

        if let Err(e) = written {
            warn!("Failed to write to {id}: {e}");
            cancel.cancel();
            return;
        }
    }

    if let Err(e) = SinkExt::<String>::close(&mut sink).await {
        debug!("Closing socket for {id} failed: {e}");
    }
}
