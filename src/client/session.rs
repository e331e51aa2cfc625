//! Client session
//!
//! `Client` holds one connection to the broker and runs two flows over it:
//!
//! - the request path: `publish`, `subscribe`, `unsubscribe` and `get` write
//!   one request and wait for the reply;
//! - the read path: a background task classifies every inbound line. Pushes
//!   (`"type": "message"`) go to the registered handlers, everything else is
//!   the reply to the request currently waiting.
//!
//! Replies carry no request id and are matched purely by order. Every request
//! method takes `&mut self`, so a session can never have two requests in
//! flight at once.

use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::broker::Push;
use crate::transport::message::{Reply, Request};
use crate::utils::error::ClientError;

/// A registered push handler. Handlers run one at a time, in registration
/// order, and each is awaited before the next is called.
pub type PushHandler = Arc<dyn Fn(Push) -> BoxFuture<'static, ()> + Send + Sync>;

type Handlers = Arc<Mutex<Vec<PushHandler>>>;

pub struct Client {
    writer: FramedWrite<OwnedWriteHalf, LinesCodec>,
    replies: mpsc::UnboundedReceiver<Reply>,
    handlers: Handlers,
    shutdown: CancellationToken,
    reader: Option<JoinHandle<()>>,
}

/// One classified inbound frame.
#[derive(Debug, PartialEq)]
pub enum Inbound {
    Push(Push),
    Reply(Reply),
}

impl Inbound {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(line)?;
        if value.get("type").and_then(Value::as_str) == Some("message") {
            Ok(Inbound::Push(serde_json::from_value(value)?))
        } else {
            Ok(Inbound::Reply(serde_json::from_value(value)?))
        }
    }
}

impl Client {
    /// Connect and start the read path.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        debug!("Connected to broker at {}", stream.peer_addr()?);

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let handlers: Handlers = Arc::new(Mutex::new(Vec::new()));
        let shutdown = CancellationToken::new();

        let reader = tokio::spawn(listen(
            FramedRead::new(read_half, LinesCodec::new()),
            tx,
            handlers.clone(),
            shutdown.clone(),
        ));

        Ok(Self {
            writer: FramedWrite::new(write_half, LinesCodec::new()),
            replies: rx,
            handlers,
            shutdown,
            reader: Some(reader),
        })
    }

    /// Register a synchronous push handler.
    pub fn add_handler<F>(&self, handler: F)
    where
        F: Fn(&Push) + Send + Sync + 'static,
    {
        self.add_async_handler(move |push| {
            handler(&push);
            futures_util::future::ready(())
        });
    }

    /// Register a push handler that may itself await (for example to do its
    /// own I/O). The read path waits for it before dispatching further.
    pub fn add_async_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(Push) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: PushHandler = Arc::new(move |push: Push| handler(push).boxed());
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(boxed);
    }

    pub async fn publish(&mut self, topic: &str, message: Value) -> Result<Reply, ClientError> {
        self.request(&Request::Publish {
            topic: topic.to_string(),
            message,
        })
        .await
    }

    pub async fn subscribe(&mut self, topic: &str) -> Result<Reply, ClientError> {
        self.request(&Request::Subscribe {
            topic: topic.to_string(),
        })
        .await
    }

    pub async fn unsubscribe(&mut self, topic: &str) -> Result<Reply, ClientError> {
        self.request(&Request::Unsubscribe {
            topic: topic.to_string(),
        })
        .await
    }

    pub async fn get(&mut self, topic: &str) -> Result<Reply, ClientError> {
        self.request(&Request::Get {
            topic: topic.to_string(),
        })
        .await
    }

    /// Write one request and wait for its reply.
    ///
    /// Once the read path has stopped every call resolves to
    /// `Reply::Disconnected` instead of waiting forever.
    pub async fn request(&mut self, request: &Request) -> Result<Reply, ClientError> {
        let line = serde_json::to_string(request)?;
        self.writer.send(line).await?;
        debug!("Sent request for '{}'", request.topic());
        Ok(self.replies.recv().await.unwrap_or(Reply::Disconnected))
    }

    /// Stop the read path, close the connection, and wait for the reader to
    /// finish so nothing keeps running after this returns.
    pub async fn disconnect(mut self) {
        self.shutdown.cancel();

        if let Err(e) = SinkExt::<String>::close(&mut self.writer).await {
            debug!("Closing connection failed: {e}");
        }

        if let Some(reader) = self.reader.take() {
            if let Err(e) = reader.await {
                error!("Client reader failed: {e}");
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn listen(
    mut lines: FramedRead<OwnedReadHalf, LinesCodec>,
    replies: mpsc::UnboundedSender<Reply>,
    handlers: Handlers,
    shutdown: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = lines.next() => next,
        };

        let line = match next {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                warn!("Failed to read from broker: {e}");
                break;
            }
            None => {
                debug!("Broker closed the connection");
                break;
            }
        };

        match Inbound::parse(&line) {
            Ok(Inbound::Push(push)) => {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = dispatch_push(&handlers, push) => {}
                }
            }
            Ok(Inbound::Reply(reply)) => {
                if replies.send(reply).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Undecodable frame from broker: {e}");
                break;
            }
        }
    }

    let _ = replies.send(Reply::Disconnected);
}

async fn dispatch_push(handlers: &Handlers, push: Push) {
    // snapshot so handlers can be added while others run
    let handlers: Vec<PushHandler> = handlers
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();

    for handler in handlers {
        handler(push.clone()).await;
    }
}
