//! # publine
//!
//! `publine` is a minimal, in-memory, topic-based publish/subscribe broker
//! spoken over TCP with newline-delimited JSON, plus the client library that
//! talks to it.
//!
//! Every topic keeps a FIFO backlog. Publishing appends to the backlog and
//! pushes the payload to current subscribers; `get` pops the oldest entry;
//! subscribing replays the backlog to the new subscriber without consuming it.
//!
//! ## Core Modules
//!
//! - `broker`: the topic store, connection registry and fan-out.
//! - `transport`: the wire protocol and the TCP server sessions.
//! - `client`: the client session with reply correlation and push handlers.
//! - `config`: loading server configuration from file and environment.
//! - `utils`: error types and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod transport;
pub mod utils;

pub use broker::{Broker, Push, SharedBroker};
pub use client::Client;
pub use transport::{Reply, Request};
