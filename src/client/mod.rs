//! The `client` module is the library side of the protocol: a `Client`
//! session that sends typed requests, waits for their correlated replies,
//! and hands unsolicited pushes to registered handlers.

pub mod session;

pub use session::{Client, Inbound, PushHandler};
