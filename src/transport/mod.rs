//! The `transport` module is responsible for network communication with
//! clients over TCP using newline-delimited JSON.
//!
//! It defines the wire protocol shared with the client library, the dispatch
//! of decoded requests onto the broker, and the TCP server that runs one
//! session per connection.

pub mod dispatch;
pub mod message;
pub mod tcp;


pub use message::{Reply, Request};
pub use tcp::{serve, start_tcp_server};
