//! The broker is the only shared state in `publine`: the topic registry with
//! per-topic backlogs and subscriber sets, and the registry of live
//! connections with their outbound channels.
//!
//! - `engine`: the `Broker` topic store and fan-out.
//! - `topic`: a single topic's backlog and subscriber set.
//! - `connection`: the broker-side record of one TCP session.
//! - `message`: the push frame sent to subscribers.

pub mod connection;
pub mod engine;
pub mod message;
pub mod topic;

pub use connection::{Connection, ConnectionId};
pub use engine::{Broker, SharedBroker};
pub use message::Push;

#[cfg(test)]
mod tests;
