//! The `utils` module provides shared building blocks used across `publine`:
//! the error types returned by the broker, the transport and the client, and
//! the logging bootstrap used by the binary.

pub mod error;
pub mod logging;
