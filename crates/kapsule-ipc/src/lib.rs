//! Async CBOR-over-UNIX-socket transport for the kapsule daemon protocol.
//!
//! A single connection multiplexes request/response calls (correlated by
//! request id) with unsolicited per-operation events (routed by handle).

mod error;

pub mod codec;
pub mod connection;
pub mod framing;
pub mod server;

pub use connection::{Connection, EventReceiver};
pub use error::IpcError;
pub use server::{EventNotifier, RequestHandler, serve_unix};
