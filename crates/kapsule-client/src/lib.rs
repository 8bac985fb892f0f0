//! Client for the kapsule container daemon.
//!
//! [`ServiceClient`] issues operation calls over a local IPC bus and
//! [`OperationTracker`] turns each accepted call into one awaitable result,
//! forwarding per-operation progress events to a caller-supplied sink.
//! Multiple operations may be in flight concurrently on one connection; each
//! tracker only ever observes events for its own handle and releases its
//! subscription on every exit path.

pub mod bus;
pub mod client;
pub mod progress;
pub mod tracker;

pub use bus::{Bus, BusError, EventStream};
pub use client::{CONFIG_ERROR_KEY, ConnectionState, ServiceClient};
pub use progress::ProgressSink;
pub use tracker::OperationTracker;
