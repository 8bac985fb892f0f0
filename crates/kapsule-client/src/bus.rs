use std::any::Any;

use async_trait::async_trait;
use kapsule_core::{Event, OperationHandle, Request, Response};
use kapsule_ipc::{Connection, IpcError};
use thiserror::Error;
use tokio::sync::mpsc;

/// Transport-level failures surfaced to the client core.
#[derive(Debug, Error)]
pub enum BusError {
    /// No usable connection to the daemon.
    #[error("not connected to kapsule daemon")]
    NotConnected,
    /// Connection went away mid-call.
    #[error("connection to kapsule daemon closed")]
    Closed,
    /// The daemon rejected the initiating call; carries its message verbatim.
    #[error("{0}")]
    Rejected(String),
    /// Any other transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<IpcError> for BusError {
    fn from(err: IpcError) -> Self {
        match err {
            IpcError::Closed => BusError::Closed,
            other => BusError::Transport(other.to_string()),
        }
    }
}

/// The narrow transport interface the client core depends on.
///
/// A bus can invoke remote methods and deliver per-operation events. When
/// `scoped_events` is true, [`Bus::subscribe`] must deliver every event the
/// service emitted for that handle since the initiating call's reply, so a
/// subscriber attaching after it learns the handle cannot miss the terminal
/// event. Transports without per-operation scoping only provide the global
/// stream and the tracker filters it instead.
#[async_trait]
pub trait Bus: Send + Sync {
    /// True when the transport can scope an event stream to a single handle.
    fn scoped_events(&self) -> bool;

    /// Invokes one remote method and returns its reply.
    async fn invoke(&self, request: Request) -> Result<Response, BusError>;

    /// Subscribes to events for one handle, replaying anything already
    /// emitted for it.
    async fn subscribe(&self, handle: &OperationHandle) -> Result<EventStream, BusError>;

    /// Subscribes to every operation event the service emits from now on.
    async fn subscribe_all(&self) -> Result<EventStream, BusError>;
}

/// Owned event subscription.
///
/// Dropping the stream releases whatever transport resource backs it (signal
/// match rule, routing table entry), so cleanup holds on success, failure,
/// and cancellation alike without a manual unsubscribe step.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Event>,
    _guard: Option<Box<dyn Any + Send>>,
}

impl EventStream {
    /// Wraps a receiver together with the guard that keeps its route alive.
    pub fn new(rx: mpsc::UnboundedReceiver<Event>, guard: impl Any + Send) -> Self {
        Self {
            rx,
            _guard: Some(Box::new(guard)),
        }
    }

    /// Wraps a bare receiver; for transports with nothing to release.
    pub fn without_guard(rx: mpsc::UnboundedReceiver<Event>) -> Self {
        Self { rx, _guard: None }
    }

    /// Receives the next event; `None` once the transport is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

#[async_trait]
impl Bus for Connection {
    fn scoped_events(&self) -> bool {
        true
    }

    async fn invoke(&self, request: Request) -> Result<Response, BusError> {
        Connection::invoke(self, request).await.map_err(Into::into)
    }

    async fn subscribe(&self, handle: &OperationHandle) -> Result<EventStream, BusError> {
        let receiver = Connection::subscribe(self, handle)?;
        let (rx, guard) = receiver.into_parts();
        Ok(EventStream::new(rx, guard))
    }

    async fn subscribe_all(&self) -> Result<EventStream, BusError> {
        let receiver = Connection::subscribe_all(self)?;
        let (rx, guard) = receiver.into_parts();
        Ok(EventStream::new(rx, guard))
    }
}
