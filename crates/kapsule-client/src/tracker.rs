use std::{future::Future, time::Duration};

use kapsule_core::{Event, OperationHandle, OperationResult, ProgressMessage};
use tokio::time::{Instant, timeout_at};

use crate::{
    bus::{Bus, BusError, EventStream},
    progress::ProgressSink,
};

/// Default deadline for one tracked operation.
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Correlates one operation's event stream to a single resolved result.
///
/// `track` takes the initiating call as a future so subscription order can be
/// chosen per transport capability:
///
/// - scoped transports: await the handle first, then attach a per-handle
///   subscription; the bus contract replays events emitted since the reply,
///   so nothing is missed;
/// - global-stream transports: subscribe to the full stream before the
///   initiating call and filter by handle afterwards. Correctness-equivalent,
///   with wake latency bounded by the stream's delivery interval rather than
///   by per-operation signal dispatch.
///
/// Either way the first terminal event resolves the result, the sink sees
/// messages for this handle only, and the subscription is dropped on every
/// exit path, including cancellation of the awaiting caller. Cancellation
/// only stops the client's observation; the daemon may keep running the
/// operation.
pub struct OperationTracker<'a, B: Bus + ?Sized> {
    bus: &'a B,
    timeout: Duration,
}

impl<'a, B: Bus + ?Sized> OperationTracker<'a, B> {
    pub fn new(bus: &'a B) -> Self {
        Self {
            bus,
            timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Overrides the overall operation deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs the initiating call and awaits the operation's terminal event.
    ///
    /// If the call itself fails no subscription outlives this method: on a
    /// scoped transport none is ever created, on a global-stream transport
    /// the pre-attached stream is dropped before returning.
    pub async fn track<F>(&self, start: F, sink: Option<&mut dyn ProgressSink>) -> OperationResult
    where
        F: Future<Output = Result<OperationHandle, BusError>>,
    {
        let mut pre_attached = if self.bus.scoped_events() {
            None
        } else {
            match self.bus.subscribe_all().await {
                Ok(stream) => Some(stream),
                Err(err) => return OperationResult::failure(err.to_string()),
            }
        };

        let handle = match start.await {
            Ok(handle) => handle,
            Err(err) => return OperationResult::failure(err.to_string()),
        };

        let events = match pre_attached.take() {
            Some(stream) => stream,
            None => match self.bus.subscribe(&handle).await {
                Ok(stream) => stream,
                Err(err) => return OperationResult::failure(err.to_string()),
            },
        };

        self.await_completion(handle, events, sink).await
    }

    async fn await_completion(
        &self,
        handle: OperationHandle,
        mut events: EventStream,
        mut sink: Option<&mut dyn ProgressSink>,
    ) -> OperationResult {
        let deadline = Instant::now() + self.timeout;

        loop {
            let event = match timeout_at(deadline, events.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => {
                    return OperationResult::failure(
                        "connection closed before operation completed",
                    );
                }
                Err(_) => {
                    return OperationResult::failure(format!(
                        "operation timed out after {} seconds",
                        self.timeout.as_secs()
                    ));
                }
            };

            // A global stream carries every operation; anything not ours is
            // someone else's tracker's business.
            if event.handle() != &handle {
                continue;
            }

            match event {
                Event::Message {
                    severity,
                    text,
                    indent,
                    ..
                } => {
                    if let Some(sink) = sink.as_mut() {
                        sink.message(&ProgressMessage {
                            severity,
                            text,
                            indent,
                        });
                    }
                }
                Event::Completed { success, error, .. } => {
                    // First terminal event wins; the stream (and with it the
                    // subscription) is dropped on return, so redelivered
                    // completions and late progress are never observed.
                    return OperationResult { success, error };
                }
            }
        }
    }
}
