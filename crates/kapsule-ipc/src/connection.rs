use std::{
    collections::{HashMap, VecDeque},
    path::Path,
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use kapsule_core::{
    Event, OperationHandle, ReqId, Request, RequestEnvelope, Response, ServerFrame,
};
use tokio::{
    net::{UnixStream, unix::OwnedWriteHalf},
    sync::{Mutex, mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};

use crate::{
    IpcError,
    codec::{decode, encode},
    framing::{read_frame, write_frame},
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Backlogged handles retained while no subscriber has attached yet. The
/// backlog only needs to cover the gap between an initiating call's reply and
/// the matching subscribe, so the bound can stay small.
const MAX_BACKLOG_HANDLES: usize = 64;
const MAX_BACKLOG_EVENTS_PER_HANDLE: usize = 256;

/// Demultiplexing client connection to the kapsule daemon socket.
///
/// One connection carries request/response calls and unsolicited operation
/// events. Replies are correlated to callers by request id; events are routed
/// to per-handle subscriptions, with events for not-yet-subscribed handles
/// held back and replayed once [`Connection::subscribe`] attaches. Multiple
/// calls and subscriptions may be in flight concurrently.
pub struct Connection {
    writer: Mutex<OwnedWriteHalf>,
    router: Arc<StdMutex<Router>>,
    next_req_id: AtomicU64,
    timeout: Duration,
    reader: JoinHandle<()>,
}

struct Router {
    pending: HashMap<u64, oneshot::Sender<Response>>,
    routes: HashMap<OperationHandle, mpsc::UnboundedSender<Event>>,
    watchers: HashMap<u64, mpsc::UnboundedSender<Event>>,
    next_watcher_id: u64,
    backlog: HashMap<OperationHandle, Vec<Event>>,
    backlog_order: VecDeque<OperationHandle>,
    closed: bool,
}

impl Router {
    fn new() -> Self {
        Self {
            pending: HashMap::new(),
            routes: HashMap::new(),
            watchers: HashMap::new(),
            next_watcher_id: 1,
            backlog: HashMap::new(),
            backlog_order: VecDeque::new(),
            closed: false,
        }
    }

    fn deliver(&mut self, event: Event) {
        self.watchers
            .retain(|_, watcher| watcher.send(event.clone()).is_ok());

        let handle = event.handle().clone();
        if let Some(route) = self.routes.get(&handle) {
            if route.send(event).is_ok() {
                return;
            }
            // Receiver already dropped; the operation was resolved or
            // abandoned locally. A late terminal event here is a daemon-side
            // anomaly, everything else is a normal shutdown race.
            self.routes.remove(&handle);
            tracing::debug!(handle = %handle, "event for released subscription dropped");
            return;
        }

        self.push_backlog(handle, event);
    }

    fn push_backlog(&mut self, handle: OperationHandle, event: Event) {
        if !self.backlog.contains_key(&handle) {
            self.backlog_order.push_back(handle.clone());
            self.backlog.insert(handle.clone(), Vec::new());
        }
        if let Some(entry) = self.backlog.get_mut(&handle) {
            if entry.len() < MAX_BACKLOG_EVENTS_PER_HANDLE {
                entry.push(event);
            } else {
                tracing::warn!(handle = %handle, "event backlog full, dropping event");
            }
        }

        while self.backlog.len() > MAX_BACKLOG_HANDLES {
            match self.backlog_order.pop_front() {
                Some(oldest) => {
                    if self.backlog.remove(&oldest).is_some() {
                        tracing::debug!(handle = %oldest, "evicting unclaimed event backlog");
                    }
                }
                None => break,
            }
        }
    }

    fn shutdown(&mut self) {
        self.closed = true;
        // Dropping the senders wakes every waiter with a closed-channel
        // error, which surfaces as IpcError::Closed.
        self.pending.clear();
        self.routes.clear();
        self.watchers.clear();
        self.backlog.clear();
        self.backlog_order.clear();
    }
}

impl Connection {
    /// Connects to the daemon socket path and starts the reader task.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, IpcError> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self::from_stream(stream))
    }

    /// Wraps an already-connected stream; used by tests with socketpairs.
    pub fn from_stream(stream: UnixStream) -> Self {
        let (mut read_half, write_half) = stream.into_split();
        let router = Arc::new(StdMutex::new(Router::new()));

        let reader_router = Arc::clone(&router);
        let reader = tokio::spawn(async move {
            loop {
                let frame = match read_frame(&mut read_half).await {
                    Ok(frame) => frame,
                    Err(err) => {
                        tracing::debug!(error = %err, "connection reader stopping");
                        break;
                    }
                };

                match decode::<ServerFrame>(&frame) {
                    Ok(ServerFrame::Reply(envelope)) => {
                        let waiter = reader_router
                            .lock()
                            .expect("router lock poisoned")
                            .pending
                            .remove(&envelope.req_id.0);
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(envelope.body);
                            }
                            None => {
                                tracing::warn!(
                                    req_id = envelope.req_id.0,
                                    "reply without matching request"
                                );
                            }
                        }
                    }
                    Ok(ServerFrame::Event(event)) => {
                        reader_router
                            .lock()
                            .expect("router lock poisoned")
                            .deliver(event);
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "undecodable frame, closing connection");
                        break;
                    }
                }
            }

            reader_router
                .lock()
                .expect("router lock poisoned")
                .shutdown();
        });

        Self {
            writer: Mutex::new(write_half),
            router,
            next_req_id: AtomicU64::new(1),
            timeout: DEFAULT_TIMEOUT,
            reader,
        }
    }

    /// Overrides the default call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sends one request and waits for the matching reply.
    pub async fn invoke(&self, request: Request) -> Result<Response, IpcError> {
        let req_id = ReqId(self.next_req_id.fetch_add(1, Ordering::Relaxed));

        let (tx, rx) = oneshot::channel();
        {
            let mut router = self.router.lock().expect("router lock poisoned");
            if router.closed {
                return Err(IpcError::Closed);
            }
            router.pending.insert(req_id.0, tx);
        }

        let envelope = RequestEnvelope {
            req_id,
            body: request,
        };
        let payload = match encode(&envelope) {
            Ok(payload) => payload,
            Err(err) => {
                self.forget_pending(req_id);
                return Err(err);
            }
        };

        let result = timeout(self.timeout, async {
            {
                let mut writer = self.writer.lock().await;
                write_frame(&mut *writer, &payload).await?;
            }
            rx.await.map_err(|_| IpcError::Closed)
        })
        .await;

        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => {
                self.forget_pending(req_id);
                Err(err)
            }
            Err(_) => {
                self.forget_pending(req_id);
                Err(IpcError::Timeout)
            }
        }
    }

    /// Subscribes to events for one operation handle.
    ///
    /// Any events the daemon emitted for this handle since the connection saw
    /// its initiating reply are replayed first, in order, so a subscriber that
    /// attaches after obtaining the handle cannot miss the terminal event.
    /// Dropping the receiver releases the route.
    pub fn subscribe(&self, handle: &OperationHandle) -> Result<EventReceiver, IpcError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut router = self.router.lock().expect("router lock poisoned");
        if router.closed {
            return Err(IpcError::Closed);
        }

        if let Some(held) = router.backlog.remove(handle) {
            router.backlog_order.retain(|h| h != handle);
            for event in held {
                let _ = tx.send(event);
            }
        }
        if router.routes.insert(handle.clone(), tx).is_some() {
            tracing::debug!(handle = %handle, "replacing existing subscription route");
        }

        Ok(EventReceiver {
            rx,
            guard: RouteGuard {
                router: Arc::clone(&self.router),
                key: RouteKey::Scoped(handle.clone()),
            },
        })
    }

    /// Subscribes to every operation event this connection receives.
    pub fn subscribe_all(&self) -> Result<EventReceiver, IpcError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut router = self.router.lock().expect("router lock poisoned");
        if router.closed {
            return Err(IpcError::Closed);
        }

        let id = router.next_watcher_id;
        router.next_watcher_id += 1;
        router.watchers.insert(id, tx);

        Ok(EventReceiver {
            rx,
            guard: RouteGuard {
                router: Arc::clone(&self.router),
                key: RouteKey::Watcher(id),
            },
        })
    }

    fn forget_pending(&self, req_id: ReqId) {
        self.router
            .lock()
            .expect("router lock poisoned")
            .pending
            .remove(&req_id.0);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
        self.router.lock().expect("router lock poisoned").shutdown();
    }
}

/// Stream of events for one subscription; the route is released on drop.
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<Event>,
    guard: RouteGuard,
}

impl EventReceiver {
    /// Receives the next event; `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Splits into the raw receiver and the guard keeping the route alive.
    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<Event>, RouteGuard) {
        (self.rx, self.guard)
    }
}

enum RouteKey {
    Scoped(OperationHandle),
    Watcher(u64),
}

/// Keeps one event route registered; removal happens on drop so every exit
/// path, including cancellation of the awaiting task, releases it.
pub struct RouteGuard {
    router: Arc<StdMutex<Router>>,
    key: RouteKey,
}

impl Drop for RouteGuard {
    fn drop(&mut self) {
        let mut router = self.router.lock().expect("router lock poisoned");
        match &self.key {
            RouteKey::Scoped(handle) => {
                router.routes.remove(handle);
            }
            RouteKey::Watcher(id) => {
                router.watchers.remove(id);
            }
        }
    }
}
