#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use kapsule_client::{Bus, BusError, EventStream};
use kapsule_core::{Event, OperationHandle, PROTOCOL_VERSION, Request, Response};
use tokio::sync::mpsc;

/// One scripted exchange: the reply to the next `invoke`, plus events the
/// fake daemon emits as soon as that reply is on its way. On a scoped bus the
/// events sit in the backlog until the tracker subscribes; on a global-only
/// bus they reach any watcher attached before the call.
pub struct Script {
    pub reply: Result<Response, BusError>,
    pub events: Vec<Event>,
}

/// In-memory bus double with call and subscription counters.
#[derive(Clone)]
pub struct TestBus {
    inner: Arc<Inner>,
}

struct Inner {
    scoped: bool,
    script: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<Request>>,
    invoke_count: AtomicUsize,
    subscribe_count: AtomicUsize,
    active_subscriptions: AtomicUsize,
    router: Mutex<RouterState>,
}

struct RouterState {
    routes: HashMap<OperationHandle, mpsc::UnboundedSender<Event>>,
    watchers: HashMap<u64, mpsc::UnboundedSender<Event>>,
    next_watcher_id: u64,
    backlog: HashMap<OperationHandle, Vec<Event>>,
}

impl TestBus {
    /// Bus with per-handle event scoping (direct event-wait strategy).
    pub fn scoped() -> Self {
        Self::new(true)
    }

    /// Bus exposing only the global event stream (filtering fallback).
    pub fn global_only() -> Self {
        Self::new(false)
    }

    fn new(scoped: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                scoped,
                script: Mutex::new(VecDeque::new()),
                requests: Mutex::new(Vec::new()),
                invoke_count: AtomicUsize::new(0),
                subscribe_count: AtomicUsize::new(0),
                active_subscriptions: AtomicUsize::new(0),
                router: Mutex::new(RouterState {
                    routes: HashMap::new(),
                    watchers: HashMap::new(),
                    next_watcher_id: 1,
                    backlog: HashMap::new(),
                }),
            }),
        }
    }

    pub fn expect(&self, reply: Result<Response, BusError>, events: Vec<Event>) {
        self.inner
            .script
            .lock()
            .unwrap()
            .push_back(Script { reply, events });
    }

    /// Scripts a successful version handshake.
    pub fn expect_version(&self) {
        self.expect(
            Ok(Response::Version {
                daemon: "0.1.0".to_string(),
                protocol: PROTOCOL_VERSION,
            }),
            Vec::new(),
        );
    }

    /// Scripts an accepted operation call returning `handle`.
    pub fn expect_started(&self, handle: &str, events: Vec<Event>) {
        self.expect(
            Ok(Response::OperationStarted {
                handle: OperationHandle::new(handle),
            }),
            events,
        );
    }

    /// Emits an event outside any scripted call.
    pub fn emit(&self, event: Event) {
        let mut router = self.inner.router.lock().unwrap();
        deliver(&mut router, event, self.inner.scoped);
    }

    pub fn invoke_count(&self) -> usize {
        self.inner.invoke_count.load(Ordering::SeqCst)
    }

    pub fn subscribe_count(&self) -> usize {
        self.inner.subscribe_count.load(Ordering::SeqCst)
    }

    pub fn active_subscriptions(&self) -> usize {
        self.inner.active_subscriptions.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Request> {
        self.inner.requests.lock().unwrap().clone()
    }
}

fn deliver(router: &mut RouterState, event: Event, scoped: bool) {
    router
        .watchers
        .retain(|_, watcher| watcher.send(event.clone()).is_ok());

    if !scoped {
        return;
    }

    let handle = event.handle().clone();
    let routed = match router.routes.get(&handle) {
        Some(route) => route.send(event.clone()).is_ok(),
        None => false,
    };
    if !routed {
        router.routes.remove(&handle);
        router.backlog.entry(handle).or_default().push(event);
    }
}

#[async_trait]
impl Bus for TestBus {
    fn scoped_events(&self) -> bool {
        self.inner.scoped
    }

    async fn invoke(&self, request: Request) -> Result<Response, BusError> {
        self.inner.invoke_count.fetch_add(1, Ordering::SeqCst);
        self.inner.requests.lock().unwrap().push(request.clone());

        let scripted = self.inner.script.lock().unwrap().pop_front();
        let Some(script) = scripted else {
            return Err(BusError::Transport(format!(
                "unscripted request: {request:?}"
            )));
        };

        {
            let mut router = self.inner.router.lock().unwrap();
            for event in script.events {
                deliver(&mut router, event, self.inner.scoped);
            }
        }

        script.reply
    }

    async fn subscribe(&self, handle: &OperationHandle) -> Result<EventStream, BusError> {
        if !self.inner.scoped {
            return Err(BusError::Transport(
                "per-operation subscriptions not supported".to_string(),
            ));
        }

        self.inner.subscribe_count.fetch_add(1, Ordering::SeqCst);
        self.inner.active_subscriptions.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut router = self.inner.router.lock().unwrap();
            if let Some(held) = router.backlog.remove(handle) {
                for event in held {
                    let _ = tx.send(event);
                }
            }
            router.routes.insert(handle.clone(), tx);
        }

        Ok(EventStream::new(
            rx,
            SubscriptionGuard {
                inner: Arc::clone(&self.inner),
                key: Key::Route(handle.clone()),
            },
        ))
    }

    async fn subscribe_all(&self) -> Result<EventStream, BusError> {
        self.inner.subscribe_count.fetch_add(1, Ordering::SeqCst);
        self.inner.active_subscriptions.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut router = self.inner.router.lock().unwrap();
            let id = router.next_watcher_id;
            router.next_watcher_id += 1;
            router.watchers.insert(id, tx);
            id
        };

        Ok(EventStream::new(
            rx,
            SubscriptionGuard {
                inner: Arc::clone(&self.inner),
                key: Key::Watcher(id),
            },
        ))
    }
}

enum Key {
    Route(OperationHandle),
    Watcher(u64),
}

struct SubscriptionGuard {
    inner: Arc<Inner>,
    key: Key,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.inner
            .active_subscriptions
            .fetch_sub(1, Ordering::SeqCst);
        let mut router = self.inner.router.lock().unwrap();
        match &self.key {
            Key::Route(handle) => {
                router.routes.remove(handle);
            }
            Key::Watcher(id) => {
                router.watchers.remove(id);
            }
        }
    }
}

/// Shorthand event constructors for scenario scripts.
pub fn message(handle: &str, severity: kapsule_core::Severity, text: &str) -> Event {
    Event::Message {
        handle: OperationHandle::new(handle),
        severity,
        text: text.to_string(),
        indent: 0,
    }
}

pub fn completed(handle: &str, success: bool, error: &str) -> Event {
    Event::Completed {
        handle: OperationHandle::new(handle),
        success,
        error: error.to_string(),
    }
}
