use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Container, ContainerMode, ContainerState, ErrorCode, OperationHandle, ReqId, Severity};

/// Wire protocol version expected by current binaries.
pub const PROTOCOL_VERSION: u32 = 1;

/// Request envelope carrying metadata plus a typed request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope<T> {
    /// Client-generated request identifier.
    pub req_id: ReqId,
    /// Typed request payload.
    pub body: T,
}

/// Response envelope carrying metadata plus a typed response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope<T> {
    /// Request identifier echoed from the request envelope.
    pub req_id: ReqId,
    /// Typed response payload.
    pub body: T,
}

/// Raw container row as the daemon reports it.
///
/// Status and mode are the daemon's strings; the client maps them onto its
/// enums without ever rejecting unknown values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Unique container name.
    pub name: String,
    /// Daemon-reported status string.
    pub status: String,
    /// Image reference.
    pub image: String,
    /// Creation timestamp in UNIX milliseconds.
    pub created_ms: u64,
    /// Bus integration mode string.
    pub mode: String,
}

impl From<ContainerRecord> for Container {
    fn from(record: ContainerRecord) -> Self {
        Self {
            name: record.name,
            state: ContainerState::from_status(&record.status),
            image: record.image,
            mode: ContainerMode::from_str_lossy(&record.mode),
            created_at_ms: record.created_ms,
        }
    }
}

/// RPC request variants accepted by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Returns daemon and protocol version metadata.
    Version {},
    /// Lists all containers.
    ListContainers {},
    /// Fetches one container record.
    GetContainerInfo {
        /// Target container name.
        name: String,
    },
    /// Returns the daemon configuration as key/value pairs.
    GetConfig {},
    /// Starts container creation; progress arrives as events.
    CreateContainer {
        /// New container name.
        name: String,
        /// Image reference, e.g. "images:ubuntu/24.04".
        image: String,
        /// Give the container its own session bus.
        session_mode: bool,
        /// Enable the bus multiplexer.
        dbus_mux: bool,
    },
    /// Starts a stopped container.
    StartContainer {
        /// Target container name.
        name: String,
    },
    /// Stops a running container.
    StopContainer {
        /// Target container name.
        name: String,
        /// When true, stop without a graceful shutdown window.
        force: bool,
    },
    /// Deletes a container.
    DeleteContainer {
        /// Target container name.
        name: String,
        /// When true, delete even while running.
        force: bool,
    },
    /// Resolves the argv needed to enter a container.
    PrepareEnter {
        /// Target container name.
        name: String,
        /// Command to run inside; empty means the default shell.
        command: Vec<String>,
    },
}

/// RPC response variants returned by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Protocol version details.
    Version {
        /// Daemon version string.
        daemon: String,
        /// Protocol version number.
        protocol: u32,
    },
    /// Container listing payload.
    Containers {
        /// All known containers at query time.
        containers: Vec<ContainerRecord>,
    },
    /// Single container payload.
    ContainerInfo {
        /// The requested container.
        container: ContainerRecord,
    },
    /// Daemon configuration payload.
    Config {
        /// Configuration key/value pairs.
        entries: BTreeMap<String, String>,
    },
    /// Acknowledgment that a long-running operation was accepted.
    OperationStarted {
        /// Handle scoping all events for this operation.
        handle: OperationHandle,
    },
    /// Enter preparation payload; synchronous, no handle involved.
    EnterPrepared {
        /// Whether the preparation succeeded.
        success: bool,
        /// Daemon message when it did not.
        error: String,
        /// Argv to exec into when successful.
        exec_args: Vec<String>,
    },
    /// Structured error response.
    Error {
        /// High-level error category.
        code: ErrorCode,
        /// Human-readable summary.
        message: String,
        /// Optional extended context.
        detail: Option<String>,
    },
}

/// Unsolicited per-operation event pushed by the daemon.
///
/// The handle is embedded so a single connection can carry events for every
/// in-flight operation; scoping to one operation happens on the client side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Progress message for one operation.
    Message {
        /// Operation this message belongs to.
        handle: OperationHandle,
        /// Message severity.
        severity: Severity,
        /// Message text.
        text: String,
        /// Nesting delta for hierarchical display.
        indent: i32,
    },
    /// Terminal event for one operation, emitted exactly once per handle.
    Completed {
        /// Operation that finished.
        handle: OperationHandle,
        /// Whether the operation succeeded.
        success: bool,
        /// Daemon message when it did not; empty on success.
        error: String,
    },
}

impl Event {
    /// Handle this event is scoped to.
    pub fn handle(&self) -> &OperationHandle {
        match self {
            Event::Message { handle, .. } => handle,
            Event::Completed { handle, .. } => handle,
        }
    }

    /// True for the terminal event of an operation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Completed { .. })
    }
}

/// Frame written by the daemon: either a reply to a request or an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Response correlated to a request by its envelope id.
    Reply(ResponseEnvelope<Response>),
    /// Unsolicited operation event.
    Event(Event),
}
