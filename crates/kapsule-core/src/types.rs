use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Lifecycle state of a container as last reported by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Unknown,
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl ContainerState {
    /// Maps a daemon status string to a state, case-insensitively.
    ///
    /// Unrecognized values map to `Unknown` rather than failing; the set of
    /// status strings is owned by the daemon and may grow.
    pub fn from_status(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "stopped" => Self::Stopped,
            "starting" => Self::Starting,
            "running" => Self::Running,
            "stopping" => Self::Stopping,
            "error" => Self::Error,
            _ => Self::Unknown,
        }
    }
}

/// D-Bus integration mode a container was created with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerMode {
    /// Host bus session shared with the container.
    #[default]
    Default,
    /// Container runs its own session bus.
    Session,
    /// Multiplexer giving hybrid host/container bus access.
    DbusMux,
}

impl ContainerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Session => "session",
            Self::DbusMux => "dbus-mux",
        }
    }

    /// Parses a mode string; unrecognized values fall back to `Default`.
    pub fn from_str_lossy(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "session" => Self::Session,
            "dbus-mux" | "dbus_mux" | "dbusmux" => Self::DbusMux,
            _ => Self::Default,
        }
    }
}

/// Point-in-time snapshot of one container.
///
/// Always constructed fresh from a daemon query; the client never caches or
/// mutates these. Equality and hashing consider `name` only, which is unique
/// per daemon.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Unique container name, non-empty for any container the daemon reports.
    pub name: String,
    /// Lifecycle state at query time.
    pub state: ContainerState,
    /// Image reference the container was created from.
    pub image: String,
    /// Bus integration mode.
    pub mode: ContainerMode,
    /// Creation timestamp in UNIX milliseconds.
    pub created_at_ms: u64,
}

impl PartialEq for Container {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Hash for Container {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// Severity of one progress message emitted during an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
    Dim,
    Hint,
}

/// One progress message delivered to an operation's sink.
///
/// Messages for a single operation arrive in emission order; `indent` is the
/// nesting delta the daemon attached for hierarchical display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMessage {
    pub severity: Severity,
    pub text: String,
    pub indent: i32,
}

/// Terminal outcome of one tracked operation.
///
/// Delivered at most once per handle. `error` is meaningful only when
/// `success` is false and carries the daemon's message verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub error: String,
}

impl OperationResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: String::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

/// Outcome of preparing to enter a container.
///
/// When `success` is true, `exec_args` is a non-empty argv the caller must
/// hand verbatim to a process-replace primitive; this crate never executes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnterResult {
    pub success: bool,
    pub error: String,
    pub exec_args: Vec<String>,
}

impl EnterResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            exec_args: Vec::new(),
        }
    }
}
