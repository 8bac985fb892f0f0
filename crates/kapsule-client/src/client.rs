use std::{collections::BTreeMap, path::Path, time::Duration};

use kapsule_core::{
    Container, ContainerMode, EnterResult, OperationResult, PROTOCOL_VERSION, Request, Response,
};
use kapsule_ipc::Connection;

use crate::{
    bus::{Bus, BusError},
    progress::ProgressSink,
    tracker::OperationTracker,
};

const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Key under which `config()` reports a transport failure.
///
/// Existing consumers of the daemon expect a plain string map from the config
/// call even when the call fails, so errors are folded into this sentinel
/// entry instead of a structured result.
pub const CONFIG_ERROR_KEY: &str = "error";

/// Connection status established once at client construction.
///
/// A failed handshake is terminal for the client instance: `connected` stays
/// false and every operation call fails fast without touching the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub connected: bool,
    pub remote_version: String,
}

/// Façade over the daemon bus: one method per supported request kind.
///
/// Long-running calls (create/start/stop/delete) are wired through
/// [`OperationTracker`]; queries are single round-trips. The client is built
/// for one cooperative event loop and supports any number of concurrently
/// in-flight operations on that loop.
pub struct ServiceClient<B: Bus> {
    bus: B,
    state: ConnectionState,
    operation_timeout: Duration,
}

impl ServiceClient<Connection> {
    /// Connects to the daemon socket and performs the version handshake.
    ///
    /// A socket-level failure is an error; a connected socket whose handshake
    /// fails yields a client with `connected == false`.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, BusError> {
        let connection = Connection::connect(path).await.map_err(BusError::from)?;
        Ok(Self::handshake(connection).await)
    }
}

impl<B: Bus> ServiceClient<B> {
    /// Builds a client over any bus, probing the daemon version once.
    pub async fn handshake(bus: B) -> Self {
        let state = match bus.invoke(Request::Version {}).await {
            Ok(Response::Version { daemon, protocol }) => {
                if protocol == PROTOCOL_VERSION {
                    ConnectionState {
                        connected: true,
                        remote_version: daemon,
                    }
                } else {
                    tracing::warn!(
                        local = PROTOCOL_VERSION,
                        remote = protocol,
                        "daemon speaks a different protocol version"
                    );
                    ConnectionState {
                        connected: false,
                        remote_version: daemon,
                    }
                }
            }
            Ok(other) => {
                tracing::warn!(response = ?other, "unexpected handshake response");
                ConnectionState {
                    connected: false,
                    remote_version: String::new(),
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, "daemon handshake failed");
                ConnectionState {
                    connected: false,
                    remote_version: String::new(),
                }
            }
        };

        Self {
            bus,
            state,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Overrides the per-operation deadline.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected
    }

    /// Daemon version reported at handshake time; empty if it never answered.
    pub fn remote_version(&self) -> &str {
        &self.state.remote_version
    }

    pub fn connection_state(&self) -> &ConnectionState {
        &self.state
    }

    /// Creates a container and streams progress until the terminal event.
    pub async fn create_container(
        &self,
        name: &str,
        image: &str,
        mode: ContainerMode,
        sink: Option<&mut dyn ProgressSink>,
    ) -> OperationResult {
        let (session_mode, dbus_mux) = match mode {
            ContainerMode::Default => (false, false),
            ContainerMode::Session => (true, false),
            ContainerMode::DbusMux => (false, true),
        };
        self.run_operation(
            Request::CreateContainer {
                name: name.to_string(),
                image: image.to_string(),
                session_mode,
                dbus_mux,
            },
            sink,
        )
        .await
    }

    /// Starts a container.
    pub async fn start_container(
        &self,
        name: &str,
        sink: Option<&mut dyn ProgressSink>,
    ) -> OperationResult {
        self.run_operation(
            Request::StartContainer {
                name: name.to_string(),
            },
            sink,
        )
        .await
    }

    /// Stops a container.
    pub async fn stop_container(
        &self,
        name: &str,
        force: bool,
        sink: Option<&mut dyn ProgressSink>,
    ) -> OperationResult {
        self.run_operation(
            Request::StopContainer {
                name: name.to_string(),
                force,
            },
            sink,
        )
        .await
    }

    /// Deletes a container.
    pub async fn delete_container(
        &self,
        name: &str,
        force: bool,
        sink: Option<&mut dyn ProgressSink>,
    ) -> OperationResult {
        self.run_operation(
            Request::DeleteContainer {
                name: name.to_string(),
                force,
            },
            sink,
        )
        .await
    }

    /// Lists all containers as a point-in-time snapshot.
    ///
    /// Any transport failure yields an empty list; callers cannot distinguish
    /// "no containers" from "call failed". Kept for compatibility with the
    /// daemon's existing consumers; the failure is logged instead.
    pub async fn list_containers(&self) -> Vec<Container> {
        if !self.state.connected {
            return Vec::new();
        }

        match self.bus.invoke(Request::ListContainers {}).await {
            Ok(Response::Containers { containers }) => {
                containers.into_iter().map(Container::from).collect()
            }
            Ok(other) => {
                tracing::warn!(response = ?other, "unexpected response to container listing");
                Vec::new()
            }
            Err(err) => {
                tracing::debug!(error = %err, "container listing failed");
                Vec::new()
            }
        }
    }

    /// Fetches one container by name; `None` when unknown or unreachable.
    pub async fn container(&self, name: &str) -> Option<Container> {
        if !self.state.connected {
            return None;
        }

        match self
            .bus
            .invoke(Request::GetContainerInfo {
                name: name.to_string(),
            })
            .await
        {
            Ok(Response::ContainerInfo { container }) => Some(Container::from(container)),
            Ok(Response::Error { message, .. }) => {
                tracing::debug!(name, error = %message, "container query failed");
                None
            }
            Ok(other) => {
                tracing::warn!(response = ?other, "unexpected response to container query");
                None
            }
            Err(err) => {
                tracing::debug!(error = %err, "container query failed");
                None
            }
        }
    }

    /// Resolves the argv needed to enter a container.
    ///
    /// Synchronous at the daemon boundary, so no tracking is involved. On
    /// success `exec_args` must be handed verbatim to a process-replace
    /// primitive by the caller; this client never executes it.
    pub async fn prepare_enter(&self, name: &str, command: &[String]) -> EnterResult {
        if !self.state.connected {
            return EnterResult::failure(BusError::NotConnected.to_string());
        }

        match self
            .bus
            .invoke(Request::PrepareEnter {
                name: name.to_string(),
                command: command.to_vec(),
            })
            .await
        {
            Ok(Response::EnterPrepared {
                success,
                error,
                exec_args,
            }) => EnterResult {
                success,
                error,
                exec_args,
            },
            Ok(Response::Error { message, .. }) => EnterResult::failure(message),
            Ok(other) => {
                tracing::warn!(response = ?other, "unexpected response to enter preparation");
                EnterResult::failure("unexpected response from daemon")
            }
            Err(err) => EnterResult::failure(err.to_string()),
        }
    }

    /// Returns the daemon configuration.
    ///
    /// On any failure the map contains the single [`CONFIG_ERROR_KEY`] entry
    /// carrying the error text; existing consumers rely on this shape.
    pub async fn config(&self) -> BTreeMap<String, String> {
        let error = if !self.state.connected {
            BusError::NotConnected.to_string()
        } else {
            match self.bus.invoke(Request::GetConfig {}).await {
                Ok(Response::Config { entries }) => return entries,
                Ok(Response::Error { message, .. }) => message,
                Ok(other) => {
                    tracing::warn!(response = ?other, "unexpected response to config query");
                    "unexpected response from daemon".to_string()
                }
                Err(err) => err.to_string(),
            }
        };

        BTreeMap::from([(CONFIG_ERROR_KEY.to_string(), error)])
    }

    /// Issues one operation-starting call and tracks it to completion.
    ///
    /// Fails fast when disconnected, without a transport call. A rejected
    /// initiating call resolves immediately with the daemon's message and no
    /// subscription is ever created for it.
    async fn run_operation(
        &self,
        request: Request,
        sink: Option<&mut dyn ProgressSink>,
    ) -> OperationResult {
        if !self.state.connected {
            return OperationResult::failure(BusError::NotConnected.to_string());
        }

        let start = async {
            match self.bus.invoke(request).await {
                Ok(Response::OperationStarted { handle }) => Ok(handle),
                Ok(Response::Error { message, .. }) => Err(BusError::Rejected(message)),
                Ok(other) => Err(BusError::Rejected(format!(
                    "unexpected response to operation call: {other:?}"
                ))),
                Err(err) => Err(err),
            }
        };

        OperationTracker::new(&self.bus)
            .with_timeout(self.operation_timeout)
            .track(start, sink)
            .await
    }
}
