use std::fmt;

use serde::{Deserialize, Serialize};

/// Correlates a response to a request in IPC streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReqId(
    /// Monotonic numeric request identifier.
    pub u64,
);

/// Identifies one in-flight long-running daemon operation.
///
/// Returned by an operation-starting call and never reused by the daemon
/// while a tracker for it is still open. The token is opaque to the client;
/// it only ever compares handles for equality and echoes them back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationHandle(
    /// Opaque operation token string.
    pub String,
);

impl OperationHandle {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
