use serde::{Deserialize, Serialize};

/// High-level category attached to daemon error responses.
///
/// Carried for diagnostics only: the client collapses every failure into a
/// human-readable message, so callers never branch on the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    NotFound,
    AlreadyExists,
    NotConnected,
    Timeout,
    ProtocolMismatch,
    Internal,
}
