//! Error types for the control plane.

use cinder_ipc::transport::IpcError;
use thiserror::Error;

/// Result type for control-plane operations.
pub type ControlResult<T> = Result<T, ControlError>;

/// Error types that can occur in control-plane operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Operation requires an active, authorized profile that does not exist
    #[error("tunnel profile has not been prepared")]
    NotPrepared,

    /// The user or platform declined activation
    #[error("tunnel activation was not authorized")]
    AuthorizationDenied,

    /// No response within the timeout window, or the worker is not running
    #[error("tunnel worker unreachable: {0}")]
    TunnelUnreachable(String),

    /// Profile save/load error
    #[error("profile persistence failure: {0}")]
    PersistenceFailure(String),

    /// Payload could not be serialized or deserialized
    #[error("encoding failure: {0}")]
    EncodingFailure(String),

    /// Required command argument missing or empty
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ControlError {
    /// Stable bridge-facing error code.
    pub fn code(&self) -> &'static str {
        match self {
            ControlError::NotPrepared => "NOT_PREPARED",
            ControlError::AuthorizationDenied => "AUTHORIZATION_DENIED",
            ControlError::TunnelUnreachable(_) => "TUNNEL_UNREACHABLE",
            ControlError::PersistenceFailure(_) => "PERSISTENCE_FAILURE",
            ControlError::EncodingFailure(_) => "ENCODING_FAILURE",
            ControlError::InvalidArgument(_) => "INVALID_ARGUMENT",
        }
    }

    /// Caller-visible `(code, message)` pair for the UI bridge.
    pub fn reply(&self) -> (&'static str, String) {
        (self.code(), self.to_string())
    }
}

impl From<IpcError> for ControlError {
    fn from(err: IpcError) -> Self {
        match err {
            IpcError::Serialization(e) => ControlError::EncodingFailure(e.to_string()),
            IpcError::Timeout(msg) => ControlError::TunnelUnreachable(msg),
            IpcError::Io(e) => ControlError::TunnelUnreachable(e.to_string()),
            IpcError::Connection(msg) => ControlError::TunnelUnreachable(msg),
            IpcError::Protocol(msg) => ControlError::TunnelUnreachable(msg),
        }
    }
}
