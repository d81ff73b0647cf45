//! Error types for the sockrt runtime
//!
//! Two families live here. `RuntimeError` is the Rust-side error returned by
//! fallible runtime APIs (loop start, config loading, channel plumbing).
//! `IpcError` is the wire-level error object that ends up in the `err` field of
//! a reply delivered to the web view.

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Runtime Errors
// ----------------------------------------------------------------------------

/// Core error type for the sockrt runtime
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The reactor could not be created; the process cannot proceed
    #[error("Event loop initialization failed: {reason}")]
    LoopInit { reason: String },

    /// Cross-thread channel communication error
    #[error("Channel error: {message}")]
    Channel { message: String },

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),
}

/// Result type alias for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

impl RuntimeError {
    /// Create a loop initialization error with a reason
    pub fn loop_init<T: Into<String>>(reason: T) -> Self {
        RuntimeError::LoopInit {
            reason: reason.into(),
        }
    }

    /// Create a channel error with a message
    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        RuntimeError::Channel {
            message: message.into(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        RuntimeError::Configuration {
            reason: reason.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Wire Error Taxonomy
// ----------------------------------------------------------------------------

/// The `type` tag carried by an error object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorType {
    NotFoundError,
    InternalError,
}

/// Socket state errors surfaced by the UDP module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketError {
    AlreadyBound,
    IsConnected,
    NotConnected,
    Closed,
    Closing,
    NotRunning,
}

impl SocketError {
    /// Stable error code string
    pub fn code(&self) -> &'static str {
        match self {
            SocketError::AlreadyBound => "ERR_SOCKET_ALREADY_BOUND",
            SocketError::IsConnected => "ERR_SOCKET_DGRAM_IS_CONNECTED",
            SocketError::NotConnected => "ERR_SOCKET_DGRAM_NOT_CONNECTED",
            SocketError::Closed => "ERR_SOCKET_DGRAM_CLOSED",
            SocketError::Closing => "ERR_SOCKET_DGRAM_CLOSING",
            SocketError::NotRunning => "ERR_SOCKET_DGRAM_NOT_RUNNING",
        }
    }

    /// Error type tag for this code
    pub fn error_type(&self) -> ErrorType {
        match self {
            SocketError::AlreadyBound | SocketError::IsConnected | SocketError::NotConnected => {
                ErrorType::InternalError
            }
            SocketError::Closed | SocketError::Closing | SocketError::NotRunning => {
                ErrorType::NotFoundError
            }
        }
    }

    /// Human readable message
    pub fn message(&self) -> &'static str {
        match self {
            SocketError::AlreadyBound => "Socket is already bound",
            SocketError::IsConnected => "Already connected",
            SocketError::NotConnected => "Not connected",
            SocketError::Closed => "Socket is closed",
            SocketError::Closing => "Socket is closing",
            SocketError::NotRunning => "Not running",
        }
    }
}

/// An error object delivered to the web view inside a reply's `err` field
///
/// Serializes to `{"id"?, "type"?, "code"?, "message"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct IpcError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

impl IpcError {
    /// Create a bare error carrying only a message
    pub fn message<T: Into<String>>(message: T) -> Self {
        Self {
            id: None,
            kind: None,
            code: None,
            message: message.into(),
        }
    }

    /// A required parameter was absent or empty
    pub fn missing_parameter(param: &str) -> Self {
        Self::message(format!("Expecting '{}' in parameters", param))
    }

    /// A parameter was present but could not be parsed
    pub fn invalid_parameter(param: &str) -> Self {
        Self::message(format!("Invalid '{}' given in parameters", param))
    }

    /// Create a `NotFoundError`
    pub fn not_found<T: Into<String>>(message: T) -> Self {
        Self {
            kind: Some(ErrorType::NotFoundError),
            ..Self::message(message)
        }
    }

    /// Create an `InternalError`
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self {
            kind: Some(ErrorType::InternalError),
            ..Self::message(message)
        }
    }

    /// Create a socket state error for the given peer id
    pub fn socket(id: impl ToString, err: SocketError) -> Self {
        Self {
            id: Some(id.to_string()),
            kind: Some(err.error_type()),
            code: Some(err.code().to_string()),
            message: err.message().to_string(),
        }
    }

    /// Attach a resource id
    pub fn with_id(mut self, id: impl ToString) -> Self {
        self.id = Some(id.to_string());
        self
    }

    /// Attach an error code
    pub fn with_code<T: Into<String>>(mut self, code: T) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Render as a JSON value for the `err` field
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({ "message": self.message }))
    }
}
