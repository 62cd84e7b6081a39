//! # Error taxonomy
//!
//! Every failure the messaging core can surface is a variant of [`RpcError`].
//! The same value travels through the synchronous call path, the async
//! callback path and the dispatcher, and converts losslessly to the wire
//! [`ErrorObject`](crate::message::ErrorObject).
//!
//! | Variant | Code |
//! |---------|------|
//! | [`RpcError::Parse`] | `-32700` |
//! | [`RpcError::InvalidRequest`] | `-32600` |
//! | [`RpcError::MethodNotFound`] | `-32601` |
//! | [`RpcError::InvalidParams`], [`RpcError::MonitorNotFound`], [`RpcError::AgentAlreadyExists`] | `-32602` |
//! | [`RpcError::InternalError`], [`RpcError::Storage`] | `-32603` |
//! | [`RpcError::Timeout`] | `-32001` |
//! | [`RpcError::NoTransportForScheme`] | `-32002` |
//! | [`RpcError::InvalidEvent`] | `-32003` |
//! | [`RpcError::AgentNotFound`] | `-32004` |
//! | [`RpcError::Transport`] | `-32005` |
//! | [`RpcError::AccessDenied`] | `-32006` |
//! | [`RpcError::Remote`] | whatever the callee reported |

use thiserror::Error;

use crate::message::ErrorObject;

pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const TIMEOUT: i64 = -32001;
    pub const NO_TRANSPORT_FOR_SCHEME: i64 = -32002;
    pub const INVALID_EVENT: i64 = -32003;
    pub const AGENT_NOT_FOUND: i64 = -32004;
    pub const TRANSPORT_FAILURE: i64 = -32005;
    pub const ACCESS_DENIED: i64 = -32006;
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Request timed out: {request_id} after {timeout_ms}ms")]
    Timeout { request_id: String, timeout_ms: u64 },

    #[error("No transport known for scheme: {0}")]
    NoTransportForScheme(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Cannot trigger event: {0}")]
    InvalidEvent(String),

    #[error("Access denied: {method} for sender {sender}")]
    AccessDenied { method: String, sender: String },

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Agent already registered: {0}")]
    AgentAlreadyExists(String),

    #[error("Result monitor not found: {0}")]
    MonitorNotFound(String),

    #[error("State storage failure: {0}")]
    Storage(String),

    /// Error reported by the callee of a remote call.
    #[error("Remote error {code}: {message}")]
    Remote { code: i64, message: String },
}

impl RpcError {
    pub fn code(&self) -> i64 {
        match self {
            Self::Parse(_) => codes::PARSE_ERROR,
            Self::InvalidRequest(_) => codes::INVALID_REQUEST,
            Self::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            Self::InvalidParams(_) | Self::MonitorNotFound(_) | Self::AgentAlreadyExists(_) => {
                codes::INVALID_PARAMS
            }
            Self::InternalError(_) | Self::Storage(_) => codes::INTERNAL_ERROR,
            Self::Timeout { .. } => codes::TIMEOUT,
            Self::NoTransportForScheme(_) => codes::NO_TRANSPORT_FOR_SCHEME,
            Self::InvalidEvent(_) => codes::INVALID_EVENT,
            Self::AgentNotFound(_) => codes::AGENT_NOT_FOUND,
            Self::Transport(_) => codes::TRANSPORT_FAILURE,
            Self::AccessDenied { .. } => codes::ACCESS_DENIED,
            Self::Remote { code, .. } => *code,
        }
    }

    /// Converts into the wire shape sent back to a caller.
    ///
    /// A [`RpcError::Remote`] keeps the callee's original message so that
    /// relayed errors are not wrapped twice.
    pub fn to_error_object(&self) -> ErrorObject {
        let message = match self {
            Self::Remote { message, .. } => message.clone(),
            other => other.to_string(),
        };
        ErrorObject {
            code: self.code(),
            message,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<ErrorObject> for RpcError {
    fn from(error: ErrorObject) -> Self {
        RpcError::Remote {
            code: error.code,
            message: error.message,
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(error: serde_json::Error) -> Self {
        RpcError::Parse(error.to_string())
    }
}

pub type RpcResult<T> = Result<T, RpcError>;
