//! Error types for the agent runtime
//!
//! Every failure inside the runtime is one of these variants. Only a few of
//! them ever reach a caller as an `Err`: opening a stream, building options,
//! creating a runner. Once a task is streaming, failures are converted into
//! `error` messages (or `tool_result` blocks flagged `is_error`) so that no
//! error escapes the stream boundary.

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the runtime
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// API error from the model server (non-success status, vendor error event)
    #[error("API error: {0}")]
    Api(String),

    /// Streaming error
    #[error("Streaming error: {0}")]
    Stream(String),

    /// Network-layer failure; the only class that is retried
    #[error("Connection error: {0}")]
    Connection(String),

    /// The task's cancellation token fired
    #[error("Operation cancelled")]
    Cancelled,

    /// Tool execution error
    #[error("Tool execution error: {0}")]
    Tool(String),

    /// Generation stopped because the token budget ran out
    #[error("Maximum output tokens reached")]
    MaxTokens,

    /// Malformed tool-call payload or unfetchable media
    #[error("Parse error: {0}")]
    Parse(String),

    /// Malformed history entry
    #[error("Validation error: {0}")]
    Validation(String),

    /// Timeout error
    #[error("Request timeout")]
    Timeout,

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new API error
    pub fn api(msg: impl Into<String>) -> Self {
        Error::Api(msg.into())
    }

    /// Create a new stream error
    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    /// Create a new connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Error::Connection(msg.into())
    }

    /// Create a new tool error
    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    /// Create a new parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }

    /// Create a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a new other error
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Create a timeout error
    pub fn timeout() -> Self {
        Error::Timeout
    }

    /// Classify a failure from `RequestBuilder::send`.
    ///
    /// Anything that went wrong before a response status was received is a
    /// network-layer failure and therefore a [`Error::Connection`]; request
    /// building mistakes stay [`Error::Http`] so they are not retried.
    pub fn from_send(err: reqwest::Error) -> Self {
        if err.is_builder() {
            Error::Http(err)
        } else if err.is_timeout() {
            Error::Timeout
        } else {
            Error::Connection(err.to_string())
        }
    }

    /// Whether this error belongs to the connection class
    pub fn is_connection(&self) -> bool {
        match self {
            Error::Connection(_) | Error::Timeout => true,
            Error::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}
