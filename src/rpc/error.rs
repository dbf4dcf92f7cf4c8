//! Remote call errors and thrown values

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A value thrown by the far side of a channel
///
/// Error-like values keep their identity (`name`, `message`, `stack`) when they
/// cross the boundary. Anything else that was thrown travels through verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Thrown {
    /// An error with a name, a message and an optional stack trace
    Error {
        name: String,
        message: String,
        stack: Option<String>,
    },
    /// A non-error thrown value (string, number, object...)
    Value { value: Value },
}

impl Thrown {
    /// Create a thrown error with the given name and message
    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Thrown::Error {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Create a `TypeError`, used for unsupported operations on exposed objects
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::error("TypeError", message)
    }

    /// Create a thrown non-error value
    pub fn value(value: impl Into<Value>) -> Self {
        Thrown::Value {
            value: value.into(),
        }
    }

    /// Attach a stack trace to an error. Non-error values are returned unchanged.
    pub fn with_stack(self, stack: impl Into<String>) -> Self {
        match self {
            Thrown::Error { name, message, .. } => Thrown::Error {
                name,
                message,
                stack: Some(stack.into()),
            },
            other => other,
        }
    }

    /// Whether this is an error-like value
    pub fn is_error(&self) -> bool {
        matches!(self, Thrown::Error { .. })
    }

    /// Error name, if error-like
    pub fn name(&self) -> Option<&str> {
        match self {
            Thrown::Error { name, .. } => Some(name),
            Thrown::Value { .. } => None,
        }
    }

    /// Error message, if error-like
    pub fn message(&self) -> Option<&str> {
        match self {
            Thrown::Error { message, .. } => Some(message),
            Thrown::Value { .. } => None,
        }
    }
}

impl fmt::Display for Thrown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Thrown::Error { name, message, .. } => write!(f, "{name}: {message}"),
            Thrown::Value { value } => write!(f, "{value}"),
        }
    }
}

/// Errors surfaced by remote calls
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    #[error("Remote stub has been released")]
    Released,

    #[error("Remote channel closed before a response arrived")]
    ChannelClosed,

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Undecodable message: {message}")]
    Decode { message: String },

    #[error("Remote threw {0}")]
    Thrown(Thrown),
}

impl RemoteError {
    pub(crate) fn decode(message: impl Into<String>) -> Self {
        RemoteError::Decode {
            message: message.into(),
        }
    }

    /// The thrown value, when the far side raised one
    pub fn thrown(&self) -> Option<&Thrown> {
        match self {
            RemoteError::Thrown(thrown) => Some(thrown),
            _ => None,
        }
    }
}

/// Fatal failure of a responder loop
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServeError {
    #[error("request handler panicked: {0}")]
    Panicked(String),
}
