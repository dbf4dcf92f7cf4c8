//! # Remote Call Protocol
//!
//! Message shapes exchanged over a [`Port`](super::port::Port). Each request
//! carries a fresh correlation id that the responder echoes on its reply.
//!
//! | Request     | Meaning                                              |
//! |-------------|------------------------------------------------------|
//! | `GET`       | read the value reached by `path`                     |
//! | `SET`       | write the value addressed by `path`                  |
//! | `APPLY`     | call the function at `path` with arguments           |
//! | `CONSTRUCT` | instantiate the class at `path`, reply is a reference |
//! | `ENDPOINT`  | open a fresh sub-channel bound to the same root      |
//! | `RELEASE`   | detach the channel and stop serving it               |
//!
//! Values are wrapped as [`WireValue::Raw`] (passed through) or
//! [`WireValue::Handler`] (encoded by a named transfer handler, possibly
//! carrying a port for a private sub-channel).

use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use super::port::Port;

/// Ordered list of property names from the exposed root
pub type Path = Vec<String>;

/// Envelope for everything that crosses a link
#[derive(Debug)]
pub struct Message {
    /// Correlation id, echoed on the response
    pub id: Uuid,
    pub body: MessageBody,
}

impl Message {
    /// Create a request with a fresh correlation id
    pub fn request(request: Request) -> Self {
        Self {
            id: Uuid::new_v4(),
            body: MessageBody::Request(request),
        }
    }

    /// Create a response to the request with the given id
    pub fn response(id: Uuid, outcome: Outcome) -> Self {
        Self {
            id,
            body: MessageBody::Response(outcome),
        }
    }
}

#[derive(Debug)]
pub enum MessageBody {
    Request(Request),
    Response(Outcome),
}

/// Caller-to-responder requests
#[derive(Debug)]
pub enum Request {
    Get { path: Path },
    Set { path: Path, value: WireValue },
    Apply { path: Path, args: Vec<WireValue> },
    Construct { path: Path, args: Vec<WireValue> },
    Endpoint,
    Release,
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Get { .. } => RequestKind::Get,
            Request::Set { .. } => RequestKind::Set,
            Request::Apply { .. } => RequestKind::Apply,
            Request::Construct { .. } => RequestKind::Construct,
            Request::Endpoint => RequestKind::Endpoint,
            Request::Release => RequestKind::Release,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Get,
    Set,
    Apply,
    Construct,
    Endpoint,
    Release,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::Get => "GET",
            RequestKind::Set => "SET",
            RequestKind::Apply => "APPLY",
            RequestKind::Construct => "CONSTRUCT",
            RequestKind::Endpoint => "ENDPOINT",
            RequestKind::Release => "RELEASE",
        };
        f.write_str(name)
    }
}

/// Responder-to-caller result of one request
#[derive(Debug)]
pub enum Outcome {
    Return(WireValue),
    /// The request raised; the value is encoded through the `throw` handler
    Throw(WireValue),
}

/// A value on the wire
#[derive(Debug)]
pub enum WireValue {
    /// Passed through unchanged
    Raw(Value),
    /// Encoded by the named transfer handler
    Handler {
        name: String,
        data: Value,
        port: Option<Port>,
    },
}

impl WireValue {
    pub fn raw(value: impl Into<Value>) -> Self {
        WireValue::Raw(value.into())
    }

    /// Handler name, if this value needs a handler to decode
    pub fn handler_name(&self) -> Option<&str> {
        match self {
            WireValue::Raw(_) => None,
            WireValue::Handler { name, .. } => Some(name),
        }
    }
}
