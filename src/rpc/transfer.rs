//! Transfer handlers for values crossing a channel
//!
//! Plain JSON travels as [`WireValue::Raw`]. Two named handlers cover the
//! rest: `proxy` hands over a live object by opening a private sub-channel to
//! it, and `throw` marshals thrown values so the caller can re-raise them.

use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::error::{RemoteError, Thrown};
use super::expose::{serve, Exposed};
use super::port::{port_pair, Port};
use super::protocol::WireValue;
use super::remote::Remote;

/// A value being sent to the other side
pub enum Transfer {
    Json(Value),
    /// Shared by reference through a private sub-channel
    Proxy(Arc<dyn Exposed>),
}

impl Transfer {
    pub fn proxy<E: Exposed + 'static>(target: E) -> Self {
        Transfer::Proxy(Arc::new(target))
    }
}

impl From<Value> for Transfer {
    fn from(value: Value) -> Self {
        Transfer::Json(value)
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transfer::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Transfer::Proxy(_) => f.write_str("Proxy(..)"),
        }
    }
}

/// A value received from the other side
#[derive(Debug, Clone)]
pub enum RemoteValue {
    Json(Value),
    Remote(Remote),
}

impl RemoteValue {
    /// Take the JSON payload, failing if the value is a remote reference
    pub fn into_json(self) -> Result<Value, RemoteError> {
        match self {
            RemoteValue::Json(value) => Ok(value),
            RemoteValue::Remote(_) => Err(RemoteError::decode(
                "expected a plain value, received a remote reference",
            )),
        }
    }

    /// Take the remote reference, failing if the value is plain JSON
    pub fn into_remote(self) -> Result<Remote, RemoteError> {
        match self {
            RemoteValue::Remote(remote) => Ok(remote),
            RemoteValue::Json(_) => Err(RemoteError::decode(
                "expected a remote reference, received a plain value",
            )),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            RemoteValue::Json(value) => Some(value),
            RemoteValue::Remote(_) => None,
        }
    }
}

/// Dynamic-reference handler
pub struct ProxyHandler;

impl ProxyHandler {
    pub const NAME: &'static str = "proxy";

    /// Serve `target` on a fresh private link and wrap the other end
    ///
    /// Must be called from within a tokio runtime; the responder runs as a task
    /// on that runtime.
    pub fn encode(target: Arc<dyn Exposed>) -> WireValue {
        let (local, remote) = port_pair();

        tokio::spawn(async move {
            match serve(target, local).await {
                Ok(exit) => debug!(?exit, "Proxied object responder stopped"),
                Err(e) => warn!(error = %e, "Proxied object responder failed"),
            }
        });

        WireValue::Handler {
            name: Self::NAME.to_string(),
            data: Value::Null,
            port: Some(remote),
        }
    }

    pub fn decode(port: Port) -> Remote {
        Remote::open(port)
    }
}

/// Thrown-value handler
pub struct ThrowHandler;

impl ThrowHandler {
    pub const NAME: &'static str = "throw";

    pub fn encode(thrown: &Thrown) -> WireValue {
        let data = match thrown {
            Thrown::Error {
                name,
                message,
                stack,
            } => json!({
                "isError": true,
                "value": { "name": name, "message": message, "stack": stack },
            }),
            Thrown::Value { value } => json!({ "isError": false, "value": value }),
        };

        WireValue::Handler {
            name: Self::NAME.to_string(),
            data,
            port: None,
        }
    }

    pub fn decode(data: Value) -> Result<Thrown, RemoteError> {
        let is_error = data
            .get("isError")
            .and_then(Value::as_bool)
            .ok_or_else(|| RemoteError::decode("thrown value is missing `isError`"))?;
        let value = data.get("value").cloned().unwrap_or(Value::Null);

        if !is_error {
            return Ok(Thrown::Value { value });
        }

        let field = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        Ok(Thrown::Error {
            name: field("name").unwrap_or_else(|| "Error".to_string()),
            message: field("message").unwrap_or_default(),
            stack: field("stack"),
        })
    }
}

/// Wrap an outgoing value for the wire
pub fn encode(transfer: Transfer) -> WireValue {
    match transfer {
        Transfer::Json(value) => WireValue::Raw(value),
        Transfer::Proxy(target) => ProxyHandler::encode(target),
    }
}

/// Unwrap an incoming value
///
/// A `throw` handler in value position re-raises the thrown value.
pub fn decode(wire: WireValue) -> Result<RemoteValue, RemoteError> {
    match wire {
        WireValue::Raw(value) => Ok(RemoteValue::Json(value)),
        WireValue::Handler { name, data, port } => match name.as_str() {
            ProxyHandler::NAME => port
                .map(|port| RemoteValue::Remote(ProxyHandler::decode(port)))
                .ok_or_else(|| RemoteError::decode("proxy value arrived without a port")),
            ThrowHandler::NAME => Err(RemoteError::Thrown(ThrowHandler::decode(data)?)),
            other => Err(RemoteError::decode(format!(
                "unknown transfer handler `{other}`"
            ))),
        },
    }
}

/// Unwrap the payload of a `Throw` outcome
pub fn decode_thrown(wire: WireValue) -> Result<Thrown, RemoteError> {
    match wire {
        WireValue::Raw(value) => Ok(Thrown::Value { value }),
        WireValue::Handler { name, data, .. } if name == ThrowHandler::NAME => {
            ThrowHandler::decode(data)
        }
        WireValue::Handler { name, .. } => Err(RemoteError::decode(format!(
            "thrown value encoded with unexpected handler `{name}`"
        ))),
    }
}
