//! # Responder Side
//!
//! An [`Exposed`] object lives on the far side of a channel. [`serve`] reads
//! requests from a port, dispatches each one to the object on its own task and
//! posts the correlated response.
//!
//! ## Lifecycle
//!
//! - `RELEASE` runs [`Exposed::release`], acknowledges and stops the loop.
//! - The caller dropping its end stops the loop with [`ServeExit::Disconnected`].
//! - A panic inside any request task is fatal for the loop.

use async_trait::async_trait;
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

use super::error::{ServeError, Thrown};
use super::port::Port;
use super::protocol::{Message, MessageBody, Outcome, Request, WireValue};
use super::transfer::{self, ProxyHandler, RemoteValue, ThrowHandler, Transfer};

/// An object reachable through a channel
#[async_trait]
pub trait Exposed: Send + Sync {
    /// Read the value at `path`
    async fn get(&self, path: &[String]) -> Result<Transfer, Thrown> {
        Err(Thrown::type_error(format!(
            "property `{}` is not readable",
            path.join(".")
        )))
    }

    /// Write the value at `path`
    async fn set(&self, path: &[String], _value: RemoteValue) -> Result<(), Thrown> {
        Err(Thrown::type_error(format!(
            "property `{}` is not writable",
            path.join(".")
        )))
    }

    /// Call the function at `path`
    async fn apply(&self, path: &[String], args: Vec<RemoteValue>) -> Result<Transfer, Thrown>;

    /// Instantiate the class at `path`. The new instance is returned by reference.
    async fn construct(
        &self,
        path: &[String],
        _args: Vec<RemoteValue>,
    ) -> Result<Arc<dyn Exposed>, Thrown> {
        Err(Thrown::type_error(format!(
            "`{}` is not a constructor",
            path.join(".")
        )))
    }

    /// Teardown hook run when the caller releases the channel
    async fn release(&self) {}
}

/// Why a serve loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeExit {
    /// The caller sent `RELEASE`
    Released,
    /// The caller dropped its end of the link
    Disconnected,
    /// The shutdown future resolved
    Shutdown,
}

/// Serve `root` on `port` until released or disconnected
pub async fn serve(root: Arc<dyn Exposed>, port: Port) -> Result<ServeExit, ServeError> {
    serve_until(root, port, std::future::pending::<()>()).await
}

/// Serve `root` on `port` until released, disconnected, or `shutdown` resolves
pub async fn serve_until<F>(
    root: Arc<dyn Exposed>,
    port: Port,
    shutdown: F,
) -> Result<ServeExit, ServeError>
where
    F: Future<Output = ()>,
{
    let (sender, mut receiver) = port.split();
    let mut tasks = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => return Ok(ServeExit::Shutdown),

            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        return Err(ServeError::Panicked(panic_message(e.into_panic())));
                    }
                }
            }

            message = receiver.recv() => {
                let Some(Message { id, body }) = message else {
                    return Ok(ServeExit::Disconnected);
                };

                let request = match body {
                    MessageBody::Request(request) => request,
                    MessageBody::Response(_) => {
                        warn!(message_id = %id, "Responder received a response, ignoring");
                        continue;
                    }
                };
                trace!(message_id = %id, kind = %request.kind(), "Request received");

                if let Request::Release = request {
                    root.release().await;
                    if sender
                        .send(Message::response(id, Outcome::Return(WireValue::Raw(Value::Null))))
                        .is_err()
                    {
                        debug!(message_id = %id, "Caller gone before release acknowledgement");
                    }
                    return Ok(ServeExit::Released);
                }

                let root = Arc::clone(&root);
                let sender = sender.clone();
                tasks.spawn(async move {
                    let outcome = handle_request(root, request).await;
                    if sender.send(Message::response(id, outcome)).is_err() {
                        debug!(message_id = %id, "Caller gone before response");
                    }
                });
            }
        }
    }
}

async fn handle_request(root: Arc<dyn Exposed>, request: Request) -> Outcome {
    let result = match request {
        Request::Get { path } => root.get(&path).await.map(transfer::encode),
        Request::Set { path, value } => match decode_value(value) {
            Ok(value) => root
                .set(&path, value)
                .await
                .map(|_| WireValue::Raw(Value::Bool(true))),
            Err(thrown) => Err(thrown),
        },
        Request::Apply { path, args } => match decode_args(args) {
            Ok(args) => root.apply(&path, args).await.map(transfer::encode),
            Err(thrown) => Err(thrown),
        },
        Request::Construct { path, args } => match decode_args(args) {
            Ok(args) => root.construct(&path, args).await.map(ProxyHandler::encode),
            Err(thrown) => Err(thrown),
        },
        Request::Endpoint => Ok(ProxyHandler::encode(root)),
        Request::Release => Ok(WireValue::Raw(Value::Null)),
    };

    match result {
        Ok(value) => Outcome::Return(value),
        Err(thrown) => Outcome::Throw(ThrowHandler::encode(&thrown)),
    }
}

fn decode_value(value: WireValue) -> Result<RemoteValue, Thrown> {
    transfer::decode(value).map_err(|e| Thrown::error("DataCloneError", e.to_string()))
}

fn decode_args(args: Vec<WireValue>) -> Result<Vec<RemoteValue>, Thrown> {
    args.into_iter().map(decode_value).collect()
}

/// Render a panic payload as text
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// The method name for a root-level call, or a `TypeError` for nested paths
pub fn single_segment(path: &[String]) -> Result<&str, Thrown> {
    match path {
        [name] => Ok(name.as_str()),
        [] => Err(Thrown::type_error("the root object is not callable")),
        _ => Err(Thrown::type_error(format!(
            "`{}` is not a function",
            path.join(".")
        ))),
    }
}
