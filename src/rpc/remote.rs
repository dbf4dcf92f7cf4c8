//! # Remote Stub
//!
//! [`Remote`] is a lazily built path into an exposed object. Extending the
//! path with [`Remote::path`] never touches the channel; only `get`, `set`,
//! `invoke`, `construct`, `endpoint` and `release` send a message.
//!
//! ## Usage
//!
//! ```rust,no_run
//! # use workpool::rpc::{Remote, Transfer};
//! # use serde_json::json;
//! # async fn demo(remote: Remote) -> Result<(), workpool::rpc::RemoteError> {
//! let total = remote.path("math").path("add").invoke(vec![json!(1).into(), json!(2).into()]).await?;
//! let counter = remote.path("counter").get().await?;
//! remote.release().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Every clone of a stub keeps its channel alive. Dropping the last one sends
//! `RELEASE` on a best-effort basis; call [`Remote::release`] for deterministic
//! teardown.

use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::channel::{ChannelFault, RemoteChannel};
use super::error::{RemoteError, Thrown};
use super::port::Port;
use super::protocol::{Outcome, Path, Request};
use super::transfer::{self, RemoteValue, Transfer};

#[derive(Clone)]
pub struct Remote {
    channel: Arc<RemoteChannel>,
    path: Path,
}

impl Remote {
    /// Wrap the caller end of a link
    pub fn open(port: Port) -> Self {
        Self {
            channel: RemoteChannel::open(port, None),
            path: Vec::new(),
        }
    }

    /// Wrap the caller end of a link, reporting infrastructure faults to `faults`
    pub fn open_with_faults(port: Port, faults: mpsc::UnboundedSender<ChannelFault>) -> Self {
        Self {
            channel: RemoteChannel::open(port, Some(faults)),
            path: Vec::new(),
        }
    }

    /// Extend the path by one property name
    pub fn path(&self, segment: impl Into<String>) -> Remote {
        let mut path = self.path.clone();
        path.push(segment.into());
        Remote {
            channel: Arc::clone(&self.channel),
            path,
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.path
    }

    pub fn depth(&self) -> usize {
        self.path.len()
    }

    pub fn is_released(&self) -> bool {
        self.channel.is_released()
    }

    pub fn channel_id(&self) -> Uuid {
        self.channel.id()
    }

    /// Number of stubs sharing this stub's channel
    pub fn stub_count(&self) -> usize {
        Arc::strong_count(&self.channel)
    }

    /// Read the value at this path
    ///
    /// At depth zero there is nothing to fetch; the stub itself is returned.
    pub async fn get(&self) -> Result<RemoteValue, RemoteError> {
        self.ensure_live()?;
        if self.path.is_empty() {
            return Ok(RemoteValue::Remote(self.clone()));
        }

        let outcome = self
            .channel
            .request(Request::Get {
                path: self.path.clone(),
            })
            .await?;
        self.settle(outcome)
    }

    /// Write the value at this path
    pub async fn set(&self, value: impl Into<Transfer>) -> Result<(), RemoteError> {
        self.ensure_live()?;
        if self.path.is_empty() {
            return Err(RemoteError::Thrown(Thrown::type_error(
                "cannot assign to the root object",
            )));
        }

        let outcome = self
            .channel
            .request(Request::Set {
                path: self.path.clone(),
                value: transfer::encode(value.into()),
            })
            .await?;
        self.settle(outcome).map(|_| ())
    }

    /// Call the function at this path
    pub async fn invoke(&self, args: Vec<Transfer>) -> Result<RemoteValue, RemoteError> {
        self.ensure_live()?;
        let outcome = self
            .channel
            .request(Request::Apply {
                path: self.path.clone(),
                args: args.into_iter().map(transfer::encode).collect(),
            })
            .await?;
        self.settle(outcome)
    }

    /// Shorthand for `path(method).invoke(args)`
    pub async fn call(&self, method: &str, args: Vec<Transfer>) -> Result<RemoteValue, RemoteError> {
        self.path(method).invoke(args).await
    }

    /// Instantiate the class at this path; the instance stays on the far side
    pub async fn construct(&self, args: Vec<Transfer>) -> Result<Remote, RemoteError> {
        self.ensure_live()?;
        let outcome = self
            .channel
            .request(Request::Construct {
                path: self.path.clone(),
                args: args.into_iter().map(transfer::encode).collect(),
            })
            .await?;
        self.settle(outcome)?.into_remote()
    }

    /// Open a fresh sub-channel bound to the same exposed root
    pub async fn endpoint(&self) -> Result<Remote, RemoteError> {
        self.ensure_live()?;
        let outcome = self.channel.request(Request::Endpoint).await?;
        self.settle(outcome)?.into_remote()
    }

    /// Release the channel; every stub sharing it fails fast afterwards
    pub async fn release(&self) -> Result<(), RemoteError> {
        self.channel.release().await
    }

    fn ensure_live(&self) -> Result<(), RemoteError> {
        if self.channel.is_released() {
            Err(RemoteError::Released)
        } else {
            Ok(())
        }
    }

    fn settle(&self, outcome: Outcome) -> Result<RemoteValue, RemoteError> {
        let result = match outcome {
            Outcome::Return(value) => transfer::decode(value),
            Outcome::Throw(value) => match transfer::decode_thrown(value) {
                Ok(thrown) => Err(RemoteError::Thrown(thrown)),
                Err(e) => Err(e),
            },
        };

        if let Err(RemoteError::Decode { message }) = &result {
            self.channel
                .report(ChannelFault::MessageError(message.clone()));
        }
        result
    }
}

impl fmt::Debug for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Remote")
            .field("channel", &self.channel.id())
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::expose::{serve, single_segment, Exposed};
    use crate::rpc::port::port_pair;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Calculator {
        applied: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Exposed for Calculator {
        async fn get(&self, path: &[String]) -> Result<Transfer, Thrown> {
            match single_segment(path)? {
                "name" => Ok(json!("calculator").into()),
                other => Err(Thrown::error("ReferenceError", format!("{other} is not defined"))),
            }
        }

        async fn apply(&self, path: &[String], args: Vec<RemoteValue>) -> Result<Transfer, Thrown> {
            self.applied.fetch_add(1, Ordering::SeqCst);
            match single_segment(path)? {
                "add" => {
                    let sum: i64 = args
                        .iter()
                        .filter_map(|arg| arg.as_json().and_then(Value::as_i64))
                        .sum();
                    Ok(json!(sum).into())
                }
                "fail" => Err(Thrown::value(json!("plain failure"))),
                other => Err(Thrown::type_error(format!("{other} is not a function"))),
            }
        }
    }

    fn start(applied: Arc<AtomicUsize>) -> Remote {
        let (caller, responder) = port_pair();
        tokio::spawn(serve(Arc::new(Calculator { applied }), responder));
        Remote::open(caller)
    }

    #[tokio::test]
    async fn test_path_building_is_lazy() {
        let applied = Arc::new(AtomicUsize::new(0));
        let remote = start(Arc::clone(&applied));

        let stub = remote.path("a").path("b").path("c");
        assert_eq!(stub.segments().join("."), "a.b.c");
        assert_eq!(remote.depth(), 0);
        assert_eq!(applied.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_get_at_root_returns_stub_without_a_call() {
        let applied = Arc::new(AtomicUsize::new(0));
        let remote = start(Arc::clone(&applied));

        let value = remote.get().await.unwrap();
        let stub = value.into_remote().unwrap();
        assert_eq!(stub.channel_id(), remote.channel_id());
        assert_eq!(stub.depth(), 0);
    }

    #[tokio::test]
    async fn test_invoke_and_get() {
        let applied = Arc::new(AtomicUsize::new(0));
        let remote = start(Arc::clone(&applied));

        let sum = remote
            .call("add", vec![json!(2).into(), json!(40).into()])
            .await
            .unwrap();
        assert_eq!(sum.into_json().unwrap(), json!(42));

        let name = remote.path("name").get().await.unwrap();
        assert_eq!(name.into_json().unwrap(), json!("calculator"));
    }

    #[tokio::test]
    async fn test_thrown_values_are_reraised() {
        let applied = Arc::new(AtomicUsize::new(0));
        let remote = start(Arc::clone(&applied));

        let err = remote.call("fail", vec![]).await.unwrap_err();
        assert_eq!(err.thrown(), Some(&Thrown::value(json!("plain failure"))));

        let err = remote.path("missing").get().await.unwrap_err();
        assert_eq!(err.thrown().and_then(Thrown::name), Some("ReferenceError"));

        let err = remote.path("name").set(json!("x")).await.unwrap_err();
        assert_eq!(err.thrown().and_then(Thrown::name), Some("TypeError"));
    }

    #[tokio::test]
    async fn test_released_stub_fails_fast() {
        let applied = Arc::new(AtomicUsize::new(0));
        let remote = start(Arc::clone(&applied));
        let nested = remote.path("add");

        remote.release().await.unwrap();

        assert!(nested.is_released());
        assert_eq!(nested.invoke(vec![]).await.unwrap_err(), RemoteError::Released);
        assert_eq!(remote.get().await.unwrap_err(), RemoteError::Released);
        assert_eq!(applied.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_clones_share_the_channel() {
        let applied = Arc::new(AtomicUsize::new(0));
        let remote = start(Arc::clone(&applied));
        assert_eq!(remote.stub_count(), 1);

        let nested = remote.path("add");
        assert_eq!(remote.stub_count(), 2);
        drop(nested);
        assert_eq!(remote.stub_count(), 1);
    }
}
