//! Caller side of a channel: pending call table, reader task and fault reporting

use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::error::RemoteError;
use super::port::{Port, PortReceiver, PortSender};
use super::protocol::{Message, MessageBody, Outcome, Request};

/// Infrastructure failure observed on a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelFault {
    /// Posting a message failed
    Transport(String),
    /// A message could not be understood
    MessageError(String),
    /// The link closed without a release
    Closed,
}

impl fmt::Display for ChannelFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelFault::Transport(cause) => write!(f, "transport error: {cause}"),
            ChannelFault::MessageError(cause) => write!(f, "message error: {cause}"),
            ChannelFault::Closed => f.write_str("channel closed unexpectedly"),
        }
    }
}

/// A live link to an exposed object
///
/// Shared by every [`Remote`](super::remote::Remote) stub built on it. The
/// `Arc` strong count is the stub count; when the last stub goes away the
/// channel sends a fire-and-forget `RELEASE` unless it was released explicitly.
pub struct RemoteChannel {
    id: Uuid,
    sender: PortSender,
    pending: DashMap<Uuid, oneshot::Sender<Outcome>>,
    released: AtomicBool,
    closed: AtomicBool,
    faults: Option<mpsc::UnboundedSender<ChannelFault>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteChannel {
    /// Open a channel over `port`, spawning its reader on the current runtime
    pub fn open(port: Port, faults: Option<mpsc::UnboundedSender<ChannelFault>>) -> Arc<Self> {
        let (sender, receiver) = port.split();
        let channel = Arc::new(Self {
            id: Uuid::new_v4(),
            sender,
            pending: DashMap::new(),
            released: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            faults,
            reader: Mutex::new(None),
        });

        let reader = tokio::spawn(read_loop(Arc::downgrade(&channel), receiver));
        *channel.reader.lock() = Some(reader);

        trace!(channel_id = %channel.id, "Remote channel opened");
        channel
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of outstanding calls
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Send a request and wait for its correlated outcome
    pub async fn request(&self, request: Request) -> Result<Outcome, RemoteError> {
        if self.is_released() {
            return Err(RemoteError::Released);
        }
        self.round_trip(request).await
    }

    /// Release the channel and wait for the responder's acknowledgement
    ///
    /// All other outstanding calls fail with [`RemoteError::Released`]. A second
    /// release fails the same way.
    pub async fn release(&self) -> Result<(), RemoteError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Err(RemoteError::Released);
        }

        let acknowledged = self.round_trip(Request::Release).await;
        self.drain();
        self.stop_reader();
        debug!(channel_id = %self.id, "Remote channel released");

        acknowledged.map(|_| ())
    }

    pub(crate) fn report(&self, fault: ChannelFault) {
        if self.is_released() {
            return;
        }
        warn!(channel_id = %self.id, fault = %fault, "Remote channel fault");
        if let Some(faults) = &self.faults {
            let _ = faults.send(fault);
        }
    }

    async fn round_trip(&self, request: Request) -> Result<Outcome, RemoteError> {
        let message = Message::request(request);
        let id = message.id;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        if self.is_closed() {
            self.pending.remove(&id);
            return Err(RemoteError::ChannelClosed);
        }

        if let Err(e) = self.sender.send(message) {
            self.pending.remove(&id);
            self.report(ChannelFault::Transport(e.to_string()));
            return Err(e);
        }

        rx.await.map_err(|_| {
            if self.is_closed() {
                RemoteError::ChannelClosed
            } else {
                RemoteError::Released
            }
        })
    }

    fn dispatch(&self, message: Message) {
        match message.body {
            MessageBody::Response(outcome) => match self.pending.remove(&message.id) {
                Some((_, resolver)) => {
                    if resolver.send(outcome).is_err() {
                        trace!(message_id = %message.id, "Caller stopped waiting for response");
                    }
                }
                None => trace!(message_id = %message.id, "Response without a pending call"),
            },
            MessageBody::Request(request) => self.report(ChannelFault::MessageError(format!(
                "unexpected {} request on caller side",
                request.kind()
            ))),
        }
    }

    fn link_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if !self.is_released() {
            self.report(ChannelFault::Closed);
        }
        self.drain();
    }

    /// Drop every resolver; waiting callers observe the failure
    fn drain(&self) {
        self.pending.clear();
    }

    fn stop_reader(&self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

impl Drop for RemoteChannel {
    fn drop(&mut self) {
        if !self.released.swap(true, Ordering::SeqCst) && !self.is_closed() {
            // Nobody is left to wait for the acknowledgement.
            let _ = self.sender.send(Message::request(Request::Release));
            trace!(channel_id = %self.id, "Last stub dropped, release sent");
        }
        self.stop_reader();
    }
}

impl fmt::Debug for RemoteChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteChannel")
            .field("id", &self.id)
            .field("pending", &self.pending.len())
            .field("released", &self.is_released())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn read_loop(channel: Weak<RemoteChannel>, mut receiver: PortReceiver) {
    while let Some(message) = receiver.recv().await {
        let Some(channel) = channel.upgrade() else {
            return;
        };
        channel.dispatch(message);
    }

    if let Some(channel) = channel.upgrade() {
        channel.link_closed();
    }
}
