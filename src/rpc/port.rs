//! Duplex message link between two sides of a channel
//!
//! A `Port` is one end of an in-memory link. Messages are moved, never shared,
//! so the two ends can live on different threads with different runtimes.

use std::fmt;
use tokio::sync::mpsc;

use super::error::RemoteError;
use super::protocol::Message;

/// One end of a duplex link
pub struct Port {
    sender: mpsc::UnboundedSender<Message>,
    receiver: mpsc::UnboundedReceiver<Message>,
}

/// Create a connected pair of ports
pub fn port_pair() -> (Port, Port) {
    let (left_tx, left_rx) = mpsc::unbounded_channel();
    let (right_tx, right_rx) = mpsc::unbounded_channel();

    (
        Port {
            sender: left_tx,
            receiver: right_rx,
        },
        Port {
            sender: right_tx,
            receiver: left_rx,
        },
    )
}

impl Port {
    /// Split into an outbound half (cloneable) and an inbound half
    pub fn split(self) -> (PortSender, PortReceiver) {
        (PortSender(self.sender), PortReceiver(self.receiver))
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

/// Outbound half of a port
#[derive(Clone)]
pub struct PortSender(mpsc::UnboundedSender<Message>);

impl PortSender {
    /// Post a message to the other side
    pub fn send(&self, message: Message) -> Result<(), RemoteError> {
        self.0.send(message).map_err(|e| RemoteError::Transport {
            message: format!("link closed while posting message {}", e.0.id),
        })
    }

    /// Whether the other side has stopped reading
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// Inbound half of a port
pub struct PortReceiver(mpsc::UnboundedReceiver<Message>);

impl PortReceiver {
    /// Wait for the next message. `None` once the other side is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        self.0.recv().await
    }
}
