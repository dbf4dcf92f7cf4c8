//! # Remote Call Layer
//!
//! Lets the pool invoke methods on an object that lives on another thread, as
//! if it were local, without sharing memory. The caller holds a [`Remote`]
//! stub; the far side runs [`serve`] over an [`Exposed`] object. The two
//! communicate over a [`Port`] using the messages in [`protocol`].

pub mod channel;
pub mod error;
pub mod expose;
pub mod port;
pub mod protocol;
pub mod remote;
pub mod transfer;

pub use channel::{ChannelFault, RemoteChannel};
pub use error::{RemoteError, ServeError, Thrown};
pub use expose::{serve, serve_until, single_segment, Exposed, ServeExit};
pub use port::{port_pair, Port};
pub use protocol::{Message, Outcome, Path, Request, WireValue};
pub use remote::Remote;
pub use transfer::{ProxyHandler, RemoteValue, ThrowHandler, Transfer};
