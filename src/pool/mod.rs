//! # Worker Pool
//!
//! A fixed set of worker units behind a load balancer, with crash detection,
//! supervised revival, and periodic stats sampling.

mod coordinator;
pub mod error;
pub mod events;
mod revival;
pub mod snapshot;

pub use coordinator::WorkerPool;
pub use error::PoolError;
pub use events::{PoolEvent, EVENT_BUFFER_SIZE};
pub use snapshot::{PoolSnapshot, SlotSnapshot};
