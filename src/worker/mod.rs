//! Worker units and the handles the pool keeps for them

pub mod handle;
pub mod script;

pub use handle::{FaultKind, WorkerFault, WorkerHandle, WorkerStats};
pub use script::{NativeEvent, NativeHandle, SpawnError, ThreadScript, WorkerScript, WorkerUnit};
