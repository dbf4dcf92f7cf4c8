use crate::config::ConfigurationError;
use crate::rpc::RemoteError;
use crate::worker::SpawnError;

/// Errors surfaced to callers of the pool
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PoolError {
    #[error("No available workers")]
    NoAvailableWorkers,

    #[error("Worker unavailable: {worker_id}")]
    WorkerUnavailable { worker_id: usize },

    #[error("Remote call failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("Worker spawn failed: {0}")]
    Spawn(#[from] SpawnError),

    #[error("Worker pool has been destroyed")]
    Destroyed,

    #[error("Invalid pool configuration: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl PoolError {
    /// Capacity errors: nothing was sent to a worker
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            PoolError::NoAvailableWorkers | PoolError::WorkerUnavailable { .. }
        )
    }
}
