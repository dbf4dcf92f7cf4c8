use crate::config::ConfigurationError;
use crate::pool::PoolError;
use crate::rpc::RemoteError;
use crate::worker::SpawnError;

/// Crate-level error aggregating the module errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkpoolError {
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Spawn error: {0}")]
    Spawn(#[from] SpawnError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

pub type Result<T> = std::result::Result<T, WorkpoolError>;
