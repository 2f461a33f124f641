//! Errors for the cluster router.

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error(transparent)]
    Registry(#[from] vigil_registry::Error),

    #[error(transparent)]
    Replay(#[from] vigil_replay::ReplayError),
}

pub type Result<T> = std::result::Result<T, ClusterError>;
