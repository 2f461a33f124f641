//! Errors for check scheduling.

use thiserror::Error;
use vigil_types::ObjectKey;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no such service {0}")]
    NoSuchService(ObjectKey),

    #[error(transparent)]
    Registry(#[from] vigil_registry::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
