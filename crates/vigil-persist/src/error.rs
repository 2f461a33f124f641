//! Errors for the state-snapshot persistence layer.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("state.dat I/O error")]
    Io(#[from] std::io::Error),

    #[error("failed to encode state record")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
