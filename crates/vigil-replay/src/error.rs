//! Errors for the replay log.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("replay log I/O error at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("record too large: {size} bytes exceeds the {max} byte frame limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("malformed netstring frame in {path}")]
    MalformedFrame { path: PathBuf },
}

pub type Result<T> = std::result::Result<T, ReplayError>;
