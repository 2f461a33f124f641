//! Errors for the endpoint connection layer.

#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("failed to encode outbound message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("no certificate presented during handshake")]
    MissingPeerCertificate,

    #[error("could not extract a subject CN from the peer certificate")]
    MissingCommonName,

    #[error("peer CN {cn:?} does not match any configured endpoint")]
    UnknownPeer { cn: String },

    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("malformed netstring frame")]
    MalformedFrame,

    #[error("connection closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, MeshError>;
