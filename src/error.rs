use thiserror::Error;

#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("initialization error: {0}")]
    Initialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("AEAD integrity check failed")]
    AeadIntegrity,

    #[error("replay detected: sequence {0} already seen or out of window")]
    ReplayDetected(u64),

    #[error("checksum mismatch for {0}")]
    ChecksumMismatch(String),

    #[error("peer not trusted: {0}")]
    PeerNotTrusted(String),

    #[error("peer quarantined: {0}")]
    PeerQuarantined(String),

    #[error("transfer rejected: {0}")]
    TransferRejected(String),

    #[error("state store error: {0}")]
    StateStore(String),

    #[error("path rejected: {0}")]
    InvalidPath(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("not initialized")]
    NotInitialized,
}

pub type Result<T> = std::result::Result<T, SwarmError>;
