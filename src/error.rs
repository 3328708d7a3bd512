//! Error types for the head block

use thiserror::Error;

/// Result type alias for head block operations
pub type Result<T> = std::result::Result<T, HeadError>;

/// Head block error types
#[derive(Error, Debug)]
pub enum HeadError {
    /// An appended sample has a timestamp older than the most recent sample
    #[error("out of order sample")]
    OutOfOrderSample,

    /// An appended sample has the timestamp of the most recent sample but a different value
    #[error("amending sample")]
    AmendSample,

    /// A capacity limit was exceeded; the block stops accepting writes
    #[error("out of bounds")]
    OutOfBounds,

    /// A series reference beyond the current series count
    #[error("series not found: {0}")]
    SeriesNotFound(u32),

    /// Label value queries cover exactly one label name
    #[error("invalid label query size: {0}")]
    InvalidLabelQuery(usize),

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Checksum mismatch
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Invalid data format
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// A WAL entry cut short by a crash mid-write
    #[error("truncated WAL entry")]
    TruncatedWalEntry,

    /// WAL recovery error
    #[error("WAL recovery error: {0}")]
    WalRecovery(String),
}
