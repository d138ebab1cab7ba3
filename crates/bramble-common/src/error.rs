//! Error types for the bramble storage engine.

use thiserror::Error;

/// Result type alias using BrambleError.
pub type Result<T> = std::result::Result<T, BrambleError>;

/// Errors that can occur in bramble operations.
#[derive(Debug, Error)]
pub enum BrambleError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // File errors
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already exists: {0}")]
    FileExists(String),

    // Storage errors
    #[error("Page not found: {page_num} in file {file_id}")]
    PageNotFound { file_id: u32, page_num: u32 },

    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("Page full, unable to insert record")]
    PageFull,

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    // Index errors
    #[error("Index metadata mismatch: {0}")]
    BadIndexInfo(String),

    #[error("Scan range is invalid: low value exceeds high value")]
    BadScanRange,

    #[error("Scan operators are invalid: expected GT/GTE for low and LT/LTE for high")]
    BadOpcodes,

    #[error("No key in the index satisfies the scan criteria")]
    NoSuchKeyFound,

    #[error("No scan has been initialized")]
    ScanNotInitialized,

    #[error("Index scan completed, no further entries satisfy the scan")]
    IndexScanCompleted,

    #[error("Key extraction out of bounds: record of {record_len} bytes, key at offset {offset}")]
    KeyOutOfBounds { record_len: usize, offset: usize },

    // Scanner errors
    #[error("End of file reached")]
    EndOfFile,

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}
